//! HTTP server side of the HTTP portal
//!
//! Routes:
//! - `POST /functions/{name}`
//! - `POST /services/{service}/{method}`
//! - `GET /services/{service}` (method listing)
//! - `GET /health`, `GET /functions`, `GET /services`, `GET /metrics`
//!
//! `OPTIONS` preflights are answered from the CORS policy before the
//! middleware chain runs.

use super::middleware::{chain, handler, Handler, HttpRequest, HttpResponse, Middleware, RequestId};
use super::Route;
use crate::config::HttpPortalConfig;
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{call_validated, Function};
use crate::metrics::PortalMetrics;
use crate::registry::FunctionRegistry;
use crate::request_id::{self, REQUEST_ID_HEADER};
use crate::service::ServiceRegistry;
use crate::shutdown::{GracefulShutdown, ShutdownConfig};
use bytes::Bytes;
use http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN};
use http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use portico_core::{percent_decode, FunctionData};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub(crate) const TRANSPORT: &str = "http";

/// State shared by every connection of one portal
pub(crate) struct HttpState {
    pub(crate) config: HttpPortalConfig,
    pub(crate) functions: FunctionRegistry,
    pub(crate) services: ServiceRegistry,
    pub(crate) metrics: PortalMetrics,
    pub(crate) created_at: Instant,
}

/// A running server
pub(crate) struct ServerHandle {
    pub(crate) local_addr: SocketAddr,
    pub(crate) shutdown: GracefulShutdown,
    pub(crate) accept_task: JoinHandle<()>,
}

/// Bind, then serve until the returned handle's shutdown is triggered
pub(crate) async fn serve(
    state: Arc<HttpState>,
    middlewares: &[Middleware],
) -> PortalResult<ServerHandle> {
    let bind_addr = state.config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| PortalError::transport(TRANSPORT, format!("bind {}: {}", bind_addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| PortalError::transport(TRANSPORT, e.to_string()))?;

    let router = chain(router(state.clone()), middlewares);
    let shutdown = GracefulShutdown::new(ShutdownConfig::default());
    let accept_task = tokio::spawn(accept_loop(listener, router, state, shutdown.clone()));

    Ok(ServerHandle {
        local_addr,
        shutdown,
        accept_task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    router: Handler,
    state: Arc<HttpState>,
    shutdown: GracefulShutdown,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("HTTP connection from {}", peer);
                    tokio::spawn(serve_connection(
                        stream,
                        router.clone(),
                        state.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("HTTP accept failed: {}", e),
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    router: Handler,
    state: Arc<HttpState>,
    shutdown: GracefulShutdown,
) {
    let _guard = shutdown.connection_guard();

    let service = service_fn(move |request: Request<Incoming>| {
        let router = router.clone();
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(state, router, request).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!("HTTP connection closed with error: {}", e);
            }
        }
        _ = shutdown.wait() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.as_mut().await {
                debug!("HTTP connection closed during shutdown: {}", e);
            }
        }
    }
}

/// Answer preflights, otherwise buffer the body and run the middleware chain
async fn handle_request(
    state: Arc<HttpState>,
    router: Handler,
    request: Request<Incoming>,
) -> HttpResponse {
    let request_id = request_id::get_or_generate(request.headers());
    let origin = request
        .headers()
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let limit = state.config.max_body_size;

    let declared = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let mut response = if request.method() == Method::OPTIONS {
        preflight(&state, origin.as_deref())
    } else if declared.is_some_and(|len| len > limit) {
        body_too_large(limit)
    } else {
        let (mut parts, body) = request.into_parts();
        match Limited::new(body, limit).collect().await {
            Ok(collected) => {
                parts.extensions.insert(RequestId(request_id.clone()));
                router(Request::from_parts(parts, collected.to_bytes())).await
            }
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => body_too_large(limit),
            Err(e) => error_response(&PortalError::invalid_argument(format!(
                "failed to read request body: {}",
                e
            ))),
        }
    };

    insert_header(&mut response, REQUEST_ID_HEADER, &request_id);
    if !response
        .headers()
        .contains_key("access-control-allow-origin")
    {
        for (name, value) in state.config.cors.response_headers(origin.as_deref()) {
            insert_header(&mut response, name, &value);
        }
    }
    response
}

/// Innermost handler: route and dispatch
fn router(state: Arc<HttpState>) -> Handler {
    handler(move |request| {
        let state = state.clone();
        async move { route(&state, request).await }
    })
}

async fn route(state: &HttpState, request: HttpRequest) -> HttpResponse {
    let segments: Vec<String> = request
        .uri()
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(percent_decode)
        .collect();
    let method = request.method().clone();

    let top = segments.iter().map(String::as_str).collect::<Vec<_>>();
    match top.as_slice() {
        ["health"] => only_get(&method, || health(state)),
        ["functions"] => only_get(&method, || list_functions(state)),
        ["services"] => only_get(&method, || list_services(state)),
        ["metrics"] if state.config.enable_metrics => only_get(&method, || {
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Full::new(Bytes::from(state.metrics.encode())))
                .unwrap_or_else(|_| empty(StatusCode::INTERNAL_SERVER_ERROR))
        }),
        _ => match Route::from_segments(&top) {
            Some(Route::Service(service)) => only_get(&method, || describe_service(state, &service)),
            Some(target) if method == Method::POST => invoke(state, target, request).await,
            Some(_) => method_not_allowed("POST"),
            None => error_response(&PortalError::not_found(format!(
                "route '{}'",
                request.uri().path()
            ))),
        },
    }
}

fn only_get(method: &Method, respond: impl FnOnce() -> HttpResponse) -> HttpResponse {
    if method == Method::GET {
        respond()
    } else {
        method_not_allowed("GET")
    }
}

/// Decode, validate, call, validate, encode
async fn invoke(state: &HttpState, target: Route, request: HttpRequest) -> HttpResponse {
    let label = target.function_name();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(request_id::generate);
    let ctx = CallContext::with_timeout(state.config.request_timeout()).with_request_id(request_id);

    let result = dispatch(state, &ctx, &target, request.body()).await;
    state
        .metrics
        .record_call(TRANSPORT, &label, result.as_ref().err(), start.elapsed());

    match result {
        Ok(output) => {
            debug!("{} served {}", label, ctx.request_id());
            json_response(StatusCode::OK, &json!({ "result": output.into_json(), "error": null }))
        }
        Err(e) => {
            if e.status_code() >= 500 {
                error!("{} failed: {}", label, e);
            } else {
                debug!("{} rejected: {}", label, e);
            }
            error_response(&e)
        }
    }
}

async fn dispatch(
    state: &HttpState,
    ctx: &CallContext,
    target: &Route,
    body: &Bytes,
) -> PortalResult<FunctionData> {
    let function: Arc<dyn Function> = match target {
        Route::Function(name) => state
            .functions
            .get(name)
            .ok_or_else(|| PortalError::not_found(format!("function '{}'", name)))?,
        Route::Method(service, method) => {
            state.services.get_service_method(service, method).ok_or_else(|| {
                PortalError::not_found(format!("method '{}' on service '{}'", method, service))
            })?
        }
        Route::Service(service) => {
            return Err(PortalError::not_found(format!("service '{}' is not callable", service)))
        }
    };

    let input = decode_body(body)?;
    call_validated(&*function, ctx, FunctionData::from(input)).await
}

/// Request bodies must be a JSON object; an empty body is an empty map
fn decode_body(body: &Bytes) -> PortalResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(Value::Null) => Ok(Value::Object(Default::default())),
        Ok(_) => Err(PortalError::invalid_argument("request body must be a JSON object")),
        Err(e) => Err(PortalError::invalid_argument(format!("malformed JSON body: {}", e))),
    }
}

fn preflight(state: &HttpState, origin: Option<&str>) -> HttpResponse {
    let mut response = empty(StatusCode::NO_CONTENT);
    for (name, value) in state.config.cors.preflight_headers(origin) {
        insert_header(&mut response, name, &value);
    }
    response
}

fn health(state: &HttpState) -> HttpResponse {
    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "functions": state.functions.count(),
            "services": state.services.count(),
            "methods": state.services.functions().count(),
            "uptime_secs": state.created_at.elapsed().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

fn list_functions(state: &HttpState) -> HttpResponse {
    let mut names = state.functions.list();
    names.sort();
    json_response(StatusCode::OK, &json!({ "functions": names }))
}

fn list_services(state: &HttpState) -> HttpResponse {
    let mut names = state.services.list_services();
    names.sort();
    let services: Vec<Value> = names
        .iter()
        .filter_map(|name| state.services.get_service(name))
        .map(|service| json!({ "name": service.name(), "methods": service.method_names() }))
        .collect();
    json_response(StatusCode::OK, &json!({ "services": services }))
}

fn describe_service(state: &HttpState, name: &str) -> HttpResponse {
    match state.services.get_service(name) {
        Some(service) => json_response(
            StatusCode::OK,
            &json!({
                "name": service.name(),
                "description": service.schema().description,
                "methods": service.method_names(),
                "bound": service.is_bound(),
            }),
        ),
        None => error_response(&PortalError::not_found(format!("service '{}'", name))),
    }
}

fn json_response(status: StatusCode, body: &Value) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| empty(StatusCode::INTERNAL_SERVER_ERROR))
}

pub(crate) fn error_response(error: &PortalError) -> HttpResponse {
    let body = error.to_error_response();
    let status =
        StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_json())))
        .unwrap_or_else(|_| empty(StatusCode::INTERNAL_SERVER_ERROR))
}

fn method_not_allowed(allow: &'static str) -> HttpResponse {
    let mut response = json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &json!({ "result": null, "error": "method not allowed", "code": "METHOD_NOT_ALLOWED", "status": 405 }),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

fn body_too_large(limit: usize) -> HttpResponse {
    json_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &json!({
            "result": null,
            "error": format!("request body exceeds {} bytes", limit),
            "code": "PAYLOAD_TOO_LARGE",
            "status": 413,
        }),
    )
}

/// Insert a header, skipping names or values that are not valid
fn insert_header(response: &mut HttpResponse, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        response.headers_mut().insert(name, value);
    }
}

fn empty(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
