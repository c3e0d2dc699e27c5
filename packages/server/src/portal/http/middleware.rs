//! HTTP middleware
//!
//! A [`Handler`] turns a buffered request into a response; a [`Middleware`]
//! wraps one handler into another. Middleware registered first sees the
//! request first and the response last.

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderName, HeaderValue, Request, Response};
use http_body_util::Full;
use portico_core::SecurityHeadersConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Request with its body already collected
pub type HttpRequest = Request<Bytes>;

pub type HttpResponse = Response<Full<Bytes>>;

pub type HandlerFuture = BoxFuture<'static, HttpResponse>;

pub type Handler = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Request id attached to every request's extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Build a [`Handler`] from an async closure
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(move |request| Box::pin(f(request)))
}

/// Build a [`Middleware`] from a wrapping closure
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap `inner` so that `middlewares[0]` is the outermost layer
pub fn chain(inner: Handler, middlewares: &[Middleware]) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(inner, |next, layer| layer(next))
}

/// Adds the configured security headers to every response
pub fn security_headers(config: SecurityHeadersConfig) -> Middleware {
    let headers: Arc<Vec<(HeaderName, HeaderValue)>> = Arc::new(
        config
            .headers()
            .into_iter()
            .filter_map(|(name, value)| {
                Some((
                    HeaderName::from_bytes(name.as_bytes()).ok()?,
                    HeaderValue::from_str(&value).ok()?,
                ))
            })
            .collect(),
    );

    middleware(move |next| {
        let headers = headers.clone();
        handler(move |request| {
            let next = next.clone();
            let headers = headers.clone();
            async move {
                let mut response = next(request).await;
                for (name, value) in headers.iter() {
                    response.headers_mut().insert(name.clone(), value.clone());
                }
                response
            }
        })
    })
}

/// Logs method, path, status and latency at debug level
pub fn request_logging() -> Middleware {
    middleware(|next| {
        handler(move |request| {
            let next = next.clone();
            async move {
                let method = request.method().clone();
                let path = request.uri().path().to_string();
                let request_id = request
                    .extensions()
                    .get::<RequestId>()
                    .map(|id| id.0.clone())
                    .unwrap_or_default();
                let start = Instant::now();

                let response = next(request).await;
                debug!(
                    "{} {} -> {} in {:?} (request {})",
                    method,
                    path,
                    response.status().as_u16(),
                    start.elapsed(),
                    request_id
                );
                response
            }
        })
    })
}
