//! HTTP client side: proxies POST to a remote portal and decode its envelope

use super::Route;
use crate::context::CallContext;
use crate::error::{ErrorResponse, PortalError, PortalResult};
use crate::function::RemoteCaller;
use crate::request_id::REQUEST_ID_HEADER;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use portico_core::{Address, FunctionData, SCHEME_HTTPS};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const TRANSPORT: &str = "http";

/// Performs proxy calls for [`super::HttpPortal`]
pub struct HttpCaller {
    client: Client<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl HttpCaller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn round_trip(&self, uri: Uri, request_id: &str, body: Vec<u8>) -> PortalResult<(StatusCode, Bytes)> {
        let request = Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, request_id)
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| PortalError::transport(TRANSPORT, e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| PortalError::transport(TRANSPORT, e.to_string()))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| PortalError::transport(TRANSPORT, e.to_string()))?
            .to_bytes();
        Ok((status, body))
    }
}

impl std::fmt::Debug for HttpCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCaller")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl RemoteCaller for HttpCaller {
    fn transport(&self) -> &'static str {
        TRANSPORT
    }

    async fn call_remote(
        &self,
        ctx: &CallContext,
        address: &Address,
        data: FunctionData,
    ) -> PortalResult<FunctionData> {
        if address.scheme() == SCHEME_HTTPS {
            return Err(PortalError::transport(
                TRANSPORT,
                format!("no TLS connector available for {}", address),
            ));
        }

        let route = Route::from_address(address)?;
        let function = route.function_name();
        let uri: Uri = address
            .to_string()
            .parse()
            .map_err(|e| PortalError::invalid_address(format!("{}: {}", address, e)))?;
        let body = serde_json::to_vec(&data.into_json())?;

        debug!("POST {} (request {})", uri, ctx.request_id());
        let ctx = ctx.child().timeout(self.timeout);
        let (status, body) = ctx
            .run(self.round_trip(uri, ctx.request_id(), body))
            .await?;

        decode_response(status, &body, &function)
    }

    fn method_address(&self, service: &Address, method: &str) -> PortalResult<Address> {
        match Route::from_address(service)? {
            Route::Service(name) => Ok(service.with_path(format!("/services/{}/{}", name, method))),
            _ => Err(PortalError::invalid_address(format!(
                "{} is not a service address",
                service
            ))),
        }
    }
}

/// Turn a portal response into a result or the error kind it carries
pub(crate) fn decode_response(
    status: StatusCode,
    body: &[u8],
    function: &str,
) -> PortalResult<FunctionData> {
    if status.is_success() {
        let envelope: Value = serde_json::from_slice(body).map_err(|e| {
            PortalError::transport(TRANSPORT, format!("undecodable response body: {}", e))
        })?;
        return match envelope {
            Value::Object(mut map) => Ok(FunctionData::from(
                map.remove("result").unwrap_or(Value::Null),
            )),
            other => Ok(FunctionData::from(other)),
        };
    }

    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(error) => {
            let message = if error.message.is_empty() {
                error.error
            } else {
                error.message
            };
            Err(PortalError::from_wire(&error.code, message, function))
        }
        Err(_) => Err(PortalError::transport(
            TRANSPORT,
            format!(
                "{} returned {}: {}",
                function,
                status,
                String::from_utf8_lossy(body)
            ),
        )),
    }
}
