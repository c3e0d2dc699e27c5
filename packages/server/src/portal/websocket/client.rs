//! WebSocket client side: one connection per call

use super::message::WsMessage;
use super::Target;
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::RemoteCaller;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use portico_core::{Address, FunctionData, SCHEME_WSS};
use std::time::Duration;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use uuid::Uuid;

const TRANSPORT: &str = "ws";

fn transport_error(e: impl std::fmt::Display) -> PortalError {
    PortalError::transport(TRANSPORT, e.to_string())
}

/// Performs proxy calls for [`super::WebSocketPortal`]
#[derive(Debug, Clone)]
pub struct WsCaller {
    timeout: Duration,
    max_message_size: usize,
}

impl WsCaller {
    pub fn new(timeout: Duration, max_message_size: usize) -> Self {
        Self {
            timeout,
            max_message_size,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect, send `call`, wait for the frame carrying its id, close
    async fn round_trip(
        &self,
        url: &str,
        call: WsMessage,
        function: &str,
    ) -> PortalResult<FunctionData> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);

        let (mut socket, _) = connect_async_with_config(url, Some(config), false)
            .await
            .map_err(transport_error)?;
        socket
            .send(Message::Text(call.encode()?))
            .await
            .map_err(transport_error)?;

        let result = loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => match WsMessage::decode(&text) {
                    Ok(reply) if reply.id == call.id => break reply.into_result(function),
                    Ok(reply) => {
                        debug!("Ignoring WebSocket frame {} while waiting for {}", reply.id, call.id)
                    }
                    Err(e) => debug!("Ignoring undecodable WebSocket frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    break Err(transport_error(format!(
                        "connection closed before '{}' replied",
                        function
                    )))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(transport_error(e)),
            }
        };

        if let Err(e) = socket.close(None).await {
            debug!("WebSocket close after {} failed: {}", function, e);
        }
        result
    }
}

#[async_trait]
impl RemoteCaller for WsCaller {
    fn transport(&self) -> &'static str {
        TRANSPORT
    }

    async fn call_remote(
        &self,
        ctx: &CallContext,
        address: &Address,
        data: FunctionData,
    ) -> PortalResult<FunctionData> {
        if address.scheme() == SCHEME_WSS {
            return Err(PortalError::transport(
                TRANSPORT,
                format!("no TLS connector available for {}", address),
            ));
        }

        let target = Target::from_address(address)?;
        let function = target.function_name();
        let call = target.call_message(Uuid::new_v4().to_string(), data)?;
        let url = address.without_query().to_string();

        debug!("WebSocket call {} to {} (request {})", call.id, url, ctx.request_id());
        let ctx = ctx.child().timeout(self.timeout);
        ctx.run(self.round_trip(&url, call, &function)).await
    }

    fn method_address(&self, service: &Address, method: &str) -> PortalResult<Address> {
        match Target::from_address(service)? {
            Target::Service(_) => Ok(service.with_query("method", method)),
            _ => Err(PortalError::invalid_address(format!(
                "{} is not a service address",
                service
            ))),
        }
    }
}
