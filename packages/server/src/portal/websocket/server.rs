//! WebSocket server side
//!
//! Each accepted connection gets:
//! - a reader loop decoding frames
//! - one writer task, the only code that touches the socket's sink, draining
//!   a bounded outbound queue
//! - a ping ticker feeding that same queue
//! - a spawned task per `call`, so a slow function never stalls the reader

use super::message::{MessageType, WsMessage};
use crate::config::WebSocketPortalConfig;
use crate::context::CallContext;
use crate::error::{PortalError, PortalResult};
use crate::function::{call_validated, Function};
use crate::metrics::PortalMetrics;
use crate::registry::FunctionRegistry;
use crate::service::ServiceRegistry;
use crate::shutdown::{GracefulShutdown, ShutdownConfig};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use portico_core::FunctionData;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(crate) const TRANSPORT: &str = "ws";

/// Outbound side of one open connection
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
}

/// State shared by every connection of one portal
pub(crate) struct WsState {
    pub(crate) config: WebSocketPortalConfig,
    pub(crate) functions: FunctionRegistry,
    pub(crate) services: ServiceRegistry,
    pub(crate) metrics: PortalMetrics,
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl WsState {
    pub(crate) fn new(config: WebSocketPortalConfig) -> Self {
        Self {
            config,
            functions: FunctionRegistry::new(),
            services: ServiceRegistry::new(),
            metrics: PortalMetrics::new(),
            connections: RwLock::new(HashMap::new()),
        }
    }

    fn add_connection(&self, id: &str, handle: ConnectionHandle) {
        self.connections.write().insert(id.to_string(), handle);
        self.metrics.connection_opened();
    }

    fn remove_connection(&self, id: &str) -> Option<ConnectionHandle> {
        let removed = self.connections.write().remove(id);
        if removed.is_some() {
            self.metrics.connection_closed();
        }
        removed
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub(crate) fn connection_ids(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Queue `message` on every connection; connections whose queue is
    /// closed or full are dropped. Returns how many accepted it.
    pub(crate) fn broadcast(&self, message: &WsMessage) -> PortalResult<usize> {
        let text = message.encode()?;
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, connection) in self.connections.read().iter() {
            match connection.outbound.try_send(Message::Text(text.clone())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping WebSocket connection {}: {}", id, e);
                    failed.push(id.clone());
                }
            }
        }

        for id in failed {
            if let Some(connection) = self.remove_connection(&id) {
                connection.closed.cancel();
            }
        }
        Ok(delivered)
    }

    pub(crate) async fn send_to(&self, id: &str, message: &WsMessage) -> PortalResult<()> {
        let connection = self
            .connections
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PortalError::not_found(format!("WebSocket connection '{}'", id)))?;

        connection
            .outbound
            .send(Message::Text(message.encode()?))
            .await
            .map_err(|_| {
                PortalError::transport(TRANSPORT, format!("connection '{}' is closed", id))
            })
    }
}

/// A running server
pub(crate) struct ServerHandle {
    pub(crate) local_addr: SocketAddr,
    pub(crate) shutdown: GracefulShutdown,
    pub(crate) accept_task: JoinHandle<()>,
}

pub(crate) async fn serve(state: Arc<WsState>) -> PortalResult<ServerHandle> {
    let bind_addr = state.config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| PortalError::transport(TRANSPORT, format!("bind {}: {}", bind_addr, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| PortalError::transport(TRANSPORT, e.to_string()))?;

    let shutdown = GracefulShutdown::new(ShutdownConfig::default());
    let accept_task = tokio::spawn(accept_loop(listener, state, shutdown.clone()));

    Ok(ServerHandle {
        local_addr,
        shutdown,
        accept_task,
    })
}

async fn accept_loop(listener: TcpListener, state: Arc<WsState>, shutdown: GracefulShutdown) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(stream, peer, state.clone(), shutdown.clone()));
                }
                Err(e) => warn!("WebSocket accept failed: {}", e),
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<WsState>,
    shutdown: GracefulShutdown,
) {
    let _guard = shutdown.connection_guard();

    let path = state.config.path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            let mut rejection: ErrorResponse = ErrorResponse::new(Some(format!(
                "no WebSocket endpoint at {}",
                request.uri().path()
            )));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(state.config.max_message_size);
    ws_config.max_frame_size = Some(state.config.max_message_size);

    let socket = match accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let id = Uuid::new_v4().to_string();
    let (sink, mut frames) = socket.split();
    let (outbound, queue) = mpsc::channel(state.config.outbound_queue_size.max(1));
    let closed = CancellationToken::new();

    state.add_connection(
        &id,
        ConnectionHandle {
            outbound: outbound.clone(),
            closed: closed.clone(),
        },
    );
    info!("WebSocket connection {} opened from {}", id, peer);

    let writer = tokio::spawn(write_loop(sink, queue, id.clone()));
    let pinger = state
        .config
        .ping_interval()
        .map(|interval| tokio::spawn(ping_loop(outbound.clone(), interval)));
    let connection_ctx = CallContext::new();

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                let _ = outbound.try_send(Message::Close(None));
                break;
            }
            _ = closed.cancelled() => {
                let _ = outbound.try_send(Message::Close(None));
                break;
            }
            frame = frames.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    on_text(&state, &connection_ctx, &outbound, text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    let reply = WsMessage::error(
                        "",
                        &PortalError::invalid_argument("binary frames are not supported"),
                    );
                    enqueue(&outbound, &reply).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => break,
                Some(Err(e)) => {
                    debug!("WebSocket {} read failed: {}", id, e);
                    break;
                }
            }
        }
    }

    connection_ctx.cancel();
    if let Some(pinger) = pinger {
        pinger.abort();
    }
    state.remove_connection(&id);
    drop(outbound);

    // Ends once every in-flight call has queued its reply
    if let Err(e) = writer.await {
        error!("WebSocket {} writer panicked: {}", id, e);
    }
    info!("WebSocket connection {} closed", id);
}

/// The only writer of a connection
async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut queue: mpsc::Receiver<Message>,
    id: String,
) {
    while let Some(message) = queue.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!("WebSocket {} write failed: {}", id, e);
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn ping_loop(outbound: mpsc::Sender<Message>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if outbound.send(Message::Ping(Vec::new())).await.is_err() {
            break;
        }
    }
}

async fn enqueue(outbound: &mpsc::Sender<Message>, message: &WsMessage) {
    match message.encode() {
        Ok(text) => {
            let _ = outbound.send(Message::Text(text)).await;
        }
        Err(e) => error!("Failed to encode WebSocket reply: {}", e),
    }
}

async fn on_text(
    state: &Arc<WsState>,
    connection_ctx: &CallContext,
    outbound: &mpsc::Sender<Message>,
    text: String,
) {
    let message = match WsMessage::decode(&text) {
        Ok(message) => message,
        Err(e) => {
            enqueue(outbound, &WsMessage::error(WsMessage::salvage_id(&text), &e)).await;
            return;
        }
    };

    if message.kind == MessageType::Call {
        let state = state.clone();
        let outbound = outbound.clone();
        let ctx = connection_ctx.child();
        tokio::spawn(async move {
            let reply = process_message(&state, &ctx, message).await;
            enqueue(&outbound, &reply).await;
        });
    } else {
        let reply = process_message(state, connection_ctx, message).await;
        enqueue(outbound, &reply).await;
    }
}

/// Reply to one decoded frame
pub(crate) async fn process_message(
    state: &WsState,
    ctx: &CallContext,
    mut message: WsMessage,
) -> WsMessage {
    let id = message.id.clone();
    match message.kind {
        MessageType::Ping => WsMessage::pong(id),
        MessageType::Call => {
            let label = call_label(&message);
            let start = Instant::now();
            let result = dispatch(state, ctx, &mut message).await;
            state
                .metrics
                .record_call(TRANSPORT, &label, result.as_ref().err(), start.elapsed());

            match result {
                Ok(output) => WsMessage::response(id, output),
                Err(e) => {
                    if e.status_code() >= 500 {
                        error!("{} failed: {}", label, e);
                    } else {
                        debug!("{} rejected: {}", label, e);
                    }
                    WsMessage::error(id, &e)
                }
            }
        }
        other => WsMessage::error(
            id,
            &PortalError::invalid_argument(format!(
                "unexpected '{}' message",
                other.as_str()
            )),
        ),
    }
}

fn call_label(message: &WsMessage) -> String {
    match (&message.function, &message.service, &message.method) {
        (Some(function), _, _) => function.clone(),
        (None, Some(service), Some(method)) => format!("{}.{}", service, method),
        _ => "unknown".to_string(),
    }
}

async fn dispatch(
    state: &WsState,
    ctx: &CallContext,
    message: &mut WsMessage,
) -> PortalResult<FunctionData> {
    let function: Arc<dyn Function> = match (&message.function, &message.service, &message.method)
    {
        (Some(name), _, _) => state
            .functions
            .get(name)
            .ok_or_else(|| PortalError::not_found(format!("function '{}'", name)))?,
        (None, Some(service), Some(method)) => state
            .services
            .get_service_method(service, method)
            .ok_or_else(|| {
                PortalError::not_found(format!("method '{}' on service '{}'", method, service))
            })?,
        _ => {
            return Err(PortalError::invalid_argument(
                "call needs 'function', or 'service' and 'method'",
            ))
        }
    };

    let input = message.call_input()?;
    call_validated(&*function, ctx, input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::NativeFunction;
    use portico_core::ServiceSchema;

    fn state() -> WsState {
        let state = WsState::new(WebSocketPortalConfig::default());
        state
            .functions
            .register(
                "add",
                NativeFunction::sync("add", |data| {
                    let a = data.get_i64("a").unwrap_or(0);
                    let b = data.get_i64("b").unwrap_or(0);
                    Ok(FunctionData::new().with("sum", a + b))
                })
                .shared(),
            )
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_process_ping() {
        let reply = process_message(&state(), &CallContext::new(), WsMessage::ping("p1")).await;
        assert_eq!(reply.kind, MessageType::Pong);
        assert_eq!(reply.id, "p1");
    }

    #[tokio::test]
    async fn test_process_call() {
        let state = state();
        let call = WsMessage::call_function("c1", "add", FunctionData::new().with("a", 2).with("b", 3));
        let reply = process_message(&state, &CallContext::new(), call).await;
        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.id, "c1");
        assert_eq!(reply.data.unwrap()["sum"], 5);
        assert_eq!(state.metrics.calls(TRANSPORT, "add", "ok"), 1);

        let missing = WsMessage::call_function("c2", "ghost", FunctionData::new());
        let reply = process_message(&state, &CallContext::new(), missing).await;
        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.id, "c2");
        assert_eq!(reply.code.as_deref(), Some("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_process_service_method() {
        let state = state();
        state
            .services
            .register_service("Users", ServiceSchema::new("Users").method("Get"))
            .unwrap();

        let call = WsMessage::call_method("m1", "Users", "Get", FunctionData::new().with("id", 7));
        let reply = process_message(&state, &CallContext::new(), call).await;
        assert_eq!(reply.kind, MessageType::Response);
        let data = reply.data.unwrap();
        assert_eq!(data["bound"], false);
        assert_eq!(data["method"], "Get");
    }

    #[tokio::test]
    async fn test_unexpected_messages() {
        let state = state();
        let reply = process_message(&state, &CallContext::new(), WsMessage::pong("x")).await;
        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.id, "x");

        let mut bare = WsMessage::ping("y");
        bare.kind = MessageType::Call;
        let reply = process_message(&state, &CallContext::new(), bare).await;
        assert_eq!(reply.code.as_deref(), Some("INVALID_ARGUMENT"));
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_connections() {
        let state = state();
        let (open_tx, mut open_rx) = mpsc::channel(4);
        let (closed_tx, closed_rx) = mpsc::channel(4);
        drop(closed_rx);

        let dead = CancellationToken::new();
        state.add_connection(
            "open",
            ConnectionHandle {
                outbound: open_tx,
                closed: CancellationToken::new(),
            },
        );
        state.add_connection(
            "gone",
            ConnectionHandle {
                outbound: closed_tx,
                closed: dead.clone(),
            },
        );
        assert_eq!(state.metrics.open_connections(), 2);

        let delivered = state.broadcast(&WsMessage::push(serde_json::json!({"n": 1}))).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(state.connection_ids(), vec!["open".to_string()]);
        assert!(dead.is_cancelled());
        assert_eq!(state.metrics.open_connections(), 1);
        assert!(matches!(open_rx.recv().await, Some(Message::Text(_))));

        assert!(matches!(
            state.send_to("gone", &WsMessage::ping("z")).await,
            Err(PortalError::NotFound { .. })
        ));
    }
}
