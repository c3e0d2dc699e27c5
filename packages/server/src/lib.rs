//! Portico: register a function or service once, call it through any portal
//!
//! ```text
//! caller --address--> PortalRegistry --scheme--> Portal --> FunctionHandle
//!                                                           |- Direct (registry entry)
//!                                                           '- Remote (network round trip)
//! ```
//!
//! Portals:
//! - [`LocalPortal`] (`local://`) in-process dispatch
//! - [`HttpPortal`] (`http://`) JSON over HTTP/1.1, server and client
//! - [`WebSocketPortal`] (`ws://`) JSON frames over a persistent connection
//! - [`TestingPortal`] (`mock://`, `test://`) deterministic doubles with call
//!   history
//!
//! Nothing is global: build a [`PortalRegistry`] (or use
//! [`PortalRegistry::with_defaults`]) and register the portals you need.

pub mod config;
pub mod context;
pub mod error;
pub mod function;
pub mod metrics;
pub mod portal;
pub mod registry;
pub mod request_id;
pub mod service;
pub mod shutdown;

pub use config::{HttpPortalConfig, PortalConfig, WebSocketPortalConfig};
pub use context::CallContext;
pub use error::{BoxError, ErrorResponse, PortalError, PortalResult};
pub use function::{
    Function, FunctionHandle, FunctionWrapper, NativeFunction, RemoteCaller, RemoteFunction,
};
pub use metrics::PortalMetrics;
pub use portal::http::middleware;
pub use portal::websocket::{MessageType, WsMessage};
pub use portal::{
    CallHistory, CallRecord, HttpPortal, LocalPortal, Portal, PortalRegistry, TestingPortal,
    WebSocketPortal,
};
pub use registry::{FunctionMetadata, FunctionRegistry};
pub use service::{
    BoundTable, DispatchTable, RegisteredService, RemoteService, Service, ServiceHandle,
    ServiceInstance, ServiceRegistry,
};
pub use shutdown::{GracefulShutdown, ShutdownConfig};

pub use portico_core::{
    Address, AddressBuilder, AddressError, CorsConfig, FunctionData, FunctionSchema, HstsConfig,
    Schema, SecurityHeadersConfig, ServiceSchema, ValidationError, ValidationResult,
};
