//! Portico core value types
//!
//! Leaf types shared by every portal: the [`Address`] model, the
//! [`FunctionData`] container, the schema collaborator contracts and the CORS
//! and security header policies. Nothing in here does I/O.

pub mod address;
pub mod cors;
pub mod data;
pub mod schema;
pub mod security_headers;

pub use address::{
    percent_decode, Address, AddressBuilder, AddressError, NETWORK_SCHEMES, SCHEME_HTTP, SCHEME_HTTPS,
    SCHEME_LOCAL, SCHEME_MOCK, SCHEME_TEST, SCHEME_WS, SCHEME_WSS,
};
pub use cors::CorsConfig;
pub use data::{FunctionData, VALUE_KEY};
pub use security_headers::{HstsConfig, SecurityHeadersConfig};
pub use schema::{FunctionSchema, Schema, ServiceSchema, ValidationError, ValidationResult};
