//! Address model
//!
//! An [`Address`] locates a function or service behind a portal:
//!
//! ```text
//! scheme://host[:port][/path][?k=v&...]
//! ```
//!
//! Addresses are immutable. Derived addresses (`with_path`, `with_query`)
//! are new values. Query parameters are kept in a sorted map so two
//! addresses with the same parameters in a different order compare equal
//! and render to the same canonical string.
//!
//! Path segments and query keys/values are percent-encoded on output and
//! decoded on parse, which keeps `parse(addr.to_string()) == addr` for every
//! address the builder accepts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// In-process scheme
pub const SCHEME_LOCAL: &str = "local";
/// Plain HTTP
pub const SCHEME_HTTP: &str = "http";
/// HTTP over TLS
pub const SCHEME_HTTPS: &str = "https";
/// Plain WebSocket
pub const SCHEME_WS: &str = "ws";
/// WebSocket over TLS
pub const SCHEME_WSS: &str = "wss";
/// Deterministic mock transport
pub const SCHEME_MOCK: &str = "mock";
/// Alias of the mock transport used by test registries
pub const SCHEME_TEST: &str = "test";

/// Schemes that require a host
pub const NETWORK_SCHEMES: [&str; 4] = [SCHEME_HTTP, SCHEME_HTTPS, SCHEME_WS, SCHEME_WSS];

/// Errors produced while parsing or building an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// No `://` separator in the input
    MissingScheme(String),
    /// Scheme is empty or contains characters outside `[a-zA-Z0-9+.-]`
    InvalidScheme(String),
    /// Network schemes need a host
    EmptyHost { scheme: String },
    /// Host contains a reserved character
    InvalidHost(String),
    /// Port is not a number in `1..=65535`
    InvalidPort(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::MissingScheme(input) => {
                write!(f, "missing scheme separator in '{}'", input)
            }
            AddressError::InvalidScheme(scheme) => write!(f, "invalid scheme '{}'", scheme),
            AddressError::EmptyHost { scheme } => {
                write!(f, "scheme '{}' requires a host", scheme)
            }
            AddressError::InvalidHost(host) => write!(f, "invalid host '{}'", host),
            AddressError::InvalidPort(port) => write!(f, "invalid port '{}'", port),
        }
    }
}

impl std::error::Error for AddressError {}

/// Immutable location of a function or service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
    query: BTreeMap<String, String>,
}

impl Address {
    /// Start building an address
    pub fn builder() -> AddressBuilder {
        AddressBuilder::default()
    }

    /// Parse a URI-style string
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let separator = memchr::memmem::find(input.as_bytes(), b"://")
            .ok_or_else(|| AddressError::MissingScheme(input.to_string()))?;

        let scheme = normalize_scheme(&input[..separator])?;
        let mut rest = &input[separator + 3..];

        // Fragments carry no meaning for portals
        if let Some(hash) = memchr::memchr(b'#', rest.as_bytes()) {
            rest = &rest[..hash];
        }

        let authority_end = memchr::memchr2(b'/', b'?', rest.as_bytes()).unwrap_or(rest.len());
        let (host, port) = parse_authority(&rest[..authority_end])?;
        rest = &rest[authority_end..];

        let (raw_path, raw_query) = match memchr::memchr(b'?', rest.as_bytes()) {
            Some(q) => (&rest[..q], Some(&rest[q + 1..])),
            None => (rest, None),
        };

        let mut query = BTreeMap::new();
        if let Some(raw_query) = raw_query {
            for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = match memchr::memchr(b'=', pair.as_bytes()) {
                    Some(eq) => (&pair[..eq], &pair[eq + 1..]),
                    None => (pair, ""),
                };
                if key.is_empty() {
                    continue;
                }
                query.insert(percent::decode(key), percent::decode(value));
            }
        }

        let address = Address {
            host,
            port,
            path: percent::decode(raw_path),
            query,
            scheme,
        };
        address.validate()?;
        Ok(address)
    }

    /// Shorthand for `local://{name}`
    pub fn local(name: impl Into<String>) -> Result<Self, AddressError> {
        Address::builder().scheme(SCHEME_LOCAL).host(name).build()
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, `None` when unset
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Non-empty path segments
    pub fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// `host:port` when a port is set, otherwise `host`
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.scheme == SCHEME_LOCAL
    }

    pub fn is_network(&self) -> bool {
        NETWORK_SCHEMES.contains(&self.scheme.as_str())
    }

    /// Copy of this address with a different path
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Address {
            path: normalize_path(path.into()),
            ..self.clone()
        }
    }

    /// Copy of this address with one more query parameter
    pub fn with_query(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut query = self.query.clone();
        query.insert(key.into(), value.into());
        Address {
            query,
            ..self.clone()
        }
    }

    /// Copy of this address without query parameters
    pub fn without_query(&self) -> Self {
        Address {
            query: BTreeMap::new(),
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), AddressError> {
        if self.host.is_empty() && self.is_network() {
            return Err(AddressError::EmptyHost {
                scheme: self.scheme.clone(),
            });
        }
        validate_host(&self.host)?;
        if self.port == Some(0) {
            return Err(AddressError::InvalidPort("0".to_string()));
        }
        Ok(())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        f.write_str(&percent::encode(&self.path, percent::PATH))?;
        let mut first = true;
        for (key, value) in &self.query {
            f.write_str(if first { "?" } else { "&" })?;
            first = false;
            write!(
                f,
                "{}={}",
                percent::encode(key, percent::QUERY),
                percent::encode(value, percent::QUERY)
            )?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<&str> for Address {
    type Error = AddressError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Address::parse(value)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Fluent constructor for [`Address`]
#[derive(Debug, Clone, Default)]
pub struct AddressBuilder {
    scheme: String,
    host: String,
    port: u16,
    path: String,
    query: BTreeMap<String, String>,
}

impl AddressBuilder {
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// `0` leaves the port unset
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Address, AddressError> {
        let address = Address {
            scheme: normalize_scheme(&self.scheme)?,
            host: self.host,
            port: (self.port != 0).then_some(self.port),
            path: normalize_path(self.path),
            query: self.query.into_iter().filter(|(k, _)| !k.is_empty()).collect(),
        };
        address.validate()?;
        Ok(address)
    }
}

fn normalize_scheme(raw: &str) -> Result<String, AddressError> {
    let mut chars = raw.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    };
    if !valid {
        return Err(AddressError::InvalidScheme(raw.to_string()));
    }
    Ok(raw.to_ascii_lowercase())
}

fn normalize_path(path: String) -> String {
    if path.is_empty() || path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

fn parse_authority(authority: &str) -> Result<(String, Option<u16>), AddressError> {
    // Bracketed IPv6 literal
    if authority.starts_with('[') {
        let close = memchr::memchr(b']', authority.as_bytes())
            .ok_or_else(|| AddressError::InvalidHost(authority.to_string()))?;
        let host = authority[..=close].to_string();
        let rest = &authority[close + 1..];
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, Some(parse_port(port)?))),
            None if rest.is_empty() => Ok((host, None)),
            None => Err(AddressError::InvalidHost(authority.to_string())),
        };
    }

    match memchr::memrchr(b':', authority.as_bytes()) {
        Some(colon) => {
            let port = parse_port(&authority[colon + 1..])?;
            Ok((authority[..colon].to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}

fn parse_port(raw: &str) -> Result<u16, AddressError> {
    match raw.parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(AddressError::InvalidPort(raw.to_string())),
    }
}

fn validate_host(host: &str) -> Result<(), AddressError> {
    if host.starts_with('[') {
        let inner_ok = host.ends_with(']')
            && host[1..host.len() - 1]
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.');
        return if inner_ok {
            Ok(())
        } else {
            Err(AddressError::InvalidHost(host.to_string()))
        };
    }
    let reserved = |c: char| matches!(c, '/' | '?' | '#' | ':' | '@' | '[' | ']' | '%');
    if host.chars().any(|c| reserved(c) || c.is_whitespace() || c.is_control()) {
        return Err(AddressError::InvalidHost(host.to_string()));
    }
    Ok(())
}

/// Decode `%XX` escapes in a path segment or query component
pub fn percent_decode(input: &str) -> String {
    percent::decode(input)
}

/// Minimal percent codec for path and query components
mod percent {
    /// Characters escaped inside a path (segments keep their `/`)
    pub const PATH: &[u8] = b"%?# ";
    /// Characters escaped inside query keys and values
    pub const QUERY: &[u8] = b"%&=#+ ";

    pub fn encode(input: &str, reserved: &[u8]) -> String {
        let mut out = String::with_capacity(input.len());
        for ch in input.chars() {
            if ch.is_ascii() {
                let byte = ch as u8;
                if reserved.contains(&byte) || byte < 0x20 || byte == 0x7f {
                    out.push_str(&format!("%{:02X}", byte));
                    continue;
                }
            }
            out.push(ch);
        }
        out
    }

    pub fn decode(input: &str) -> String {
        if memchr::memchr(b'%', input.as_bytes()).is_none() {
            return input.to_string();
        }
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 2 < bytes.len() {
                if let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    out.push(hi << 4 | lo);
                    i += 3;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn hex(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_address() {
        let addr = Address::parse("http://localhost:8080/functions/echo?version=2&trace=on").unwrap();
        assert_eq!(addr.scheme(), "http");
        assert_eq!(addr.host(), "localhost");
        assert_eq!(addr.port(), Some(8080));
        assert_eq!(addr.path(), "/functions/echo");
        assert_eq!(addr.query_param("version"), Some("2"));
        assert_eq!(addr.query_param("trace"), Some("on"));
        assert_eq!(addr.authority(), "localhost:8080");
        assert!(addr.is_network());
        assert!(!addr.is_local());
    }

    #[test]
    fn test_parse_local_address() {
        let addr = Address::parse("local://add").unwrap();
        assert!(addr.is_local());
        assert_eq!(addr.host(), "add");
        assert_eq!(addr.port(), None);
        assert_eq!(addr.path(), "");
        assert_eq!(addr.authority(), "add");
        assert_eq!(addr.to_string(), "local://add");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            Address::parse("no-scheme-here"),
            Err(AddressError::MissingScheme(_))
        ));
        assert!(matches!(
            Address::parse("://host"),
            Err(AddressError::InvalidScheme(_))
        ));
        assert!(matches!(
            Address::parse("9http://host"),
            Err(AddressError::InvalidScheme(_))
        ));
        assert!(matches!(
            Address::parse("http:///functions/echo"),
            Err(AddressError::EmptyHost { .. })
        ));
        assert!(matches!(
            Address::parse("ws://host:notaport/ws"),
            Err(AddressError::InvalidPort(_))
        ));
        assert!(matches!(
            Address::parse("http://host:0"),
            Err(AddressError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let addr = Address::parse("HTTP://example.com").unwrap();
        assert_eq!(addr.scheme(), "http");
        assert_eq!(addr, Address::parse("http://example.com").unwrap());
    }

    #[test]
    fn test_query_order_does_not_matter() {
        let a = Address::parse("ws://h:1/ws?service=Users&method=Get").unwrap();
        let b = Address::parse("ws://h:1/ws?method=Get&service=Users").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());

        let built = Address::builder()
            .scheme("ws")
            .host("h")
            .port(1)
            .path("/ws")
            .query("method", "Get")
            .query("service", "Users")
            .build()
            .unwrap();
        assert_eq!(built, a);
    }

    #[test]
    fn test_builder_round_trip() {
        let cases = vec![
            Address::builder().scheme("local").host("echo").build().unwrap(),
            Address::builder()
                .scheme("http")
                .host("127.0.0.1")
                .port(80)
                .path("functions/echo")
                .build()
                .unwrap(),
            Address::builder()
                .scheme("mock")
                .host("fetch")
                .query("note", "a&b=c d%")
                .build()
                .unwrap(),
            Address::builder()
                .scheme("http")
                .host("[::1]")
                .port(9000)
                .path("/services/Users/Get")
                .build()
                .unwrap(),
            Address::builder()
                .scheme("local")
                .host("Users")
                .path("/weird path?#")
                .build()
                .unwrap(),
            Address::builder()
                .scheme("ws")
                .host("example.com")
                .path("/ws")
                .query("function", "grüße")
                .build()
                .unwrap(),
        ];

        for addr in cases {
            let rendered = addr.to_string();
            let parsed = Address::parse(&rendered).unwrap();
            assert_eq!(parsed, addr, "round trip failed for {}", rendered);
        }
    }

    #[test]
    fn test_builder_validates() {
        assert!(Address::builder().scheme("http").build().is_err());
        assert!(Address::builder().scheme("").host("h").build().is_err());
        assert!(Address::builder().scheme("local").host("a/b").build().is_err());
        // Port 0 means unset
        let addr = Address::builder().scheme("http").host("h").port(0).build().unwrap();
        assert_eq!(addr.port(), None);
    }

    #[test]
    fn test_derived_addresses_are_new_values() {
        let base = Address::parse("http://h:8080").unwrap();
        let derived = base.with_path("functions/add").with_query("v", "1");
        assert_eq!(base.path(), "");
        assert!(base.query().is_empty());
        assert_eq!(derived.to_string(), "http://h:8080/functions/add?v=1");
        assert_eq!(derived.without_query().to_string(), "http://h:8080/functions/add");
        let segments: Vec<_> = derived.path_segments().collect();
        assert_eq!(segments, vec!["functions", "add"]);
    }

    #[test]
    fn test_fragment_is_dropped() {
        let addr = Address::parse("http://h/functions/echo#frag").unwrap();
        assert_eq!(addr.path(), "/functions/echo");
    }

    #[test]
    fn test_serde_as_string() {
        let addr = Address::parse("ws://h:9/ws?function=echo").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"ws://h:9/ws?function=echo\"");
        let decoded: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, addr);
    }
}
