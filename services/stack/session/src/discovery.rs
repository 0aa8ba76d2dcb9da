//! Discovery server registration.

use bytes::{BufMut, Bytes, BytesMut};

/// Service name used for registration requests
pub const REGISTER_SERVER: &str = "RegisterServer";

/// Description of a server announced to a discovery server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRegistration {
    /// Globally unique URI of the server application
    pub server_uri: String,
    /// URI of the product the server is an instance of
    pub product_uri: String,
    /// URLs clients use to reach the server
    pub discovery_urls: Vec<String>,
    /// Whether the server is currently accepting connections
    pub is_online: bool,
}

impl ServerRegistration {
    /// Create an online registration with no discovery URLs
    pub fn new(server_uri: impl Into<String>, product_uri: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            product_uri: product_uri.into(),
            discovery_urls: Vec::new(),
            is_online: true,
        }
    }

    /// Add a discovery URL
    pub fn with_discovery_url(mut self, url: impl Into<String>) -> Self {
        self.discovery_urls.push(url.into());
        self
    }

    /// Request body: one `key=value` line per field, URLs repeated
    pub fn to_body(&self) -> Bytes {
        let mut buf = BytesMut::new();
        put_line(&mut buf, "server_uri", &self.server_uri);
        put_line(&mut buf, "product_uri", &self.product_uri);
        for url in &self.discovery_urls {
            put_line(&mut buf, "discovery_url", url);
        }
        put_line(
            &mut buf,
            "is_online",
            if self.is_online { "true" } else { "false" },
        );
        buf.freeze()
    }
}

fn put_line(buf: &mut BytesMut, key: &str, value: &str) {
    buf.put_slice(key.as_bytes());
    buf.put_u8(b'=');
    buf.put_slice(value.as_bytes());
    buf.put_u8(b'\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_body() {
        let registration = ServerRegistration::new("urn:demo:server", "urn:demo:product")
            .with_discovery_url("opc.tcp://localhost:4840")
            .with_discovery_url("opc.tcp://10.0.0.5:4840");

        let body = registration.to_body();
        let text = std::str::from_utf8(&body).unwrap();

        assert_eq!(
            text,
            "server_uri=urn:demo:server\n\
             product_uri=urn:demo:product\n\
             discovery_url=opc.tcp://localhost:4840\n\
             discovery_url=opc.tcp://10.0.0.5:4840\n\
             is_online=true\n"
        );
    }
}
