//! Scheme selection for a ComfyUI `host:port` address.

/// A ComfyUI server address plus the scheme pair used to reach it.
///
/// Loopback addresses (`127.0.0.1`, `localhost`) are reached over plain
/// HTTP/WS; anything else goes over HTTPS/WSS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    address: String,
    secure: bool,
}

impl BackendEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let secure = !(address.contains("127.0.0.1") || address.contains("localhost"));
        Self { address, secure }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn http_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.address)
    }

    /// Base WebSocket URL, e.g. `ws://127.0.0.1:8188`.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_plain() {
        let ep = BackendEndpoint::new("127.0.0.1:8188");
        assert!(!ep.is_secure());
        assert_eq!(ep.http_url(), "http://127.0.0.1:8188");
        assert_eq!(ep.ws_url(), "ws://127.0.0.1:8188");

        assert!(!BackendEndpoint::new("localhost:8188").is_secure());
    }

    #[test]
    fn remote_is_tls() {
        let ep = BackendEndpoint::new("gpu.example.net:443");
        assert!(ep.is_secure());
        assert_eq!(ep.http_url(), "https://gpu.example.net:443");
        assert_eq!(ep.ws_url(), "wss://gpu.example.net:443");
    }
}
