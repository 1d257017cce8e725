//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance, including the `client_id` that correlates prompt
//! submissions with WebSocket events. Call [`ComfyUIClient::connect`]
//! to establish a live [`ComfyUIConnection`].

use std::time::Duration;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream type used for ComfyUI connections.
pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// Stores the WebSocket base URL, the optional bearer token and the
/// `client_id` generated once per handle.
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
    token: Option<String>,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client with a fresh UUID v4 `client_id`.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `token`  - Bearer token sent in the handshake when present.
    pub fn new(ws_url: String, token: Option<String>) -> Self {
        Self {
            ws_url,
            client_id: uuid::Uuid::new_v4().to_string(),
            token,
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// Appends `client_id` as a query parameter so that ComfyUI can
    /// address execution events back to this client.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let mut request = url.as_str().into_client_request().map_err(|e| {
            ComfyUIClientError::Connection(format!("Invalid WebSocket URL {url}: {e}"))
        })?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ComfyUIClientError::Connection(format!("Invalid bearer token: {e}"))
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server closed the socket before the prompt completed.
    #[error("WebSocket closed before prompt {prompt_id} completed")]
    Closed { prompt_id: String },

    /// No completion event arrived within the configured limit.
    #[error("Timed out after {elapsed:?} waiting for prompt {prompt_id}")]
    Timeout { prompt_id: String, elapsed: Duration },

    /// ComfyUI reported an `execution_error` for the awaited prompt.
    #[error("Execution of prompt {prompt_id} failed in node {node}: {exception_type}: {message}")]
    Execution {
        prompt_id: String,
        node: String,
        exception_type: String,
        message: String,
    },
}
