//! Self-termination through the compute provider's control API.

#[derive(Debug, thiserror::Error)]
pub enum TerminationError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Provider returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

/// Destroys rented instances. Only ever called for this worker's own one.
pub struct ComputeProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl ComputeProvider {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key,
        }
    }

    /// `DELETE {api_url}/instances/{id}/`. Success is exactly HTTP 200.
    pub async fn destroy_instance(&self, instance_id: u64) -> Result<(), TerminationError> {
        let mut request = self
            .client
            .delete(format!("{}/instances/{instance_id}/", self.api_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TerminationError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TerminationError::HttpStatus {
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "Provider returned HTTP 403: forbidden");
    }
}
