//! Startup readiness probe for the ComfyUI backend.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ComfyUIApi;

/// Poll `GET /prompt` every `interval` until it answers 200.
///
/// Never gives up; returns the total time spent waiting.
pub async fn wait_until_ready(api: &ComfyUIApi, interval: Duration) -> Duration {
    let started = Instant::now();
    loop {
        let result = api.probe().await;
        let elapsed = format_elapsed(started.elapsed());
        match result {
            Ok(200) => {
                tracing::info!(url = %api.api_url(), elapsed = %elapsed, "ComfyUI ready");
                return started.elapsed();
            }
            Ok(401) => {
                tracing::warn!(elapsed = %elapsed, "ComfyUI not ready (401 Unauthorized), waiting");
            }
            Ok(status) => {
                tracing::warn!(status, elapsed = %elapsed, "ComfyUI not ready, waiting");
            }
            Err(e) => {
                tracing::warn!(error = %e, elapsed = %elapsed, "ComfyUI unreachable, waiting");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Render a duration as `Xm Ys`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
