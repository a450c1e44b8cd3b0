//! Startup readiness probe.
//!
//! ComfyUI can take minutes to import custom nodes before it binds its
//! port. [`wait_ready`] probes `GET /` at a fixed cadence until the
//! server answers, the attempt budget runs out, or the
//! [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;

/// Tunable parameters for the readiness probe.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Delay between probes.
    pub interval: Duration,
    /// Number of probes before giving up.
    pub max_attempts: u32,
    /// Timeout for a single probe request.
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 120,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Wait until the ComfyUI instance behind `api` accepts requests.
///
/// Returns `true` on the first probe that gets any HTTP response and
/// `false` once `max_attempts` probes have failed or `cancel` fires.
/// Probe failures are never surfaced: the server may still be starting.
pub async fn wait_ready(
    api: &ComfyUIApi,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 1..=config.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(api_url = api.api_url(), "Readiness probe cancelled");
                return false;
            }
            result = api.ping(config.probe_timeout) => {
                match result {
                    Ok(()) => {
                        tracing::info!(api_url = api.api_url(), attempt, "ComfyUI is ready");
                        return true;
                    }
                    Err(e) if e.is_connect() => {
                        tracing::debug!(api_url = api.api_url(), attempt, "ComfyUI not listening yet");
                    }
                    Err(e) => {
                        tracing::warn!(
                            api_url = api.api_url(),
                            attempt,
                            error = %e,
                            "Readiness probe failed",
                        );
                    }
                }
            }
        }

        if attempt == config.max_attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    tracing::error!(
        api_url = api.api_url(),
        attempts = config.max_attempts,
        "ComfyUI did not become ready",
    );
    false
}
