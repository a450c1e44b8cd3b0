use std::path::PathBuf;
use std::time::Duration;

use i2v_comfyui::history::OutputTarget;
use i2v_comfyui::poller::PollConfig;
use i2v_comfyui::readiness::ReadinessConfig;
use i2v_core::routing::{NODE_VIDEO_COMBINE, VIDEO_OUTPUT_KEY};

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults matching the container image layout
/// (ComfyUI on loopback, workflow baked in at `/workflow_api.json`).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Base URL of the ComfyUI instance.
    pub comfy_url: String,
    /// Workflow template in ComfyUI API format, loaded for every job.
    pub workflow_path: PathBuf,
    /// Name the input image is uploaded under.
    pub upload_filename: String,
    /// Node whose output holds the video.
    pub output_node_id: String,
    /// Output slot on that node.
    pub output_key: String,
    /// How long to wait for ComfyUI to come up, in seconds.
    pub startup_timeout_secs: u64,
    /// How long a single generation may take, in seconds.
    pub generation_timeout_secs: u64,
    /// Delay between readiness probes, in milliseconds.
    pub readiness_interval_ms: u64,
    /// Delay between history polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Timeout for any single HTTP call to ComfyUI, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            comfy_url: "http://127.0.0.1:8188".into(),
            workflow_path: PathBuf::from("/workflow_api.json"),
            upload_filename: "input.png".into(),
            output_node_id: NODE_VIDEO_COMBINE.into(),
            output_key: VIDEO_OUTPUT_KEY.into(),
            startup_timeout_secs: 120,
            generation_timeout_secs: 3600,
            readiness_interval_ms: 1000,
            poll_interval_ms: 2000,
            request_timeout_secs: 60,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `HOST`                    | `0.0.0.0`                |
    /// | `PORT`                    | `8000`                   |
    /// | `COMFY_URL`               | `http://127.0.0.1:8188`  |
    /// | `WORKFLOW_PATH`           | `/workflow_api.json`     |
    /// | `UPLOAD_FILENAME`         | `input.png`              |
    /// | `OUTPUT_NODE_ID`          | `21`                     |
    /// | `OUTPUT_KEY`              | `gifs`                   |
    /// | `STARTUP_TIMEOUT_SECS`    | `120`                    |
    /// | `GENERATION_TIMEOUT_SECS` | `3600`                   |
    /// | `READINESS_INTERVAL_MS`   | `1000`                   |
    /// | `POLL_INTERVAL_MS`        | `2000`                   |
    /// | `REQUEST_TIMEOUT_SECS`    | `60`                     |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: env_or("HOST", defaults.host),
            port: parse_env("PORT", defaults.port),
            comfy_url: env_or("COMFY_URL", defaults.comfy_url),
            workflow_path: std::env::var("WORKFLOW_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.workflow_path),
            upload_filename: env_or("UPLOAD_FILENAME", defaults.upload_filename),
            output_node_id: env_or("OUTPUT_NODE_ID", defaults.output_node_id),
            output_key: env_or("OUTPUT_KEY", defaults.output_key),
            startup_timeout_secs: parse_env("STARTUP_TIMEOUT_SECS", defaults.startup_timeout_secs),
            generation_timeout_secs: parse_env(
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            ),
            readiness_interval_ms: parse_env(
                "READINESS_INTERVAL_MS",
                defaults.readiness_interval_ms,
            ),
            poll_interval_ms: parse_env("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
        }
    }

    /// Readiness probing: one probe per interval, one attempt per
    /// second of startup budget.
    pub fn readiness(&self) -> ReadinessConfig {
        ReadinessConfig {
            interval: Duration::from_millis(self.readiness_interval_ms),
            max_attempts: u32::try_from(self.startup_timeout_secs).unwrap_or(u32::MAX),
            ..ReadinessConfig::default()
        }
    }

    pub fn polling(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_secs(self.generation_timeout_secs),
        }
    }

    pub fn output_target(&self) -> OutputTarget {
        OutputTarget {
            node_id: self.output_node_id.clone(),
            output_key: self.output_key.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
