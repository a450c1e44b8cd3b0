//! Shared helpers for worker integration tests.
//!
//! [`MockEngine`] is an in-process stand-in for ComfyUI serving the
//! endpoints a job touches. It records every request so tests can
//! assert on what the worker sent.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Multipart, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};

use i2v_worker::config::WorkerConfig;

/// First bytes of a PNG file; enough for an upload payload.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x02\0\0\0";

/// Bytes the mock engine serves from `/view`.
pub const VIDEO_BYTES: &[u8] = b"\0\0\0\x18ftypmp42fake-video-payload";

pub fn png_base64() -> String {
    STANDARD.encode(PNG_BYTES)
}

/// How the mock engine responds.
#[derive(Debug, Clone)]
pub struct EngineBehavior {
    pub upload_status: StatusCode,
    pub prompt_status: StatusCode,
    /// Replaces the `/prompt` answer when set.
    pub prompt_body: Option<Value>,
    pub view_status: StatusCode,
    pub prompt_id: String,
    /// History polls answered with `{}` before the entry appears.
    pub running_polls: usize,
    /// History record once the prompt finishes; `None` never finishes.
    pub history_entry: Option<Value>,
}

impl Default for EngineBehavior {
    fn default() -> Self {
        Self {
            upload_status: StatusCode::OK,
            prompt_status: StatusCode::OK,
            prompt_body: None,
            view_status: StatusCode::OK,
            prompt_id: "abc".into(),
            running_polls: 2,
            history_entry: Some(success_entry("out.mp4")),
        }
    }
}

/// A multipart upload as the engine received it.
#[derive(Debug, Clone, Default)]
pub struct UploadRecord {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub overwrite: Option<String>,
}

#[derive(Default)]
pub struct EngineState {
    pub behavior: EngineBehavior,
    pub requests: AtomicUsize,
    pub history_polls: AtomicUsize,
    pub uploads: Mutex<Vec<UploadRecord>>,
    pub submitted: Mutex<Option<Value>>,
    pub views: Mutex<Vec<HashMap<String, String>>>,
    pub queue_requests: Mutex<Vec<Value>>,
}

pub struct MockEngine {
    pub url: String,
    pub state: Arc<EngineState>,
}

impl MockEngine {
    pub async fn start(behavior: EngineBehavior) -> Self {
        let state = Arc::new(EngineState {
            behavior,
            ..Default::default()
        });

        let app = Router::new()
            .route("/", get(|| async { "ComfyUI" }))
            .route("/upload/image", post(upload_image))
            .route("/prompt", post(queue_prompt))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/queue", post(queue))
            .fallback(|| async { StatusCode::NOT_FOUND })
            .layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                count_requests,
            ))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    pub fn history_polls(&self) -> usize {
        self.state.history_polls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.uploads.lock().unwrap().clone()
    }

    /// The `prompt` graph of the last `/prompt` submission.
    pub fn submitted_graph(&self) -> Option<Value> {
        self.state
            .submitted
            .lock()
            .unwrap()
            .as_ref()
            .map(|body| body["prompt"].clone())
    }

    pub fn submitted_body(&self) -> Option<Value> {
        self.state.submitted.lock().unwrap().clone()
    }

    pub fn views(&self) -> Vec<HashMap<String, String>> {
        self.state.views.lock().unwrap().clone()
    }

    pub fn queue_requests(&self) -> Vec<Value> {
        self.state.queue_requests.lock().unwrap().clone()
    }
}

/// A finished history record with one video under node 21.
pub fn success_entry(filename: &str) -> Value {
    json!({
        "prompt": [0, "abc", {}, {}, ["21"]],
        "status": {"status_str": "success", "completed": true, "messages": []},
        "outputs": {
            "21": {
                "gifs": [{
                    "filename": filename,
                    "subfolder": "",
                    "type": "output",
                    "format": "video/h264-mp4",
                    "frame_rate": 16.0
                }]
            }
        }
    })
}

/// Worker configuration pointed at `engine_url` with fast cadences and
/// the bundled workflow template.
pub fn worker_config(engine_url: &str) -> WorkerConfig {
    WorkerConfig {
        comfy_url: engine_url.to_string(),
        workflow_path: template_path(),
        startup_timeout_secs: 5,
        generation_timeout_secs: 5,
        readiness_interval_ms: 10,
        poll_interval_ms: 20,
        request_timeout_secs: 5,
        ..WorkerConfig::default()
    }
}

pub fn template_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../workflow/workflow_api.json")
}

/// A URL nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---- mock handlers ----

async fn count_requests(State(state): State<Arc<EngineState>>, req: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    next.run(req).await
}

async fn upload_image(State(state): State<Arc<EngineState>>, mut multipart: Multipart) -> Response {
    let mut record = UploadRecord::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().map(str::to_string).as_deref() {
            Some("image") => {
                record.filename = field.file_name().map(str::to_string);
                record.content_type = field.content_type().map(str::to_string);
                record.bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            }
            Some("overwrite") => {
                record.overwrite = field.text().await.ok();
            }
            _ => {}
        }
    }

    let name = record.filename.clone().unwrap_or_default();
    state.uploads.lock().unwrap().push(record);

    if state.behavior.upload_status != StatusCode::OK {
        return (state.behavior.upload_status, "upload rejected").into_response();
    }
    Json(json!({"name": name, "subfolder": "", "type": "input"})).into_response()
}

async fn queue_prompt(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> Response {
    *state.submitted.lock().unwrap() = Some(body);

    if state.behavior.prompt_status != StatusCode::OK {
        return (state.behavior.prompt_status, "bad graph").into_response();
    }
    let answer = state.behavior.prompt_body.clone().unwrap_or_else(|| {
        json!({
            "prompt_id": state.behavior.prompt_id,
            "number": 0,
            "node_errors": {}
        })
    });
    Json(answer).into_response()
}

async fn history(State(state): State<Arc<EngineState>>, Path(prompt_id): Path<String>) -> Json<Value> {
    let polls = state.history_polls.fetch_add(1, Ordering::SeqCst) + 1;
    match &state.behavior.history_entry {
        Some(entry) if polls > state.behavior.running_polls => {
            let mut history = serde_json::Map::new();
            history.insert(prompt_id, entry.clone());
            Json(Value::Object(history))
        }
        _ => Json(json!({})),
    }
}

async fn view(
    State(state): State<Arc<EngineState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.views.lock().unwrap().push(params);

    if state.behavior.view_status != StatusCode::OK {
        return (state.behavior.view_status, "gone").into_response();
    }
    VIDEO_BYTES.to_vec().into_response()
}

async fn queue(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> StatusCode {
    state.queue_requests.lock().unwrap().push(body);
    StatusCode::OK
}
