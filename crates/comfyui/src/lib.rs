//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper, a startup readiness probe, base64
//! image upload, and a cancellable completion poller driven by a pure
//! history evaluator.

pub mod api;
pub mod history;
pub mod poller;
pub mod readiness;
pub mod upload;
