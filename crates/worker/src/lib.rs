//! `i2v-worker` library crate.
//!
//! Runs image-to-video jobs against a local ComfyUI instance. The
//! binary entrypoint lives in `main.rs`; modules are exported for
//! integration testing.

pub mod config;
pub mod error;
pub mod runner;
pub mod server;
