//! # streamview
//!
//! RTMP stream viewer. Listens for streaming software on the RTMP port,
//! shows the URL to push to, and reports the received stream's status,
//! resolution, bitrate and frame rate.
//!
//! - **config**: TOML configuration with defaults for every field
//! - **sink**: terminal frame sink fed by the capture event bus
//! - **service**: starts and stops the listener, worker and sink together

pub mod config;
pub mod service;
pub mod sink;
