//! Crate error type
//!
//! Setup paths (config, shaders, calibration decode, sockets) return these.
//! The per-frame path never does: it logs and skips instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed viewer calibration: {0}")]
    Calibration(String),

    #[error("shader program '{label}' failed to build: {message}")]
    Shader { label: &'static str, message: String },

    #[error("gpu error after {label}: 0x{code:04x}")]
    Gpu { label: String, code: u32 },

    #[error("platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, Error>;
