//! Topic-to-file data captures
//!
//! A capture subscribes to a topic through the bridge and appends every
//! sample to files under an allowed data directory.

use thiserror::Error;

pub mod capabilities;
pub mod capture;
pub mod path_guard;
pub mod router;
mod writer;

pub use capabilities::register_capture_capabilities;
pub use capture::{Capture, CaptureFormat};
pub use path_guard::AllowedPaths;
pub use router::CaptureRouter;

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Path '{path}' is not in allowed data paths: {allowed}")]
    PathNotAllowed { path: String, allowed: String },

    #[error("Path traversal not allowed.")]
    PathTraversal,

    #[error("Unknown format '{0}'. Use: json, csv, raw.")]
    UnknownFormat(String),

    #[error("Capture '{0}' not found.")]
    NotFound(String),

    #[error("bridge error: {0}")]
    Bridge(#[from] nodewarden_bridge::BridgeError),

    #[error("capture io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;
