//! Error types for spatial view state management.

use thiserror::Error;

/// Errors surfaced by the spatial view layer.
#[derive(Error, Debug)]
pub enum SpatialError {
    /// Malformed query arguments. Raised before any index is touched.
    #[error("query parse error: {0}")]
    QueryParse(String),

    /// The requested view is not defined in the resolved group.
    #[error("view not found: `{view}` in `{group}`")]
    ViewNotFound { group: String, view: String },

    /// The index could not be brought up to date.
    #[error("index build failed: {0}")]
    IndexBuild(String),

    /// The design document body could not be compiled.
    #[error("invalid design document: {0}")]
    InvalidDesignDoc(String),

    /// A persisted header is corrupt or does not match its definition.
    #[error("invalid index format: {0}")]
    InvalidFormat(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpatialError {
    pub(crate) fn query_parse(msg: &str) -> Self {
        Self::QueryParse(msg.to_string())
    }
}

/// Result type for spatial view operations.
pub type Result<T> = std::result::Result<T, SpatialError>;
