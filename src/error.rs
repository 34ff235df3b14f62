use thiserror::Error;

/// Top-level error for operations that cross module boundaries
/// (opening the store, loading configuration, channel snapshots).
///
/// Serializes as a plain string so run reports can embed it verbatim.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Database(String),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

/// Per-record failure raised while collecting a single video.
///
/// None of these abort a collection run; they are counted and itemized
/// in the run report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollectError {
    /// Network or upstream API failure for one record or sub-call.
    #[error("source error: {0}")]
    Source(String),

    /// The upstream payload could not be normalized (bad duration,
    /// missing field, non-numeric counter).
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// The store rejected the write; the record's transaction was rolled back.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl serde::Serialize for CollectError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

/// A show pattern whose expression failed to compile. The pattern is
/// disabled for the run; classification continues with the others.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize)]
#[error("pattern #{position} '{name}': invalid {field}: {message}")]
pub struct PatternError {
    pub position: usize,
    pub name: String,
    pub field: &'static str,
    pub message: String,
}

// ── From impls ─────────────────────────────────────────────────────────────

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
