//! Error type shared by the store, the export pipeline and the API layer.

/// Everything that can go wrong while building, storing or exporting a report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// A referenced report, node, project or template does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Missing field, unknown enum value, malformed payload, broken invariant
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Export format outside docx/pdf/markdown/txt
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Query against the SQLite store failed
    #[error("Storage error: {0}")]
    Storage(#[from] diesel::result::Error),

    /// Could not get a connection from the pool
    #[error("Connection error: {0}")]
    Pool(String),

    /// The content generator failed or returned garbage
    #[error("Generation failed: {0}")]
    Generation(String),

    /// A serializer could not produce its document
    #[error("Render failed: {0}")]
    Render(String),
}

impl ReportError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ReportError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ReportError::InvalidInput(msg.into())
    }

    /// The caller can fix the request and retry
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReportError::NotFound { .. }
                | ReportError::InvalidInput(_)
                | ReportError::UnsupportedFormat(_)
        )
    }

    /// HTTP status used by the API layer
    pub fn status_code(&self) -> u16 {
        match self {
            ReportError::NotFound { .. } => 404,
            ReportError::InvalidInput(_) | ReportError::UnsupportedFormat(_) => 400,
            ReportError::Storage(_) | ReportError::Pool(_) | ReportError::Generation(_) => 502,
            ReportError::Render(_) => 500,
        }
    }

    /// Message safe to hand back to a client. Upstream details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ReportError::Storage(_) | ReportError::Pool(_) => "Storage unavailable".to_string(),
            ReportError::Generation(_) => "Failed to generate content".to_string(),
            ReportError::Render(_) => "Failed to render document".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for ReportError {
    fn from(e: std::io::Error) -> Self {
        ReportError::Render(e.to_string())
    }
}

impl From<zip::result::ZipError> for ReportError {
    fn from(e: zip::result::ZipError) -> Self {
        ReportError::Render(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
