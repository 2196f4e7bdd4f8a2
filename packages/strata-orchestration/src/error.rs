use strata_storage::{AttributeId, ModelId, ObjectId, StorageError};
use thiserror::Error;

use crate::compensation::PartialFailureReport;
use crate::config::ConfigError;
use crate::reconciler::schema::SchemaError;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model not found: {0}")]
    ModelNotFound(ModelId),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Object '{name}' not found in model {model_id}")]
    ObjectNameNotFound { model_id: ModelId, name: String },

    #[error("Attribute not found: {0}")]
    AttributeNotFound(AttributeId),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generated response failed validation: {0}")]
    Schema(#[from] SchemaError),

    #[error("Generator error: {0}")]
    Generator(String),

    #[error("Cascade failed during {step}: {source} [{report}]")]
    PartialCascade {
        step: String,
        #[source]
        source: Box<SyncError>,
        report: PartialFailureReport,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn invalid_request<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidRequest(e.to_string())
    }

    pub fn generator<E: std::fmt::Display>(e: E) -> Self {
        Self::Generator(e.to_string())
    }

    /// Classify for callers deciding between repair, retry and user feedback
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Storage(e) if e.is_not_found() => ErrorCategory::NotFound,
            SyncError::ModelNotFound(_)
            | SyncError::ObjectNotFound(_)
            | SyncError::ObjectNameNotFound { .. }
            | SyncError::AttributeNotFound(_) => ErrorCategory::NotFound,
            SyncError::InvalidRequest(_) | SyncError::Schema(_) | SyncError::Config(_) => {
                ErrorCategory::Validation
            }
            SyncError::PartialCascade { .. } => ErrorCategory::PartialCascade,
            SyncError::Storage(_) | SyncError::Generator(_) | SyncError::Other(_) => {
                ErrorCategory::Infrastructure
            }
        }
    }
}

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Model, object or attribute absent - never retried
    NotFound,
    /// Bad request or generated output failing the schema - hard failure
    Validation,
    /// Later step failed after earlier writes - family needs repair
    PartialCascade,
    /// Storage backend or generator failure
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Validation => "validation",
            ErrorCategory::PartialCascade => "partial_cascade",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "not_found" => Ok(ErrorCategory::NotFound),
            "validation" => Ok(ErrorCategory::Validation),
            "partial_cascade" => Ok(ErrorCategory::PartialCascade),
            "infrastructure" => Ok(ErrorCategory::Infrastructure),
            _ => Err(SyncError::invalid_request(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
