use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MirrorError {
    #[error(
        "Document version {version} of '{type_name}' is outside the known range [{oldest}, {current}]"
    )]
    UnknownDocumentVersion {
        type_name: String,
        version: i64,
        oldest: u32,
        current: u32,
    },

    #[error("Duplicate key {id} in collection '{collection}'")]
    DuplicateDocumentKey { collection: String, id: String },

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Transient failure during {operation}: {message}")]
    TransientWrite { operation: String, message: String },

    #[error("Write failure during {operation}: {message}")]
    WriteFailed { operation: String, message: String },

    #[error("Invalid patch chain: {0}")]
    InvalidPatchChain(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Mirrored type '{0}' is not registered")]
    UnknownMirroredType(String),

    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MirrorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::WorkerFailed(err.to_string())
    }
}
