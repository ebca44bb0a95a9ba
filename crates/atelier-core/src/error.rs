use uuid::Uuid;

/// Failures raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// A compare-and-swap write lost against a concurrent writer.
    #[error("contract {contract_id} was modified concurrently (expected version {expected})")]
    VersionConflict { contract_id: Uuid, expected: i64 },

    /// A uniqueness rule rejected the write.
    #[error("{0}")]
    Duplicate(String),

    #[error("deletion request {0} is no longer pending")]
    AlreadyResolved(Uuid),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Errors surfaced by workflow operations.
///
/// Every variant maps onto one category of the portal's error taxonomy:
/// authorization (`Unauthenticated`, `Forbidden`), precondition, validation,
/// conflict, and backing-store failures.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Precondition(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("operation failed")]
    Store(#[source] StoreError),
}

impl WorkflowError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("record"),
            StoreError::VersionConflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Duplicate(message) => Self::Conflict(message),
            StoreError::AlreadyResolved(_) => Self::Precondition(err.to_string()),
            StoreError::Backend(_) => Self::Store(err),
        }
    }
}

/// A stored or submitted label did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
