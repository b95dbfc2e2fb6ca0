use std::fmt;

use serde_json::{json, Value};

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    ScenariosEmpty(String),
    DuplicateScenario(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::ScenariosEmpty(e) => write!(f, "Scenario configuration error: {}", e),
            ConfigError::DuplicateScenario(e) => write!(f, "Duplicate scenario id: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    MigrationFailed(String),
    WriteFailed(String),
    ReadFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::MigrationFailed(e) => write!(f, "Storage migration failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Broad failure classes a caller can branch on.
///
/// Every [`SessionError`] belongs to exactly one kind; the finer-grained
/// [`SessionError::code`] identifies the precise condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    AllocationFailure,
    NoScenarioAvailable,
    ValidationMismatch,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::AllocationFailure => "allocation_failure",
            ErrorKind::NoScenarioAvailable => "no_scenario_available",
            ErrorKind::ValidationMismatch => "validation_mismatch",
            ErrorKind::Storage => "storage",
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    NotFound,
    AlreadyCompleted,
    InsufficientImages {
        category: String,
        needed: usize,
        available: usize,
    },
    NoScenarioAvailable,
    UnknownScenario(String),
    ScenarioDisabled(String),
    InvalidTargetCount {
        requested: usize,
        categories: usize,
    },
    DuplicateImageIds(Vec<String>),
    UnassignedImageIds(Vec<String>),
    MissingAssignedImageIds(Vec<String>),
    SessionIdMismatch {
        expected: String,
        submitted: String,
    },
    ContextMismatch {
        expected: Option<String>,
        submitted: String,
    },
    StatementOrderMismatch {
        expected: u8,
        submitted: u8,
    },
    StorageError(StorageError),
}

impl SessionError {
    /// Stable, machine-readable identifier of the condition.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound => "session_not_found",
            SessionError::AlreadyCompleted => "already_completed",
            SessionError::InsufficientImages { .. } => "insufficient_images",
            SessionError::NoScenarioAvailable => "no_scenario_available",
            SessionError::UnknownScenario(_) => "unknown_scenario",
            SessionError::ScenarioDisabled(_) => "scenario_disabled",
            SessionError::InvalidTargetCount { .. } => "invalid_target_count",
            SessionError::DuplicateImageIds(_) => "duplicate_image_ids",
            SessionError::UnassignedImageIds(_) => "unassigned_image_ids",
            SessionError::MissingAssignedImageIds(_) => "missing_assigned_image_ids",
            SessionError::SessionIdMismatch { .. } => "session_id_mismatch",
            SessionError::ContextMismatch { .. } => "context_mismatch",
            SessionError::StatementOrderMismatch { .. } => "statement_order_mismatch",
            SessionError::StorageError(_) => "storage_error",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound => ErrorKind::NotFound,
            SessionError::AlreadyCompleted => ErrorKind::InvalidState,
            SessionError::InsufficientImages { .. } => ErrorKind::AllocationFailure,
            SessionError::NoScenarioAvailable => ErrorKind::NoScenarioAvailable,
            SessionError::UnknownScenario(_)
            | SessionError::ScenarioDisabled(_)
            | SessionError::InvalidTargetCount { .. }
            | SessionError::DuplicateImageIds(_)
            | SessionError::UnassignedImageIds(_)
            | SessionError::MissingAssignedImageIds(_)
            | SessionError::SessionIdMismatch { .. }
            | SessionError::ContextMismatch { .. }
            | SessionError::StatementOrderMismatch { .. } => ErrorKind::ValidationMismatch,
            SessionError::StorageError(_) => ErrorKind::Storage,
        }
    }

    /// Structured detail for callers deciding whether to retry with other parameters.
    pub fn details(&self) -> Value {
        match self {
            SessionError::InsufficientImages {
                category,
                needed,
                available,
            } => json!({ "category": category, "needed": needed, "available": available }),
            SessionError::UnknownScenario(id) | SessionError::ScenarioDisabled(id) => {
                json!({ "context": id })
            }
            SessionError::InvalidTargetCount {
                requested,
                categories,
            } => json!({ "requested": requested, "categories": categories }),
            SessionError::DuplicateImageIds(ids)
            | SessionError::UnassignedImageIds(ids)
            | SessionError::MissingAssignedImageIds(ids) => json!({ "image_ids": ids }),
            SessionError::SessionIdMismatch {
                expected,
                submitted,
            } => json!({ "url": expected, "body": submitted }),
            SessionError::ContextMismatch {
                expected,
                submitted,
            } => json!({ "expected": expected, "submitted": submitted }),
            SessionError::StatementOrderMismatch {
                expected,
                submitted,
            } => json!({ "expected": expected, "submitted": submitted }),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "Session not found"),
            SessionError::AlreadyCompleted => write!(f, "Session already completed"),
            SessionError::InsufficientImages {
                category,
                needed,
                available,
            } => write!(
                f,
                "Not enough images in category {}: needed {}, available {}",
                category, needed, available
            ),
            SessionError::NoScenarioAvailable => write!(f, "No enabled contexts available"),
            SessionError::UnknownScenario(id) => write!(f, "Unknown context id: {}", id),
            SessionError::ScenarioDisabled(id) => write!(f, "Context is disabled: {}", id),
            SessionError::InvalidTargetCount {
                requested,
                categories,
            } => write!(
                f,
                "Image count {} is not a positive multiple of {} categories",
                requested, categories
            ),
            SessionError::DuplicateImageIds(ids) => {
                write!(f, "Duplicate image ids: {}", ids.join(", "))
            }
            SessionError::UnassignedImageIds(ids) => {
                write!(f, "Image ids not assigned to this session: {}", ids.join(", "))
            }
            SessionError::MissingAssignedImageIds(ids) => {
                write!(f, "Assigned image ids missing: {}", ids.join(", "))
            }
            SessionError::SessionIdMismatch {
                expected,
                submitted,
            } => write!(f, "session_id mismatch: url {}, body {}", expected, submitted),
            SessionError::ContextMismatch {
                expected,
                submitted,
            } => write!(
                f,
                "context mismatch: session {}, body {}",
                expected.as_deref().unwrap_or("<none>"),
                submitted
            ),
            SessionError::StatementOrderMismatch {
                expected,
                submitted,
            } => write!(
                f,
                "statement_order mismatch: session {}, body {}",
                expected, submitted
            ),
            SessionError::StorageError(e) => write!(f, "Storage error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        SessionError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum CatalogError {
    MissingCategoryFolder(String),
    IoError(std::io::Error),
    StorageError(StorageError),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::MissingCategoryFolder(dir) => {
                write!(f, "Missing category folder: {}", dir)
            }
            CatalogError::IoError(e) => write!(f, "Catalog IO error: {}", e),
            CatalogError::StorageError(e) => write!(f, "Catalog storage error: {}", e),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::IoError(err)
    }
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        CatalogError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}
