use thiserror::Error;

/// Single error enum for all engine operations.
///
/// Access denial is never an error: the access guard returns a structured
/// decision. Errors cover malformed input, missing or foreign-owned records,
/// rejected state transitions, and collaborator failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or disallowed input. Carries the offending field.
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Unknown id, or an id not owned by the claimed student.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Rejected state transition (re-response, double revoke).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display_names_field() {
        let err = EngineError::validation("requestedFields", "must not be empty");
        let msg = err.to_string();
        assert!(msg.contains("requestedFields"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_not_found_display() {
        let err = EngineError::not_found("service", "svc-9");
        assert_eq!(err.to_string(), "service not found: svc-9");
    }

    #[test]
    fn test_conflict_display() {
        let err = EngineError::Conflict("request already answered".into());
        assert!(err.to_string().contains("already answered"));
    }

    #[test]
    fn test_serde_error_converts() {
        let bad: Result<u32, _> = serde_json::from_str("not json");
        let err: EngineError = bad.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
