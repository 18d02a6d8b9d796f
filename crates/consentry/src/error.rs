use thiserror::Error;

/// Error type for the consentry root binary, aggregating errors from the
/// workspace crates plus configuration and IO failures local to the binary.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("engine error: {0}")]
    Engine(#[from] consentry_core::EngineError),

    #[error("risk error: {0}")]
    Risk(#[from] consentry_risk::RiskError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_error_display() {
        let err = RootError::Config("missing db_path".into());
        assert_eq!(err.to_string(), "configuration error: missing db_path");
    }

    #[test]
    fn test_root_error_from_engine() {
        let engine_err = consentry_core::EngineError::Conflict("already answered".into());
        let root_err: RootError = engine_err.into();
        assert!(root_err.to_string().contains("already answered"));
    }

    #[test]
    fn test_root_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let root_err: RootError = json_err.into();
        assert!(matches!(root_err, RootError::Serialization(_)));
    }

    #[test]
    fn test_root_error_from_toml() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let root_err: RootError = toml_err.into();
        assert!(matches!(root_err, RootError::Config(_)));
    }
}
