use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use consentry_risk::RiskConfig;

use crate::error::{RootError, RootResult};

/// Configuration for the audit emitter subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Seconds between periodic buffer flushes.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Buffered entries before an unconditional flush.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Redaction terms added on top of the built-in set.
    #[serde(default)]
    pub redaction_terms: Vec<String>,
}

fn default_flush_interval() -> u64 {
    10
}

fn default_buffer_capacity() -> usize {
    64
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            buffer_capacity: default_buffer_capacity(),
            redaction_terms: Vec::new(),
        }
    }
}

/// Top-level configuration for the consentry binary.
///
/// Loaded from a TOML file (typically `~/.consentry/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Cap on distinct fields per consent request.
    #[serde(default = "default_max_requested_fields")]
    pub max_requested_fields: usize,

    /// Cap on requested/approved grant durations, in days.
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,

    /// Risk scoring weights and thresholds.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Audit emitter configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_db_path() -> PathBuf {
    dirs_or_default(".consentry/consentry.db")
}

fn default_max_requested_fields() -> usize {
    25
}

fn default_max_duration_days() -> u32 {
    365
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_requested_fields: default_max_requested_fields(),
            max_duration_days: default_max_duration_days(),
            risk: RiskConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        if self.max_requested_fields == 0 {
            return Err(RootError::Config("max_requested_fields must be > 0".into()));
        }
        if self.max_duration_days == 0 {
            return Err(RootError::Config("max_duration_days must be > 0".into()));
        }
        if self.audit.flush_interval_secs == 0 {
            return Err(RootError::Config("flush_interval_secs must be > 0".into()));
        }
        if self.audit.buffer_capacity == 0 {
            return Err(RootError::Config("buffer_capacity must be > 0".into()));
        }
        self.risk
            .validate()
            .map_err(|e| RootError::Config(e.to_string()))?;
        Ok(())
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".consentry/config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.db_path.to_str().unwrap().contains(".consentry"));
        assert_eq!(config.max_requested_fields, 25);
        assert_eq!(config.max_duration_days, 365);
        assert_eq!(config.audit.flush_interval_secs, 10);
        assert_eq!(config.audit.buffer_capacity, 64);
        assert!(config.audit.redaction_terms.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
db_path = "/tmp/test-consentry.db"
max_requested_fields = 10

[risk.thresholds]
medium = 30

[audit]
flush_interval_secs = 5
redaction_terms = ["dob"]
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/test-consentry.db"));
        assert_eq!(config.max_requested_fields, 10);
        assert_eq!(config.max_duration_days, 365);
        assert_eq!(config.risk.thresholds.medium, 30);
        assert_eq!(config.risk.thresholds.high, 50);
        assert_eq!(config.audit.flush_interval_secs, 5);
        assert_eq!(config.audit.redaction_terms, vec!["dob".to_string()]);
    }

    #[test]
    fn test_config_validate_zero_caps() {
        let mut config = EngineConfig::default();
        config.max_requested_fields = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.max_duration_days = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.audit.flush_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_bad_risk() {
        let mut config = EngineConfig::default();
        config.risk.thresholds.medium = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = EngineConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.max_requested_fields, 25);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = std::env::temp_dir().join("consentry-test-config");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.toml");

        let mut config = EngineConfig::default();
        config.db_path = PathBuf::from("/tmp/consentry-test.db");
        config.max_requested_fields = 12;

        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();

        assert_eq!(loaded.db_path, PathBuf::from("/tmp/consentry-test.db"));
        assert_eq!(loaded.max_requested_fields, 12);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
