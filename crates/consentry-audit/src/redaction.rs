//! Metadata redaction before audit entries leave the process.
//!
//! Redaction is keyed on field names: any metadata key whose name contains a
//! sensitive term (case-insensitive) has its value replaced wholesale with
//! the redaction marker. Values are never inspected, only keys; a password
//! that a caller stuffs under an innocuous key is the caller's bug.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

fn default_terms() -> Vec<String> {
    ["password", "token", "secret", "ssn", "credential"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// The set of sensitive terms to match against metadata keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionPolicy {
    #[serde(default = "default_terms")]
    terms: Vec<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            terms: default_terms(),
        }
    }
}

impl RedactionPolicy {
    /// Extends the default term set; duplicates are harmless.
    pub fn with_extra_terms<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut terms = default_terms();
        terms.extend(extra.into_iter().map(|s| s.into().to_lowercase()));
        Self { terms }
    }

    pub fn is_sensitive_key(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.terms.iter().any(|term| key.contains(term.as_str()))
    }

    /// Walk a metadata value, replacing every object entry under a sensitive
    /// key with the marker. Arrays and nested objects are recursed into.
    pub fn redact(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, entry) in map.iter_mut() {
                    if self.is_sensitive_key(key) {
                        *entry = Value::String(REDACTED.to_string());
                    } else {
                        self.redact(entry);
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.redact(item);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_terms_match_case_insensitively() {
        let policy = RedactionPolicy::default();
        assert!(policy.is_sensitive_key("password"));
        assert!(policy.is_sensitive_key("API_TOKEN"));
        assert!(policy.is_sensitive_key("clientSecret"));
        assert!(policy.is_sensitive_key("ssn_last4"));
        assert!(!policy.is_sensitive_key("purpose"));
    }

    #[test]
    fn test_redacts_top_level_keys() {
        let policy = RedactionPolicy::default();
        let mut value = json!({ "purpose": "advising", "access_token": "abc123" });
        policy.redact(&mut value);
        assert_eq!(value["purpose"], "advising");
        assert_eq!(value["access_token"], REDACTED);
    }

    #[test]
    fn test_redacts_nested_objects_and_arrays() {
        let policy = RedactionPolicy::default();
        let mut value = json!({
            "context": { "ssn": "123-45-6789", "note": "ok" },
            "attempts": [ { "password": "hunter2" }, { "count": 3 } ]
        });
        policy.redact(&mut value);
        assert_eq!(value["context"]["ssn"], REDACTED);
        assert_eq!(value["context"]["note"], "ok");
        assert_eq!(value["attempts"][0]["password"], REDACTED);
        assert_eq!(value["attempts"][1]["count"], 3);
    }

    #[test]
    fn test_sensitive_key_replaces_entire_subtree() {
        let policy = RedactionPolicy::default();
        let mut value = json!({ "credentials": { "user": "a", "pass": "b" } });
        policy.redact(&mut value);
        assert_eq!(value["credentials"], REDACTED);
    }

    #[test]
    fn test_extra_terms_extend_defaults() {
        let policy = RedactionPolicy::with_extra_terms(["dob"]);
        assert!(policy.is_sensitive_key("student_dob"));
        assert!(policy.is_sensitive_key("password"));
    }

    #[test]
    fn test_scalars_pass_through() {
        let policy = RedactionPolicy::default();
        let mut value = json!("a bare string mentioning password");
        policy.redact(&mut value);
        // Only keys are matched; bare values are left alone.
        assert_eq!(value, "a bare string mentioning password");
    }
}
