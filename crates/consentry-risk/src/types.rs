use consentry_core::{DataField, RiskCategory};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RiskLevel — classification of an overall score
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

// ---------------------------------------------------------------------------
// RecommendedAction — monotone in RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedAction {
    Approve,
    Review,
    Deny,
}

// ---------------------------------------------------------------------------
// RiskFactor — one attributable contribution to the total
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactorCategory {
    FieldSensitivity,
    Duration,
    ServiceRisk,
    StudentRisk,
    PermissionCount,
}

impl fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactorCategory::FieldSensitivity => "FIELD_SENSITIVITY",
            FactorCategory::Duration => "DURATION",
            FactorCategory::ServiceRisk => "SERVICE_RISK",
            FactorCategory::StudentRisk => "STUDENT_RISK",
            FactorCategory::PermissionCount => "PERMISSION_COUNT",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub category: FactorCategory,
    /// Weighted contribution to the total score.
    pub contribution: f64,
    /// Normalized 0-100 sub-score before weighting.
    pub raw_score: f64,
    pub description: String,
}

// ---------------------------------------------------------------------------
// RiskAssessment — the full attributable result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Total score clamped to [0, 100].
    pub score: u8,
    pub level: RiskLevel,
    pub action: RecommendedAction,
    /// Ordered contributing factors; their contributions sum to the total
    /// before clamping.
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
}

// ---------------------------------------------------------------------------
// AssessmentInput — everything assess() may look at
// ---------------------------------------------------------------------------

/// Inputs to an assessment. The engine is a pure function of this value and
/// the configuration: no clock, no stores, no randomness.
#[derive(Debug, Clone)]
pub struct AssessmentInput<'a> {
    pub service_risk_category: RiskCategory,
    pub requested_fields: Vec<&'a str>,
    /// The known-field catalog; requested fields outside it take the
    /// configured default weight.
    pub catalog: &'a [DataField],
    pub purpose: &'a str,
    pub requested_duration_days: u32,
    /// Optional external signal, 0-100.
    pub student_risk: Option<u8>,
    /// Active grants the student already holds.
    pub existing_grant_count: u64,
}
