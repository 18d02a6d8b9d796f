use serde::{Deserialize, Serialize};

use crate::error::{RiskError, RiskResult};

/// Relative weights for each factor. Contributions are `raw * weight`, so
/// weights summing to 1.0 keep the pre-clamp total on the 0-100 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorWeights {
    #[serde(default = "default_field_sensitivity_weight")]
    pub field_sensitivity: f64,
    #[serde(default = "default_duration_weight")]
    pub duration: f64,
    #[serde(default = "default_service_risk_weight")]
    pub service_risk: f64,
    #[serde(default = "default_permission_count_weight")]
    pub permission_count: f64,
    #[serde(default = "default_student_risk_weight")]
    pub student_risk: f64,
}

fn default_field_sensitivity_weight() -> f64 {
    0.35
}

fn default_duration_weight() -> f64 {
    0.15
}

fn default_service_risk_weight() -> f64 {
    0.25
}

fn default_permission_count_weight() -> f64 {
    0.10
}

fn default_student_risk_weight() -> f64 {
    0.15
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            field_sensitivity: default_field_sensitivity_weight(),
            duration: default_duration_weight(),
            service_risk: default_service_risk_weight(),
            permission_count: default_permission_count_weight(),
            student_risk: default_student_risk_weight(),
        }
    }
}

/// Score cut-points partitioning [0, 100] into levels:
/// `score < medium` is Low, `< high` is Medium, `< critical` is High,
/// everything else Critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelThresholds {
    #[serde(default = "default_medium_threshold")]
    pub medium: u8,
    #[serde(default = "default_high_threshold")]
    pub high: u8,
    #[serde(default = "default_critical_threshold")]
    pub critical: u8,
}

fn default_medium_threshold() -> u8 {
    25
}

fn default_high_threshold() -> u8 {
    50
}

fn default_critical_threshold() -> u8 {
    75
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            medium: default_medium_threshold(),
            high: default_high_threshold(),
            critical: default_critical_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub weights: FactorWeights,
    #[serde(default)]
    pub thresholds: LevelThresholds,
    /// Sensitivity assumed for requested fields absent from the catalog.
    #[serde(default = "default_unknown_field_weight")]
    pub default_field_weight: u8,
    /// Raw-score points added per existing active grant, saturating at 100.
    #[serde(default = "default_permission_step")]
    pub permission_step: u8,
    /// Duration ceiling against which requested durations are normalized.
    #[serde(default = "default_duration_ceiling_days")]
    pub duration_ceiling_days: u32,
}

fn default_unknown_field_weight() -> u8 {
    50
}

fn default_permission_step() -> u8 {
    15
}

fn default_duration_ceiling_days() -> u32 {
    365
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: LevelThresholds::default(),
            default_field_weight: default_unknown_field_weight(),
            permission_step: default_permission_step(),
            duration_ceiling_days: default_duration_ceiling_days(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> RiskResult<()> {
        let w = &self.weights;
        let all = [
            w.field_sensitivity,
            w.duration,
            w.service_risk,
            w.permission_count,
            w.student_risk,
        ];
        if all.iter().any(|v| *v < 0.0 || !v.is_finite()) {
            return Err(RiskError::InvalidConfig(
                "weights must be finite and non-negative".to_string(),
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(RiskError::InvalidConfig(
                "at least one weight must be positive".to_string(),
            ));
        }
        let t = &self.thresholds;
        if !(t.medium < t.high && t.high < t.critical && t.critical <= 100) {
            return Err(RiskError::InvalidConfig(format!(
                "thresholds must be strictly ascending and <= 100, got {}/{}/{}",
                t.medium, t.high, t.critical
            )));
        }
        if self.duration_ceiling_days == 0 {
            return Err(RiskError::InvalidConfig(
                "duration ceiling must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
