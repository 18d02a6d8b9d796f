//! Pure risk assessment: a deterministic function of the input and config.
//!
//! Every factor records its weighted contribution, so the total is fully
//! attributable and reproducible for audit.

use consentry_core::{DataField, RiskCategory};

use crate::config::RiskConfig;
use crate::types::{
    AssessmentInput, FactorCategory, RecommendedAction, RiskAssessment, RiskFactor, RiskLevel,
};

/// Raw service-risk scores per category.
fn service_risk_score(category: RiskCategory) -> f64 {
    match category {
        RiskCategory::Low => 10.0,
        RiskCategory::Medium => 40.0,
        RiskCategory::High => 70.0,
        RiskCategory::Critical => 95.0,
    }
}

/// Mean sensitivity of the requested fields. Unknown fields take the
/// configured default weight.
fn field_sensitivity_score(fields: &[&str], catalog: &[DataField], default_weight: u8) -> f64 {
    if fields.is_empty() {
        return 0.0;
    }
    let sum: f64 = fields
        .iter()
        .map(|name| {
            catalog
                .iter()
                .find(|f| f.name == *name)
                .map(|f| f64::from(f.sensitivity))
                .unwrap_or(f64::from(default_weight))
        })
        .sum();
    (sum / fields.len() as f64).min(100.0)
}

/// Linear in requested duration relative to the ceiling, capped at 100.
fn duration_score(days: u32, ceiling_days: u32) -> f64 {
    (f64::from(days) / f64::from(ceiling_days) * 100.0).min(100.0)
}

/// Saturating ramp: each existing active grant adds `step` points.
fn permission_count_score(count: u64, step: u8) -> f64 {
    (count as f64 * f64::from(step)).min(100.0)
}

fn level_for(score: u8, config: &RiskConfig) -> RiskLevel {
    let t = &config.thresholds;
    if score < t.medium {
        RiskLevel::Low
    } else if score < t.high {
        RiskLevel::Medium
    } else if score < t.critical {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

fn action_for(level: RiskLevel) -> RecommendedAction {
    match level {
        RiskLevel::Low => RecommendedAction::Approve,
        RiskLevel::Medium | RiskLevel::High => RecommendedAction::Review,
        RiskLevel::Critical => RecommendedAction::Deny,
    }
}

/// Assess a pending consent request. Pure: no clock, no stores, no RNG.
pub fn assess(input: &AssessmentInput<'_>, config: &RiskConfig) -> RiskAssessment {
    let weights = &config.weights;
    let mut factors = Vec::with_capacity(5);

    let field_raw = field_sensitivity_score(
        &input.requested_fields,
        input.catalog,
        config.default_field_weight,
    );
    factors.push(RiskFactor {
        category: FactorCategory::FieldSensitivity,
        raw_score: field_raw,
        contribution: field_raw * weights.field_sensitivity,
        description: format!(
            "{} requested field(s), mean sensitivity {:.0}",
            input.requested_fields.len(),
            field_raw
        ),
    });

    let duration_raw = duration_score(input.requested_duration_days, config.duration_ceiling_days);
    factors.push(RiskFactor {
        category: FactorCategory::Duration,
        raw_score: duration_raw,
        contribution: duration_raw * weights.duration,
        description: format!(
            "{} of {} day ceiling",
            input.requested_duration_days, config.duration_ceiling_days
        ),
    });

    let service_raw = service_risk_score(input.service_risk_category);
    factors.push(RiskFactor {
        category: FactorCategory::ServiceRisk,
        raw_score: service_raw,
        contribution: service_raw * weights.service_risk,
        description: format!("service risk category {}", input.service_risk_category),
    });

    let permission_raw = permission_count_score(input.existing_grant_count, config.permission_step);
    factors.push(RiskFactor {
        category: FactorCategory::PermissionCount,
        raw_score: permission_raw,
        contribution: permission_raw * weights.permission_count,
        description: format!(
            "student already holds {} active grant(s)",
            input.existing_grant_count
        ),
    });

    // External student-risk signal is folded in only when present.
    if let Some(student_risk) = input.student_risk {
        let raw = f64::from(student_risk.min(100));
        factors.push(RiskFactor {
            category: FactorCategory::StudentRisk,
            raw_score: raw,
            contribution: raw * weights.student_risk,
            description: format!("external student risk signal {}", student_risk.min(100)),
        });
    }

    let total: f64 = factors.iter().map(|f| f.contribution).sum();
    let score = total.round().clamp(0.0, 100.0) as u8;
    let level = level_for(score, config);
    let action = action_for(level);
    let recommendations = build_recommendations(&factors, level);

    RiskAssessment {
        score,
        level,
        action,
        factors,
        recommendations,
    }
}

fn build_recommendations(factors: &[RiskFactor], level: RiskLevel) -> Vec<String> {
    let mut out = Vec::new();
    for factor in factors {
        match factor.category {
            FactorCategory::FieldSensitivity if factor.raw_score >= 70.0 => {
                out.push(
                    "Highly sensitive fields requested; consider approving a narrower field set"
                        .to_string(),
                );
            }
            FactorCategory::Duration if factor.raw_score >= 50.0 => {
                out.push("Long access duration requested; consider a shorter window".to_string());
            }
            FactorCategory::ServiceRisk if factor.raw_score >= 70.0 => {
                out.push("Service is classified high risk; verify its purpose".to_string());
            }
            FactorCategory::PermissionCount if factor.raw_score >= 45.0 => {
                out.push(
                    "Student already shares data with several services; review existing grants"
                        .to_string(),
                );
            }
            _ => {}
        }
    }
    match level {
        RiskLevel::Critical => {
            out.push("Overall risk is critical; denial is recommended".to_string())
        }
        RiskLevel::High => out.push("Overall risk is high; review before approving".to_string()),
        _ => {}
    }
    out
}
