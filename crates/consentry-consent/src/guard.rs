//! Field-level access guard.
//!
//! Pure read-side authorization over `find_active` plus the validity
//! predicate; the guard holds no state of its own. Denial is a first-class
//! structured result, never an error: callers must be able to distinguish
//! "authorization denied" from "the check itself failed".
//!
//! Evaluation order is a design contract (first match wins): missing grant,
//! expired, revoked, field not approved, allowed. Expiry and revocation come
//! before field membership so callers can tell "authorization lapsed" apart
//! from "authorization never covered this field".

use std::sync::Arc;

use consentry_core::{
    AuditAction, AuditEntry, AuditEntryId, AuditSink, ConsentGrant, EngineResult, GrantId,
    GrantStore, ServiceId, StudentId, Timestamp,
};
use serde::{Deserialize, Serialize};

use crate::validity::{grant_validity, GrantValidity};

pub const REASON_NO_GRANT: &str = "No active consent grant found";
pub const REASON_EXPIRED: &str = "Consent grant has expired";
pub const REASON_REVOKED: &str = "Consent grant has been revoked";
pub const REASON_FIELD_NOT_APPROVED: &str = "Field not approved for access";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<GrantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl AccessDecision {
    fn allowed(grant: &ConsentGrant) -> Self {
        Self {
            allowed: true,
            reason: None,
            grant_id: Some(grant.id.clone()),
            expires_at: Some(grant.expires_at),
        }
    }

    fn denied(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            grant_id: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecision {
    pub field: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiAccessDecision {
    pub all_allowed: bool,
    pub results: Vec<FieldDecision>,
    pub allowed_fields: Vec<String>,
    pub denied_fields: Vec<String>,
}

/// Summary projection of a currently valid grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantInfo {
    pub grant_id: GrantId,
    pub approved_fields: Vec<String>,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

/// The base validity failure shared by every field in a multi-field check.
fn base_denial(grant: Option<&ConsentGrant>, now: Timestamp) -> Option<&'static str> {
    match grant {
        None => Some(REASON_NO_GRANT),
        Some(g) => match grant_validity(g, now) {
            GrantValidity::Expired => Some(REASON_EXPIRED),
            GrantValidity::Revoked => Some(REASON_REVOKED),
            GrantValidity::Valid => None,
        },
    }
}

pub struct AccessGuard {
    grants: Arc<dyn GrantStore>,
    audit: Arc<dyn AuditSink>,
}

impl AccessGuard {
    pub fn new(grants: Arc<dyn GrantStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { grants, audit }
    }

    /// May `service` read `field` about `student` right now?
    pub fn check_field_access(
        &self,
        student: &StudentId,
        service: &ServiceId,
        field: &str,
    ) -> EngineResult<AccessDecision> {
        let now = Timestamp::now();
        let grant = self.grants.find_active(student, service)?;

        let decision = match base_denial(grant.as_ref(), now) {
            Some(reason) => AccessDecision::denied(reason),
            None => {
                // base_denial returned None, so the grant exists and is valid.
                let grant = grant.as_ref().ok_or_else(|| {
                    consentry_core::EngineError::Internal("valid grant missing".into())
                })?;
                if grant.approved_fields.contains(field) {
                    AccessDecision::allowed(grant)
                } else {
                    AccessDecision::denied(REASON_FIELD_NOT_APPROVED)
                }
            }
        };

        self.record_check(
            student,
            service,
            decision.grant_id.as_ref(),
            serde_json::json!({ "field": field, "reason": decision.reason }),
            decision.allowed,
        )?;
        Ok(decision)
    }

    /// Check several fields at once. The grant's base validity failure is
    /// computed once and shared; otherwise each field is evaluated against
    /// the approved set individually. `allowed_fields` and `denied_fields`
    /// partition the input exactly.
    pub fn check_multi_field_access(
        &self,
        student: &StudentId,
        service: &ServiceId,
        fields: &[String],
    ) -> EngineResult<MultiAccessDecision> {
        let now = Timestamp::now();
        let grant = self.grants.find_active(student, service)?;
        let base = base_denial(grant.as_ref(), now);

        let mut results = Vec::with_capacity(fields.len());
        let mut allowed_fields = Vec::new();
        let mut denied_fields = Vec::new();

        for field in fields {
            let (allowed, reason) = match (base, grant.as_ref()) {
                (Some(reason), _) => (false, Some(reason.to_string())),
                (None, Some(g)) if g.approved_fields.contains(field) => (true, None),
                (None, _) => (false, Some(REASON_FIELD_NOT_APPROVED.to_string())),
            };
            if allowed {
                allowed_fields.push(field.clone());
            } else {
                denied_fields.push(field.clone());
            }
            results.push(FieldDecision {
                field: field.clone(),
                allowed,
                reason,
            });
        }

        let all_allowed = denied_fields.is_empty();
        let grant_id = match base {
            None => grant.as_ref().map(|g| g.id.clone()),
            Some(_) => None,
        };
        self.record_check(
            student,
            service,
            grant_id.as_ref(),
            serde_json::json!({
                "fields": fields,
                "denied_fields": denied_fields,
                "base_reason": base,
            }),
            all_allowed,
        )?;

        Ok(MultiAccessDecision {
            all_allowed,
            results,
            allowed_fields,
            denied_fields,
        })
    }

    /// Exactly the approved fields of the pair's valid grant, or empty.
    pub fn get_accessible_fields(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Vec<String>> {
        let now = Timestamp::now();
        let grant = self.grants.find_active(student, service)?;
        match base_denial(grant.as_ref(), now) {
            Some(_) => Ok(Vec::new()),
            None => Ok(grant
                .map(|g| g.approved_fields.into_iter().collect())
                .unwrap_or_default()),
        }
    }

    pub fn has_active_grant(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<bool> {
        Ok(self.get_grant_info(student, service)?.is_some())
    }

    pub fn get_grant_info(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Option<GrantInfo>> {
        let now = Timestamp::now();
        let grant = self.grants.find_active(student, service)?;
        match base_denial(grant.as_ref(), now) {
            Some(_) => Ok(None),
            None => Ok(grant.map(|g| GrantInfo {
                grant_id: g.id,
                approved_fields: g.approved_fields.into_iter().collect(),
                issued_at: g.issued_at,
                expires_at: g.expires_at,
            })),
        }
    }

    fn record_check(
        &self,
        student: &StudentId,
        service: &ServiceId,
        grant_id: Option<&GrantId>,
        metadata: serde_json::Value,
        allowed: bool,
    ) -> EngineResult<()> {
        let action = if allowed {
            AuditAction::AccessChecked
        } else {
            AuditAction::AccessDenied
        };
        self.audit.record(AuditEntry {
            id: AuditEntryId::new(uuid::Uuid::new_v4().to_string()),
            action,
            student_id: student.clone(),
            service_id: Some(service.clone()),
            request_id: None,
            grant_id: grant_id.cloned(),
            ip_address: None,
            user_agent: None,
            metadata,
            timestamp: Timestamp::now(),
        })
    }
}
