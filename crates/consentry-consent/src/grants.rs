//! Grant issuance, revocation, and the expiry sweep.
//!
//! Issuance enforces the single-active-grant invariant: the store's
//! `issue_superseding` runs supersede-then-insert as one atomic operation per
//! (student, service) pair.

use std::collections::BTreeSet;
use std::sync::Arc;

use consentry_core::{
    AuditAction, AuditEntry, AuditEntryId, AuditSink, ConsentGrant, ConsentRequest, EngineError,
    EngineResult, GrantId, GrantStore, RequestStore, RiskEvent, RiskEventKind, ServiceId,
    StudentId, Timestamp,
};

use crate::events::RiskEventQueue;
use crate::status;
use crate::validity::{grant_validity, GrantValidity};

pub struct GrantManager {
    grants: Arc<dyn GrantStore>,
    requests: Arc<dyn RequestStore>,
    audit: Arc<dyn AuditSink>,
    risk_events: Arc<RiskEventQueue>,
}

impl GrantManager {
    pub fn new(
        grants: Arc<dyn GrantStore>,
        requests: Arc<dyn RequestStore>,
        audit: Arc<dyn AuditSink>,
        risk_events: Arc<RiskEventQueue>,
    ) -> Self {
        Self {
            grants,
            requests,
            audit,
            risk_events,
        }
    }

    fn entry(&self, action: AuditAction, student: &StudentId) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(uuid::Uuid::new_v4().to_string()),
            action,
            student_id: student.clone(),
            service_id: None,
            request_id: None,
            grant_id: None,
            ip_address: None,
            user_agent: None,
            metadata: serde_json::Value::Null,
            timestamp: Timestamp::now(),
        }
    }

    /// Issue a grant from an approved request. Any prior grant for the pair
    /// is superseded in the same storage transaction as the insert.
    pub fn issue(
        &self,
        request: &ConsentRequest,
        approved_fields: BTreeSet<String>,
        duration_days: u32,
        now: Timestamp,
    ) -> EngineResult<ConsentGrant> {
        let grant = ConsentGrant {
            id: GrantId::new(uuid::Uuid::new_v4().to_string()),
            student_id: request.student_id.clone(),
            service_id: request.service_id.clone(),
            request_id: request.id.clone(),
            approved_fields,
            issued_at: now,
            expires_at: now.plus_days(duration_days),
            state: consentry_core::GrantState::Active,
        };

        let superseded = self.grants.issue_superseding(&grant, now)?;

        if let Some(prior) = superseded {
            let mut entry = self.entry(AuditAction::GrantSuperseded, &request.student_id);
            entry.service_id = Some(request.service_id.clone());
            entry.grant_id = Some(prior.id.clone());
            entry.metadata = serde_json::json!({ "superseded_by": grant.id.as_str() });
            self.audit.record(entry)?;
        }

        let mut entry = self.entry(AuditAction::GrantIssued, &request.student_id);
        entry.service_id = Some(request.service_id.clone());
        entry.request_id = Some(request.id.clone());
        entry.grant_id = Some(grant.id.clone());
        entry.metadata = serde_json::json!({
            "approved_fields": grant.approved_fields.iter().collect::<Vec<_>>(),
            "expires_at": grant.expires_at.to_rfc3339(),
        });
        self.audit.record(entry)?;

        Ok(grant)
    }

    /// Revoke a grant on the student's behalf. Immediate and irreversible.
    pub fn revoke(
        &self,
        grant_id: &GrantId,
        student: &StudentId,
        reason: Option<String>,
    ) -> EngineResult<ConsentGrant> {
        let grant = self
            .grants
            .get(grant_id)?
            .ok_or_else(|| EngineError::not_found("grant", grant_id.as_str()))?;

        // Ownership is checked before state: a foreign grant id is
        // indistinguishable from an unknown one.
        if &grant.student_id != student {
            return Err(EngineError::not_found("grant", grant_id.as_str()));
        }

        let now = Timestamp::now();
        let new_state = status::revoke(&grant.state, now, reason.clone())?;
        if !self.grants.update_state(grant_id, &new_state)? {
            return Err(EngineError::not_found("grant", grant_id.as_str()));
        }

        let mut entry = self.entry(AuditAction::GrantRevoked, student);
        entry.service_id = Some(grant.service_id.clone());
        entry.request_id = Some(grant.request_id.clone());
        entry.grant_id = Some(grant_id.clone());
        entry.metadata = serde_json::json!({ "reason": reason });
        self.audit.record(entry)?;

        let risk_score = self
            .requests
            .get(&grant.request_id)?
            .map(|r| r.risk_score)
            .unwrap_or(0);
        self.risk_events.push(RiskEvent {
            kind: RiskEventKind::ConsentRevoked,
            student_id: student.clone(),
            service_id: grant.service_id.clone(),
            request_id: Some(grant.request_id.clone()),
            risk_score,
            occurred_at: now,
        })?;

        let mut revoked = grant;
        revoked.state = new_state;
        Ok(revoked)
    }

    /// Batch expiry sweep. The state flip in the store is the single source
    /// of truth, so overlapping or repeated sweeps emit the `GRANT_EXPIRED`
    /// audit event at most once per grant.
    pub fn process_expired(&self, now: Timestamp) -> EngineResult<u64> {
        let flipped = self.grants.sweep_expired(now)?;
        for grant in &flipped {
            let mut entry = self.entry(AuditAction::GrantExpired, &grant.student_id);
            entry.service_id = Some(grant.service_id.clone());
            entry.grant_id = Some(grant.id.clone());
            entry.metadata = serde_json::json!({ "expires_at": grant.expires_at.to_rfc3339() });
            self.audit.record(entry)?;
        }
        Ok(flipped.len() as u64)
    }

    pub fn find_active(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Option<ConsentGrant>> {
        self.grants.find_active(student, service)
    }

    pub fn count_active_by_student(&self, student: &StudentId) -> EngineResult<u64> {
        self.grants.count_active_by_student(student)
    }

    /// Currently valid grants for a student: stored-Active and inside the
    /// expiry window at `now`.
    pub fn list_valid(&self, student: &StudentId, now: Timestamp) -> EngineResult<Vec<ConsentGrant>> {
        let grants = self.grants.list_active_by_student(student)?;
        Ok(grants
            .into_iter()
            .filter(|g| grant_validity(g, now) == GrantValidity::Valid)
            .collect())
    }
}
