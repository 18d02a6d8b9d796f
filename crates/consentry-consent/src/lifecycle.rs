//! Consent request lifecycle: Pending -> Approved | Denied.
//!
//! A request is a one-shot historical record. It is answered exactly once;
//! re-responding is a Conflict, never a silent overwrite. Approval delegates
//! grant issuance to the grant manager; expiry and revocation are states of
//! the grant, never of the request.

use std::collections::BTreeSet;
use std::sync::Arc;

use consentry_core::{
    AuditAction, AuditEntry, AuditEntryId, AuditSink, ConsentGrant, ConsentRequest, DataField,
    EngineError, EngineResult, RequestId, RequestStatus, RequestStore, RiskEvent, RiskEventKind,
    ServiceId, ServiceStore, StudentId, Timestamp,
};
use consentry_risk::{assess, AssessmentInput, RiskAssessment, RiskConfig};

use crate::events::RiskEventQueue;
use crate::grants::GrantManager;

/// Caller-supplied context recorded with audit entries.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The student's one-time answer to a pending request.
#[derive(Debug, Clone)]
pub enum ConsentDecision {
    Approve {
        /// If supplied, must be a subset of the requested fields; the
        /// approval is narrowed to exactly these (minus any denied fields).
        modified_fields: Option<BTreeSet<String>>,
        modified_duration_days: Option<u32>,
        denied_fields: Option<BTreeSet<String>>,
    },
    Deny {
        /// Defaults to every requested field when unspecified.
        denied_fields: Option<BTreeSet<String>>,
    },
}

#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Approved {
        request: ConsentRequest,
        grant: ConsentGrant,
    },
    Denied {
        request: ConsentRequest,
    },
}

pub struct LifecycleConfig {
    pub max_requested_fields: usize,
    pub max_duration_days: u32,
    pub risk: RiskConfig,
    pub catalog: Vec<DataField>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_requested_fields: 25,
            max_duration_days: 365,
            risk: RiskConfig::default(),
            catalog: consentry_core::default_field_catalog(),
        }
    }
}

pub struct ConsentLifecycle {
    services: Arc<dyn ServiceStore>,
    requests: Arc<dyn RequestStore>,
    grants: Arc<GrantManager>,
    audit: Arc<dyn AuditSink>,
    risk_events: Arc<RiskEventQueue>,
    config: LifecycleConfig,
}

impl ConsentLifecycle {
    pub fn new(
        services: Arc<dyn ServiceStore>,
        requests: Arc<dyn RequestStore>,
        grants: Arc<GrantManager>,
        audit: Arc<dyn AuditSink>,
        risk_events: Arc<RiskEventQueue>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            services,
            requests,
            grants,
            audit,
            risk_events,
            config,
        }
    }

    /// A service's request for field access. Validates, scores, persists as
    /// Pending, and audits. Returns the request together with the full
    /// assessment so callers can surface the factor breakdown.
    #[allow(clippy::too_many_arguments)]
    pub fn create_request(
        &self,
        student: &StudentId,
        service_id: &ServiceId,
        requested_fields: Vec<String>,
        purpose: String,
        requested_duration_days: u32,
        student_risk: Option<u8>,
        ctx: &RequestContext,
    ) -> EngineResult<(ConsentRequest, RiskAssessment)> {
        let service = self
            .services
            .get(service_id)?
            .filter(|s| s.active)
            .ok_or_else(|| EngineError::not_found("service", service_id.as_str()))?;

        let fields: BTreeSet<String> = requested_fields
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            return Err(EngineError::validation(
                "requestedFields",
                "at least one field must be requested",
            ));
        }
        if fields.len() > self.config.max_requested_fields {
            return Err(EngineError::validation(
                "requestedFields",
                format!("at most {} fields may be requested", self.config.max_requested_fields),
            ));
        }
        self.validate_duration(requested_duration_days, "requestedDuration")?;

        let existing = self.count_active_grants(student)?;
        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        let assessment = assess(
            &AssessmentInput {
                service_risk_category: service.risk_category,
                requested_fields: field_refs,
                catalog: &self.config.catalog,
                purpose: &purpose,
                requested_duration_days,
                student_risk,
                existing_grant_count: existing,
            },
            &self.config.risk,
        );

        let now = Timestamp::now();
        let request = ConsentRequest {
            id: RequestId::new(uuid::Uuid::new_v4().to_string()),
            student_id: student.clone(),
            service_id: service_id.clone(),
            requested_fields: fields,
            purpose,
            requested_duration_days,
            risk_score: assessment.score,
            status: RequestStatus::Pending,
            created_at: now,
        };
        self.requests.insert(&request)?;

        let mut entry = self.entry(AuditAction::RequestCreated, student, ctx);
        entry.service_id = Some(service_id.clone());
        entry.request_id = Some(request.id.clone());
        entry.metadata = serde_json::json!({
            "requested_fields": request.requested_fields.iter().collect::<Vec<_>>(),
            "requested_duration_days": requested_duration_days,
            "risk_score": assessment.score,
            "risk_level": assessment.level.to_string(),
            "factors": assessment
                .factors
                .iter()
                .map(|f| serde_json::json!({
                    "category": f.category.to_string(),
                    "contribution": f.contribution,
                }))
                .collect::<Vec<_>>(),
        });
        self.audit.record(entry)?;

        Ok((request, assessment))
    }

    /// The student's one-time response to a pending request.
    pub fn respond(
        &self,
        request_id: &RequestId,
        student: &StudentId,
        decision: ConsentDecision,
        ctx: &RequestContext,
    ) -> EngineResult<RequestOutcome> {
        let request = self
            .requests
            .get(request_id)?
            .ok_or_else(|| EngineError::not_found("request", request_id.as_str()))?;
        if &request.student_id != student {
            return Err(EngineError::not_found("request", request_id.as_str()));
        }
        if !request.status.is_pending() {
            return Err(EngineError::Conflict(format!(
                "request has already been answered ({})",
                request.status.label()
            )));
        }

        match decision {
            ConsentDecision::Approve {
                modified_fields,
                modified_duration_days,
                denied_fields,
            } => self.approve(request, modified_fields, modified_duration_days, denied_fields, ctx),
            ConsentDecision::Deny { denied_fields } => self.deny(request, denied_fields, ctx),
        }
    }

    fn approve(
        &self,
        mut request: ConsentRequest,
        modified_fields: Option<BTreeSet<String>>,
        modified_duration_days: Option<u32>,
        denied_fields: Option<BTreeSet<String>>,
        ctx: &RequestContext,
    ) -> EngineResult<RequestOutcome> {
        let mut approved: BTreeSet<String> = match &modified_fields {
            Some(modified) => {
                if !modified.is_subset(&request.requested_fields) {
                    return Err(EngineError::validation(
                        "modifiedFields",
                        "must be a subset of the requested fields",
                    ));
                }
                modified.clone()
            }
            None => request.requested_fields.clone(),
        };
        if let Some(denied) = &denied_fields {
            approved = approved.difference(denied).cloned().collect();
        }
        if approved.is_empty() {
            return Err(EngineError::validation(
                "approvedFields",
                "approval must leave at least one field",
            ));
        }

        let duration = modified_duration_days.unwrap_or(request.requested_duration_days);
        self.validate_duration(duration, "modifiedDuration")?;

        let now = Timestamp::now();
        let grant = self.grants.issue(&request, approved, duration, now)?;

        let status = RequestStatus::Approved {
            approved_duration_days: duration,
            responded_at: now,
        };
        if !self.requests.update_status(&request.id, &status)? {
            return Err(EngineError::not_found("request", request.id.as_str()));
        }
        request.status = status;

        let mut entry = self.entry(AuditAction::RequestApproved, &request.student_id, ctx);
        entry.service_id = Some(request.service_id.clone());
        entry.request_id = Some(request.id.clone());
        entry.grant_id = Some(grant.id.clone());
        entry.metadata = serde_json::json!({
            "approved_fields": grant.approved_fields.iter().collect::<Vec<_>>(),
            "approved_duration_days": duration,
        });
        self.audit.record(entry)?;

        self.risk_events.push(RiskEvent {
            kind: RiskEventKind::ConsentApproved,
            student_id: request.student_id.clone(),
            service_id: request.service_id.clone(),
            request_id: Some(request.id.clone()),
            risk_score: request.risk_score,
            occurred_at: now,
        })?;

        Ok(RequestOutcome::Approved { request, grant })
    }

    fn deny(
        &self,
        mut request: ConsentRequest,
        denied_fields: Option<BTreeSet<String>>,
        ctx: &RequestContext,
    ) -> EngineResult<RequestOutcome> {
        let denied: Vec<String> = denied_fields
            .unwrap_or_else(|| request.requested_fields.clone())
            .into_iter()
            .collect();

        let now = Timestamp::now();
        let status = RequestStatus::Denied {
            denied_fields: denied.clone(),
            responded_at: now,
        };
        if !self.requests.update_status(&request.id, &status)? {
            return Err(EngineError::not_found("request", request.id.as_str()));
        }
        request.status = status;

        let mut entry = self.entry(AuditAction::RequestDenied, &request.student_id, ctx);
        entry.service_id = Some(request.service_id.clone());
        entry.request_id = Some(request.id.clone());
        entry.metadata = serde_json::json!({ "denied_fields": denied });
        self.audit.record(entry)?;

        self.risk_events.push(RiskEvent {
            kind: RiskEventKind::ConsentDenied,
            student_id: request.student_id.clone(),
            service_id: request.service_id.clone(),
            request_id: Some(request.id.clone()),
            risk_score: request.risk_score,
            occurred_at: now,
        })?;

        Ok(RequestOutcome::Denied { request })
    }

    fn validate_duration(&self, days: u32, field: &str) -> EngineResult<()> {
        if days < 1 || days > self.config.max_duration_days {
            return Err(EngineError::validation(
                field,
                format!("duration must be in 1..={} days", self.config.max_duration_days),
            ));
        }
        Ok(())
    }

    fn count_active_grants(&self, student: &StudentId) -> EngineResult<u64> {
        // Counts stored-Active grants; an unswept expired grant is counted
        // until the next sweep, which only nudges the score upward.
        self.grants.count_active_by_student(student)
    }

    fn entry(&self, action: AuditAction, student: &StudentId, ctx: &RequestContext) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::new(uuid::Uuid::new_v4().to_string()),
            action,
            student_id: student.clone(),
            service_id: None,
            request_id: None,
            grant_id: None,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            metadata: serde_json::Value::Null,
            timestamp: Timestamp::now(),
        }
    }
}
