//! Engine facade wiring stores, risk config, lifecycle, guard, and the audit
//! emitter into one surface.
//!
//! Operations are synchronous units of work over the shared stores; the only
//! async piece is the emitter's periodic flush task, started explicitly and
//! stopped by `shutdown`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use consentry_audit::{AuditEmitter, RedactionPolicy};
use consentry_consent::{
    AccessDecision, AccessGuard, ConsentDecision, ConsentLifecycle, GrantInfo, GrantManager,
    LifecycleConfig, MultiAccessDecision, RequestContext, RequestOutcome, RiskEventQueue,
};
use consentry_core::{
    default_field_catalog, AuditAction, AuditEntry, AuditEntryId, AuditSink, AuditStore,
    ConsentGrant, ConsentRequest, DataField, EngineError, EngineResult, FieldCategory, GrantId,
    GrantStore, HistoryFilter, Page, PageRequest, RequestId, RequestStore, RiskCategory,
    RiskEvent, Service, ServiceId, ServiceStore, StudentId, Timestamp,
};
use consentry_risk::{assess, AssessmentInput, RiskAssessment, RiskConfig, RiskFactor};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{RootError, RootResult};
use crate::storage::SqliteStore;

/// Subject recorded for administrative audit entries (service registration
/// and activation changes), which have no student of their own.
const SYSTEM_SUBJECT: &str = "system";

/// One requested field, resolved against the catalog where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationField {
    pub name: String,
    pub label: String,
    pub category: Option<FieldCategory>,
    pub sensitivity: Option<u8>,
}

/// Projection of a request for an external explanation generator. The risk
/// breakdown is recomputed deterministically from the stored request; the
/// permission-count factor reflects the student's current grants rather than
/// the count at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationInput {
    pub request_id: RequestId,
    pub student_id: StudentId,
    pub service_name: String,
    pub service_risk_category: RiskCategory,
    pub purpose: String,
    pub requested_duration_days: u32,
    pub status: String,
    pub risk_score: u8,
    pub factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub fields: Vec<ExplanationField>,
}

pub struct ConsentEngine {
    services: Arc<dyn ServiceStore>,
    requests: Arc<dyn RequestStore>,
    audit_store: Arc<dyn AuditStore>,
    emitter: Arc<AuditEmitter>,
    grants: Arc<GrantManager>,
    lifecycle: ConsentLifecycle,
    guard: AccessGuard,
    risk_events: Arc<RiskEventQueue>,
    risk_config: RiskConfig,
    catalog: Vec<DataField>,
    flush_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConsentEngine {
    /// Open the engine over the SQLite database named in the config.
    pub fn open(config: &EngineConfig) -> RootResult<Self> {
        let path = config
            .db_path
            .to_str()
            .ok_or_else(|| RootError::Config("db_path is not valid UTF-8".into()))?;
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        let store = Arc::new(SqliteStore::open(path)?);
        Self::from_store(store, config)
    }

    /// Engine over an in-memory SQLite database (for tests and dry runs).
    pub fn in_memory(config: &EngineConfig) -> RootResult<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::from_store(store, config)
    }

    pub fn from_store<S>(store: Arc<S>, config: &EngineConfig) -> RootResult<Self>
    where
        S: ServiceStore + RequestStore + GrantStore + AuditStore + 'static,
    {
        config.validate()?;

        let services: Arc<dyn ServiceStore> = store.clone();
        let requests: Arc<dyn RequestStore> = store.clone();
        let grant_store: Arc<dyn GrantStore> = store.clone();
        let audit_store: Arc<dyn AuditStore> = store;

        let policy = RedactionPolicy::with_extra_terms(config.audit.redaction_terms.clone());
        let emitter = Arc::new(AuditEmitter::with_capacity(
            audit_store.clone(),
            policy,
            config.audit.buffer_capacity,
        ));
        let sink: Arc<dyn AuditSink> = emitter.clone();

        let risk_events = Arc::new(RiskEventQueue::new());
        let grants = Arc::new(GrantManager::new(
            grant_store.clone(),
            requests.clone(),
            sink.clone(),
            risk_events.clone(),
        ));
        let catalog = default_field_catalog();
        let lifecycle = ConsentLifecycle::new(
            services.clone(),
            requests.clone(),
            grants.clone(),
            sink.clone(),
            risk_events.clone(),
            LifecycleConfig {
                max_requested_fields: config.max_requested_fields,
                max_duration_days: config.max_duration_days,
                risk: config.risk.clone(),
                catalog: catalog.clone(),
            },
        );
        let guard = AccessGuard::new(grant_store, sink);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            services,
            requests,
            audit_store,
            emitter,
            grants,
            lifecycle,
            guard,
            risk_events,
            risk_config: config.risk.clone(),
            catalog,
            flush_interval: Duration::from_secs(config.audit.flush_interval_secs),
            shutdown_tx,
            shutdown_rx,
        })
    }

    // -- service registry ---------------------------------------------------

    pub fn register_service(
        &self,
        name: &str,
        description: Option<String>,
        risk_category: RiskCategory,
    ) -> EngineResult<Service> {
        if name.trim().is_empty() {
            return Err(EngineError::validation("name", "service name must not be empty"));
        }
        let service = Service {
            id: ServiceId::new(uuid::Uuid::new_v4().to_string()),
            name: name.trim().to_string(),
            description,
            risk_category,
            active: true,
            created_at: Timestamp::now(),
        };
        self.services.insert(&service)?;
        self.record_admin(
            AuditAction::ServiceRegistered,
            &service.id,
            serde_json::json!({ "name": service.name, "risk_category": risk_category.to_string() }),
        )?;
        Ok(service)
    }

    pub fn set_service_active(&self, id: &ServiceId, active: bool) -> EngineResult<()> {
        if !self.services.set_active(id, active)? {
            return Err(EngineError::not_found("service", id.as_str()));
        }
        self.record_admin(
            AuditAction::ServiceActivationChanged,
            id,
            serde_json::json!({ "active": active }),
        )?;
        Ok(())
    }

    pub fn list_services(&self) -> EngineResult<Vec<Service>> {
        self.services.list()
    }

    pub fn get_service(&self, id: &ServiceId) -> EngineResult<Service> {
        self.services
            .get(id)?
            .ok_or_else(|| EngineError::not_found("service", id.as_str()))
    }

    // -- consent lifecycle --------------------------------------------------

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
        self.lifecycle.create_request(
            student,
            service_id,
            requested_fields,
            purpose,
            requested_duration_days,
            student_risk,
            ctx,
        )
    }

    pub fn respond(
        &self,
        request_id: &RequestId,
        student: &StudentId,
        decision: ConsentDecision,
        ctx: &RequestContext,
    ) -> EngineResult<RequestOutcome> {
        self.lifecycle.respond(request_id, student, decision, ctx)
    }

    pub fn revoke(
        &self,
        grant_id: &GrantId,
        student: &StudentId,
        reason: Option<String>,
    ) -> EngineResult<ConsentGrant> {
        self.grants.revoke(grant_id, student, reason)
    }

    // -- access guard -------------------------------------------------------

    pub fn check_access(
        &self,
        student: &StudentId,
        service: &ServiceId,
        field: &str,
    ) -> EngineResult<AccessDecision> {
        self.guard.check_field_access(student, service, field)
    }

    pub fn check_multi_access(
        &self,
        student: &StudentId,
        service: &ServiceId,
        fields: &[String],
    ) -> EngineResult<MultiAccessDecision> {
        self.guard.check_multi_field_access(student, service, fields)
    }

    pub fn get_accessible_fields(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Vec<String>> {
        self.guard.get_accessible_fields(student, service)
    }

    pub fn has_active_grant(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<bool> {
        self.guard.has_active_grant(student, service)
    }

    pub fn get_grant_info(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Option<GrantInfo>> {
        self.guard.get_grant_info(student, service)
    }

    // -- listings -----------------------------------------------------------

    pub fn list_active_grants(&self, student: &StudentId) -> EngineResult<Vec<ConsentGrant>> {
        self.grants.list_valid(student, Timestamp::now())
    }

    pub fn list_pending(&self, student: &StudentId) -> EngineResult<Vec<ConsentRequest>> {
        self.requests.list_pending(student)
    }

    pub fn list_history(
        &self,
        student: &StudentId,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> EngineResult<Page<ConsentRequest>> {
        page.validate()
            .map_err(|e| EngineError::validation("page", e))?;
        let (items, total) = self.requests.list_history(student, filter, page)?;
        Ok(Page::from_items(items, page, total))
    }

    /// Recent audit entries for a student. Flushes the emitter first so
    /// entries recorded moments ago are visible.
    pub fn list_audit_logs(
        &self,
        student: &StudentId,
        limit: u32,
    ) -> EngineResult<Vec<AuditEntry>> {
        self.emitter.flush()?;
        self.audit_store.list_by_student(student, limit)
    }

    // -- projections --------------------------------------------------------

    /// The explanation-generator input for a stored request.
    pub fn explanation_input(&self, request_id: &RequestId) -> EngineResult<ExplanationInput> {
        let request = self
            .requests
            .get(request_id)?
            .ok_or_else(|| EngineError::not_found("request", request_id.as_str()))?;
        let service = self.get_service(&request.service_id)?;

        let field_refs: Vec<&str> = request.requested_fields.iter().map(String::as_str).collect();
        let assessment = assess(
            &AssessmentInput {
                service_risk_category: service.risk_category,
                requested_fields: field_refs,
                catalog: &self.catalog,
                purpose: &request.purpose,
                requested_duration_days: request.requested_duration_days,
                student_risk: None,
                existing_grant_count: self
                    .grants
                    .count_active_by_student(&request.student_id)?,
            },
            &self.risk_config,
        );

        let fields = request
            .requested_fields
            .iter()
            .map(|name| {
                let known = self.catalog.iter().find(|f| &f.name == name);
                ExplanationField {
                    name: name.clone(),
                    label: known.map(|f| f.label.clone()).unwrap_or_else(|| name.clone()),
                    category: known.map(|f| f.category),
                    sensitivity: known.map(|f| f.sensitivity),
                }
            })
            .collect();

        Ok(ExplanationInput {
            request_id: request.id,
            student_id: request.student_id,
            service_name: service.name,
            service_risk_category: service.risk_category,
            purpose: request.purpose,
            requested_duration_days: request.requested_duration_days,
            status: request.status.label().to_string(),
            risk_score: request.risk_score,
            factors: assessment.factors,
            recommendations: assessment.recommendations,
            fields,
        })
    }

    // -- maintenance --------------------------------------------------------

    /// Run the expiry sweep. Returns the number of grants flipped.
    pub fn process_expired(&self) -> EngineResult<u64> {
        self.grants.process_expired(Timestamp::now())
    }

    /// Pop everything queued for the external risk collaborator.
    pub fn drain_risk_events(&self) -> EngineResult<Vec<RiskEvent>> {
        self.risk_events.drain()
    }

    /// Start the periodic audit flush task. Requires a tokio runtime.
    pub fn start_flush_task(&self) -> JoinHandle<()> {
        self.emitter
            .spawn_flush_task(self.flush_interval, self.shutdown_rx.clone())
    }

    /// Signal the flush task to stop and perform a final synchronous flush.
    pub fn shutdown(&self) -> EngineResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.emitter.flush()?;
        Ok(())
    }

    fn record_admin(
        &self,
        action: AuditAction,
        service: &ServiceId,
        metadata: serde_json::Value,
    ) -> EngineResult<()> {
        self.emitter.record(AuditEntry {
            id: AuditEntryId::new(uuid::Uuid::new_v4().to_string()),
            action,
            student_id: StudentId::new(SYSTEM_SUBJECT),
            service_id: Some(service.clone()),
            request_id: None,
            grant_id: None,
            ip_address: None,
            user_agent: None,
            metadata,
            timestamp: Timestamp::now(),
        })
    }
}
