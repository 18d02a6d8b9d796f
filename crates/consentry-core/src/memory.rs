//! In-memory store implementations.
//!
//! Used by unit tests throughout the workspace and as the backing store when
//! no database path is configured. The grant map's mutex doubles as the
//! critical section for supersede-then-insert.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::traits::{AuditSink, AuditStore, GrantStore, RequestStore, ServiceStore};
use crate::types::{
    AuditEntry, ConsentGrant, ConsentRequest, GrantId, GrantState, HistoryFilter, PageRequest,
    RequestId, RequestStatus, Service, ServiceId, StudentId, Timestamp,
};

fn lock_err<T>(e: std::sync::PoisonError<T>) -> EngineError {
    EngineError::Storage(format!("lock poisoned: {}", e))
}

#[derive(Default)]
pub struct MemoryStore {
    services: Mutex<HashMap<ServiceId, Service>>,
    requests: Mutex<HashMap<RequestId, ConsentRequest>>,
    grants: Mutex<HashMap<GrantId, ConsentGrant>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceStore for MemoryStore {
    fn insert(&self, service: &Service) -> EngineResult<()> {
        let mut services = self.services.lock().map_err(lock_err)?;
        if services.contains_key(&service.id) {
            return Err(EngineError::Conflict(format!(
                "service already registered: {}",
                service.id
            )));
        }
        services.insert(service.id.clone(), service.clone());
        Ok(())
    }

    fn get(&self, id: &ServiceId) -> EngineResult<Option<Service>> {
        Ok(self.services.lock().map_err(lock_err)?.get(id).cloned())
    }

    fn list(&self) -> EngineResult<Vec<Service>> {
        let services = self.services.lock().map_err(lock_err)?;
        let mut out: Vec<Service> = services.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    fn set_active(&self, id: &ServiceId, active: bool) -> EngineResult<bool> {
        let mut services = self.services.lock().map_err(lock_err)?;
        match services.get_mut(id) {
            Some(service) => {
                service.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl RequestStore for MemoryStore {
    fn insert(&self, request: &ConsentRequest) -> EngineResult<()> {
        self.requests
            .lock()
            .map_err(lock_err)?
            .insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn get(&self, id: &RequestId) -> EngineResult<Option<ConsentRequest>> {
        Ok(self.requests.lock().map_err(lock_err)?.get(id).cloned())
    }

    fn update_status(&self, id: &RequestId, status: &RequestStatus) -> EngineResult<bool> {
        let mut requests = self.requests.lock().map_err(lock_err)?;
        match requests.get_mut(id) {
            Some(request) => {
                request.status = status.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_pending(&self, student: &StudentId) -> EngineResult<Vec<ConsentRequest>> {
        let requests = self.requests.lock().map_err(lock_err)?;
        let mut out: Vec<ConsentRequest> = requests
            .values()
            .filter(|r| &r.student_id == student && r.status.is_pending())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    fn list_history(
        &self,
        student: &StudentId,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> EngineResult<(Vec<ConsentRequest>, u64)> {
        let requests = self.requests.lock().map_err(lock_err)?;
        let mut matching: Vec<ConsentRequest> = requests
            .values()
            .filter(|r| &r.student_id == student)
            .filter(|r| match &filter.status {
                Some(status) => r.status.label().eq_ignore_ascii_case(status),
                None => true,
            })
            .filter(|r| match &filter.service_id {
                Some(service) => &r.service_id == service,
                None => true,
            })
            .filter(|r| filter.from.map_or(true, |from| r.created_at >= from))
            .filter(|r| filter.until.map_or(true, |until| r.created_at <= until))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let start = (page.offset() as usize).min(matching.len());
        let end = (start + page.limit as usize).min(matching.len());
        Ok((matching[start..end].to_vec(), total))
    }
}

impl GrantStore for MemoryStore {
    fn issue_superseding(
        &self,
        grant: &ConsentGrant,
        now: Timestamp,
    ) -> EngineResult<Option<ConsentGrant>> {
        // The whole supersede-then-insert happens under one lock.
        let mut grants = self.grants.lock().map_err(lock_err)?;

        let prior_id = grants
            .values()
            .find(|g| {
                g.student_id == grant.student_id
                    && g.service_id == grant.service_id
                    && g.state.is_active()
            })
            .map(|g| g.id.clone());

        let superseded = match prior_id {
            Some(id) => {
                let prior = grants
                    .get_mut(&id)
                    .ok_or_else(|| EngineError::Internal("grant vanished under lock".into()))?;
                prior.state = GrantState::Superseded { at: now };
                Some(prior.clone())
            }
            None => None,
        };

        grants.insert(grant.id.clone(), grant.clone());
        Ok(superseded)
    }

    fn get(&self, id: &GrantId) -> EngineResult<Option<ConsentGrant>> {
        Ok(self.grants.lock().map_err(lock_err)?.get(id).cloned())
    }

    fn update_state(&self, id: &GrantId, state: &GrantState) -> EngineResult<bool> {
        let mut grants = self.grants.lock().map_err(lock_err)?;
        match grants.get_mut(id) {
            Some(grant) => {
                grant.state = state.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_active(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Option<ConsentGrant>> {
        let grants = self.grants.lock().map_err(lock_err)?;
        Ok(grants
            .values()
            .filter(|g| {
                &g.student_id == student
                    && &g.service_id == service
                    && !matches!(g.state, GrantState::Superseded { .. })
            })
            .max_by_key(|g| g.issued_at)
            .cloned())
    }

    fn list_active_by_student(&self, student: &StudentId) -> EngineResult<Vec<ConsentGrant>> {
        let grants = self.grants.lock().map_err(lock_err)?;
        let mut out: Vec<ConsentGrant> = grants
            .values()
            .filter(|g| &g.student_id == student && g.state.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(out)
    }

    fn count_active_by_student(&self, student: &StudentId) -> EngineResult<u64> {
        let grants = self.grants.lock().map_err(lock_err)?;
        Ok(grants
            .values()
            .filter(|g| &g.student_id == student && g.state.is_active())
            .count() as u64)
    }

    fn sweep_expired(&self, now: Timestamp) -> EngineResult<Vec<ConsentGrant>> {
        let mut grants = self.grants.lock().map_err(lock_err)?;
        let mut flipped = Vec::new();
        for grant in grants.values_mut() {
            if grant.state.is_active() && grant.expires_at <= now {
                grant.state = GrantState::Expired { noted_at: now };
                flipped.push(grant.clone());
            }
        }
        Ok(flipped)
    }
}

impl AuditStore for MemoryStore {
    fn append_batch(&self, entries: &[AuditEntry]) -> EngineResult<()> {
        self.audit
            .lock()
            .map_err(lock_err)?
            .extend_from_slice(entries);
        Ok(())
    }

    fn list_by_student(&self, student: &StudentId, limit: u32) -> EngineResult<Vec<AuditEntry>> {
        let audit = self.audit.lock().map_err(lock_err)?;
        let mut out: Vec<AuditEntry> = audit
            .iter()
            .filter(|e| &e.student_id == student)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit as usize);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink — records entries in memory, for tests
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .expect("audit sink lock poisoned")
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("audit sink lock poisoned")
            .clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) -> EngineResult<()> {
        self.entries.lock().map_err(lock_err)?.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditAction, AuditEntryId, RiskCategory};

    fn make_service(id: &str, active: bool) -> Service {
        Service {
            id: ServiceId::new(id),
            name: format!("service {}", id),
            description: None,
            risk_category: RiskCategory::Medium,
            active,
            created_at: Timestamp::from_seconds(1),
        }
    }

    fn make_grant(id: &str, student: &str, service: &str, expires: u64) -> ConsentGrant {
        ConsentGrant {
            id: GrantId::new(id),
            student_id: StudentId::new(student),
            service_id: ServiceId::new(service),
            request_id: RequestId::new(format!("req-{}", id)),
            approved_fields: ["email".to_string()].into_iter().collect(),
            issued_at: Timestamp::from_seconds(1),
            expires_at: Timestamp::from_seconds(expires),
            state: GrantState::Active,
        }
    }

    fn make_request(id: &str, student: &str, created: u64) -> ConsentRequest {
        ConsentRequest {
            id: RequestId::new(id),
            student_id: StudentId::new(student),
            service_id: ServiceId::new("svc-1"),
            requested_fields: ["email".to_string()].into_iter().collect(),
            purpose: "testing".into(),
            requested_duration_days: 30,
            risk_score: 10,
            status: RequestStatus::Pending,
            created_at: Timestamp::from_seconds(created),
        }
    }

    #[test]
    fn test_service_insert_and_duplicate() {
        let store = MemoryStore::new();
        ServiceStore::insert(&store, &make_service("svc-1", true)).unwrap();
        let err = ServiceStore::insert(&store, &make_service("svc-1", true)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        assert!(ServiceStore::get(&store, &ServiceId::new("svc-1"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_service_set_active() {
        let store = MemoryStore::new();
        ServiceStore::insert(&store, &make_service("svc-1", true)).unwrap();
        assert!(store.set_active(&ServiceId::new("svc-1"), false).unwrap());
        assert!(!ServiceStore::get(&store, &ServiceId::new("svc-1"))
            .unwrap()
            .unwrap()
            .active);
        assert!(!store.set_active(&ServiceId::new("missing"), false).unwrap());
    }

    #[test]
    fn test_issue_superseding_replaces_prior_active() {
        let store = MemoryStore::new();
        let now = Timestamp::from_seconds(100);
        let first = make_grant("g-1", "s-1", "svc-1", 1_000);
        assert!(store.issue_superseding(&first, now).unwrap().is_none());

        let second = make_grant("g-2", "s-1", "svc-1", 2_000);
        let superseded = store.issue_superseding(&second, now).unwrap().unwrap();
        assert_eq!(superseded.id, first.id);
        assert!(matches!(superseded.state, GrantState::Superseded { .. }));

        // Exactly one active grant remains for the pair.
        let active = store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(
            store.count_active_by_student(&StudentId::new("s-1")).unwrap(),
            1
        );
    }

    #[test]
    fn test_find_active_returns_revoked_but_not_superseded() {
        let store = MemoryStore::new();
        let now = Timestamp::from_seconds(100);
        store
            .issue_superseding(&make_grant("g-1", "s-1", "svc-1", 1_000), now)
            .unwrap();
        store
            .update_state(
                &GrantId::new("g-1"),
                &GrantState::Revoked { at: now, reason: None },
            )
            .unwrap();

        // Revoked grants stay visible so the guard can report revocation.
        let found = store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .unwrap();
        assert!(found.state.is_revoked());

        store
            .update_state(&GrantId::new("g-1"), &GrantState::Superseded { at: now })
            .unwrap();
        assert!(store
            .find_active(&StudentId::new("s-1"), &ServiceId::new("svc-1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_supersession_only_touches_same_pair() {
        let store = MemoryStore::new();
        let now = Timestamp::from_seconds(100);
        store
            .issue_superseding(&make_grant("g-1", "s-1", "svc-1", 1_000), now)
            .unwrap();
        store
            .issue_superseding(&make_grant("g-2", "s-1", "svc-2", 1_000), now)
            .unwrap();
        assert_eq!(
            store.count_active_by_student(&StudentId::new("s-1")).unwrap(),
            2
        );
    }

    #[test]
    fn test_sweep_expired_is_idempotent() {
        let store = MemoryStore::new();
        let now = Timestamp::from_seconds(5_000);
        store
            .issue_superseding(&make_grant("g-old", "s-1", "svc-1", 1_000), now)
            .unwrap();
        store
            .issue_superseding(&make_grant("g-live", "s-1", "svc-2", 9_000), now)
            .unwrap();

        let flipped = store.sweep_expired(now).unwrap();
        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].id, GrantId::new("g-old"));

        // A second sweep finds nothing left to flip.
        assert!(store.sweep_expired(now).unwrap().is_empty());
    }

    #[test]
    fn test_history_pagination_and_filter() {
        let store = MemoryStore::new();
        for i in 0..5 {
            RequestStore::insert(&store, &make_request(&format!("r-{}", i), "s-1", 100 + i))
                .unwrap();
        }
        RequestStore::insert(&store, &make_request("r-other", "s-2", 50)).unwrap();

        let page = PageRequest::new(1, 2);
        let (items, total) = store
            .list_history(&StudentId::new("s-1"), &HistoryFilter::default(), &page)
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(items.len(), 2);
        // Newest first.
        assert_eq!(items[0].id, RequestId::new("r-4"));

        let filter = HistoryFilter {
            status: Some("pending".into()),
            ..Default::default()
        };
        let (_, total) = store
            .list_history(&StudentId::new("s-1"), &filter, &page)
            .unwrap();
        assert_eq!(total, 5);

        let filter = HistoryFilter {
            from: Some(Timestamp::from_seconds(103)),
            ..Default::default()
        };
        let (items, total) = store
            .list_history(&StudentId::new("s-1"), &filter, &PageRequest::new(1, 10))
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_audit_store_limit_and_ordering() {
        let store = MemoryStore::new();
        let entries: Vec<AuditEntry> = (0..4)
            .map(|i| AuditEntry {
                id: AuditEntryId::new(format!("a-{}", i)),
                action: AuditAction::AccessChecked,
                student_id: StudentId::new("s-1"),
                service_id: None,
                request_id: None,
                grant_id: None,
                ip_address: None,
                user_agent: None,
                metadata: serde_json::Value::Null,
                timestamp: Timestamp::from_seconds(100 + i),
            })
            .collect();
        store.append_batch(&entries).unwrap();

        let listed = store.list_by_student(&StudentId::new("s-1"), 2).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, AuditEntryId::new("a-3"));
    }

    #[test]
    fn test_memory_audit_sink_records() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEntry {
            id: AuditEntryId::new("a-1"),
            action: AuditAction::RequestCreated,
            student_id: StudentId::new("s-1"),
            service_id: None,
            request_id: None,
            grant_id: None,
            ip_address: None,
            user_agent: None,
            metadata: serde_json::Value::Null,
            timestamp: Timestamp::from_seconds(1),
        })
        .unwrap();
        assert_eq!(sink.entries().len(), 1);
        sink.clear();
        assert!(sink.entries().is_empty());
    }
}
