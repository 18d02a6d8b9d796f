use crate::error::EngineResult;
use crate::types::{
    AuditEntry, ConsentGrant, ConsentRequest, GrantId, GrantState, HistoryFilter, PageRequest,
    RequestId, RequestStatus, Service, ServiceId, StudentId, Timestamp,
};

// ---------------------------------------------------------------------------
// ServiceStore — registry of third-party services
// ---------------------------------------------------------------------------

pub trait ServiceStore: Send + Sync {
    fn insert(&self, service: &Service) -> EngineResult<()>;
    fn get(&self, id: &ServiceId) -> EngineResult<Option<Service>>;
    fn list(&self) -> EngineResult<Vec<Service>>;
    /// Flip the activation toggle. Returns false if the service is unknown.
    fn set_active(&self, id: &ServiceId, active: bool) -> EngineResult<bool>;
}

// ---------------------------------------------------------------------------
// RequestStore — consent requests, one-shot historical records
// ---------------------------------------------------------------------------

pub trait RequestStore: Send + Sync {
    fn insert(&self, request: &ConsentRequest) -> EngineResult<()>;
    fn get(&self, id: &RequestId) -> EngineResult<Option<ConsentRequest>>;
    /// Persist the request's one-time response. Returns false if unknown.
    fn update_status(&self, id: &RequestId, status: &RequestStatus) -> EngineResult<bool>;
    fn list_pending(&self, student: &StudentId) -> EngineResult<Vec<ConsentRequest>>;
    /// Filtered, paginated history for a student, newest first. Returns the
    /// page of items and the total matching count from persisted state.
    fn list_history(
        &self,
        student: &StudentId,
        filter: &HistoryFilter,
        page: &PageRequest,
    ) -> EngineResult<(Vec<ConsentRequest>, u64)>;
}

// ---------------------------------------------------------------------------
// GrantStore — grants, with the supersession critical section
// ---------------------------------------------------------------------------

pub trait GrantStore: Send + Sync {
    /// Insert `grant`, first superseding any stored-Active grant for the same
    /// (student, service) pair. The supersede-then-insert must be atomic:
    /// one transaction or one critical section, so two concurrent issues for
    /// the same pair cannot both leave an Active grant behind.
    ///
    /// Returns the prior grant that was superseded, if one existed.
    fn issue_superseding(
        &self,
        grant: &ConsentGrant,
        now: Timestamp,
    ) -> EngineResult<Option<ConsentGrant>>;

    fn get(&self, id: &GrantId) -> EngineResult<Option<ConsentGrant>>;

    /// Overwrite a grant's state. Returns false if the grant is unknown.
    fn update_state(&self, id: &GrantId, state: &GrantState) -> EngineResult<bool>;

    /// The latest-issued non-superseded grant for the pair. Revoked and
    /// stored-Expired grants are returned too so the guard can report why
    /// coverage lapsed rather than absence; validity is classified by the
    /// caller (expiry is evaluated against `expires_at`, not precomputed,
    /// so an unswept grant past its expiry still comes back here).
    fn find_active(
        &self,
        student: &StudentId,
        service: &ServiceId,
    ) -> EngineResult<Option<ConsentGrant>>;

    fn list_active_by_student(&self, student: &StudentId) -> EngineResult<Vec<ConsentGrant>>;

    fn count_active_by_student(&self, student: &StudentId) -> EngineResult<u64>;

    /// Flip every stored-Active grant with `expires_at <= now` to Expired and
    /// return exactly the grants flipped by this call. The state flip is the
    /// single source of truth, so overlapping sweeps never return the same
    /// grant twice.
    fn sweep_expired(&self, now: Timestamp) -> EngineResult<Vec<ConsentGrant>>;
}

// ---------------------------------------------------------------------------
// AuditStore — durable append-only audit persistence
// ---------------------------------------------------------------------------

pub trait AuditStore: Send + Sync {
    /// Append a batch of entries. All-or-nothing per batch; on failure the
    /// caller re-queues the batch for retry.
    fn append_batch(&self, entries: &[AuditEntry]) -> EngineResult<()>;

    /// Most recent entries for a student, newest first.
    fn list_by_student(&self, student: &StudentId, limit: u32) -> EngineResult<Vec<AuditEntry>>;
}

// ---------------------------------------------------------------------------
// AuditSink — synchronous recording seam consumed by the managers
// ---------------------------------------------------------------------------

/// Every lifecycle and access decision is recorded through this seam before
/// the triggering operation returns.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry) -> EngineResult<()>;
}
