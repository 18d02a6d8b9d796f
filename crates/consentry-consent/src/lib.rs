//! Consentry Consent Engine
//!
//! The consent lifecycle for student data sharing: services request field
//! access, students answer once (approve, narrow, or deny), approvals mint
//! time-bounded grants, and the access guard checks every field read against
//! the student's standing grant.
//!
//! A student holds at most one active grant per service; approving a new
//! request supersedes the prior grant atomically in the store. Grants end by
//! expiry or revocation, and every decision is recorded through the audit
//! sink. Denied access is reported as structured data, never as an error.

pub mod events;
pub mod grants;
pub mod guard;
pub mod lifecycle;
pub mod status;
pub mod validity;

// Re-export primary types and functions for convenience
pub use events::RiskEventQueue;
pub use grants::GrantManager;
pub use guard::{
    AccessDecision, AccessGuard, FieldDecision, GrantInfo, MultiAccessDecision,
    REASON_EXPIRED, REASON_FIELD_NOT_APPROVED, REASON_NO_GRANT, REASON_REVOKED,
};
pub use lifecycle::{
    ConsentDecision, ConsentLifecycle, LifecycleConfig, RequestContext, RequestOutcome,
};
pub use status::{expire, is_valid_transition, revoke, supersede, transition};
pub use validity::{grant_validity, GrantValidity};
