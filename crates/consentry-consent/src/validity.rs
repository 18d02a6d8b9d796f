//! The single authoritative "is this grant currently valid" predicate.
//!
//! The access guard, the expiry sweep, and the listing projections all
//! classify grants through this function; no call site compares `expires_at`
//! or inspects revocation on its own.

use consentry_core::{ConsentGrant, GrantState, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantValidity {
    /// Not expired, not revoked: the grant currently authorizes access.
    Valid,
    /// Past `expires_at`, or already flipped to stored-Expired by the sweep.
    Expired,
    Revoked,
}

/// Classify a grant at an instant. Expiry is evaluated against `expires_at`
/// at query time, so a grant past its expiry but not yet swept is already
/// classified Expired here. Expiry is checked before revocation, matching the
/// access guard's contracted evaluation order.
pub fn grant_validity(grant: &ConsentGrant, now: Timestamp) -> GrantValidity {
    if now > grant.expires_at {
        return GrantValidity::Expired;
    }
    match &grant.state {
        GrantState::Revoked { .. } => GrantValidity::Revoked,
        GrantState::Expired { .. } | GrantState::Superseded { .. } => GrantValidity::Expired,
        GrantState::Active => GrantValidity::Valid,
    }
}
