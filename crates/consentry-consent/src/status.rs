//! Grant state machine with valid transitions.
//!
//! States: Active, Superseded, Expired, Revoked.
//! Terminal states: Superseded, Revoked (no outbound transitions).
//!
//! Valid transitions:
//!   Active  -> Superseded (new grant issued for the same pair)
//!   Active  -> Expired    (sweep past expires_at)
//!   Active  -> Revoked
//!   Expired -> Revoked    (student can still revoke an unswept/past grant)

use consentry_core::{EngineError, EngineResult, GrantState, Timestamp};

pub fn is_valid_transition(from: &GrantState, to: &GrantState) -> bool {
    matches!(
        (from, to),
        (GrantState::Active, GrantState::Superseded { .. })
            | (GrantState::Active, GrantState::Expired { .. })
            | (GrantState::Active, GrantState::Revoked { .. })
            | (GrantState::Expired { .. }, GrantState::Revoked { .. })
    )
}

/// Attempt a state transition, returning the new state or a Conflict.
pub fn transition(from: &GrantState, to: GrantState) -> EngineResult<GrantState> {
    if is_valid_transition(from, &to) {
        Ok(to)
    } else {
        Err(EngineError::Conflict(format!(
            "grant transition {} -> {} is not allowed",
            from.label(),
            to.label()
        )))
    }
}

/// Transition to Revoked. Revocation is immediate and irreversible; an
/// already-revoked grant is a Conflict, never silently overwritten.
pub fn revoke(from: &GrantState, at: Timestamp, reason: Option<String>) -> EngineResult<GrantState> {
    if from.is_revoked() {
        return Err(EngineError::Conflict(
            "grant has already been revoked".to_string(),
        ));
    }
    transition(from, GrantState::Revoked { at, reason })
}

/// Transition to Expired (sweep).
pub fn expire(from: &GrantState, noted_at: Timestamp) -> EngineResult<GrantState> {
    transition(from, GrantState::Expired { noted_at })
}

/// Transition to Superseded (replaced by a newer grant for the pair).
pub fn supersede(from: &GrantState, at: Timestamp) -> EngineResult<GrantState> {
    transition(from, GrantState::Superseded { at })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: u64) -> Timestamp {
        Timestamp::from_seconds(s)
    }

    #[test]
    fn test_active_can_reach_all_successors() {
        assert!(is_valid_transition(&GrantState::Active, &GrantState::Superseded { at: ts(1) }));
        assert!(is_valid_transition(&GrantState::Active, &GrantState::Expired { noted_at: ts(1) }));
        assert!(is_valid_transition(
            &GrantState::Active,
            &GrantState::Revoked { at: ts(1), reason: None }
        ));
    }

    #[test]
    fn test_revoked_is_terminal() {
        let revoked = GrantState::Revoked { at: ts(1), reason: None };
        assert!(!is_valid_transition(&revoked, &GrantState::Active));
        assert!(!is_valid_transition(&revoked, &GrantState::Expired { noted_at: ts(2) }));
        assert!(!is_valid_transition(
            &revoked,
            &GrantState::Revoked { at: ts(2), reason: None }
        ));
    }

    #[test]
    fn test_superseded_is_terminal() {
        let superseded = GrantState::Superseded { at: ts(1) };
        assert!(!is_valid_transition(
            &superseded,
            &GrantState::Revoked { at: ts(2), reason: None }
        ));
        assert!(!is_valid_transition(&superseded, &GrantState::Active));
    }

    #[test]
    fn test_expired_can_still_be_revoked() {
        let expired = GrantState::Expired { noted_at: ts(1) };
        let revoked = revoke(&expired, ts(2), Some("cleanup".into())).unwrap();
        assert!(revoked.is_revoked());
    }

    #[test]
    fn test_double_revoke_is_conflict() {
        let revoked = GrantState::Revoked { at: ts(1), reason: None };
        let err = revoke(&revoked, ts(2), None).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn test_expire_from_superseded_rejected() {
        let superseded = GrantState::Superseded { at: ts(1) };
        assert!(expire(&superseded, ts(2)).is_err());
    }

    #[test]
    fn test_supersede_active() {
        let next = supersede(&GrantState::Active, ts(5)).unwrap();
        assert_eq!(next, GrantState::Superseded { at: ts(5) });
    }
}
