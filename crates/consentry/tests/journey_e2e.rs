//! End-to-end journey tests covering the primary consent flows.
//!
//! Journey 1: request, partial approval, field-level access checks
//! Journey 2: supersession keeps one active grant per (student, service)
//! Journey 3: revocation blocks access and feeds the risk event queue
//! Journey 4: expiry sweep flips grants and the guard reports expiry
//! Journey 5: concurrent approvals race down to a single active grant

use std::collections::BTreeSet;
use std::sync::Arc;

use consentry::{ConsentEngine, EngineConfig};
use consentry_consent::{
    AccessGuard, ConsentDecision, GrantManager, RequestContext, RequestOutcome, RiskEventQueue,
    REASON_EXPIRED, REASON_FIELD_NOT_APPROVED, REASON_NO_GRANT, REASON_REVOKED,
};
use consentry_core::{
    AuditAction, ConsentRequest, MemoryAuditSink, RequestId, RequestStatus, RiskCategory,
    RiskEventKind, Service, ServiceId, StudentId, Timestamp,
};

fn make_engine() -> ConsentEngine {
    ConsentEngine::in_memory(&EngineConfig::default()).unwrap()
}

fn register_service(engine: &ConsentEngine, name: &str, risk: RiskCategory) -> Service {
    engine.register_service(name, None, risk).unwrap()
}

fn full_approval() -> ConsentDecision {
    ConsentDecision::Approve {
        modified_fields: None,
        modified_duration_days: None,
        denied_fields: None,
    }
}

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Journey 1: request, partial approval, field-level access
// ============================================================================

#[test]
fn test_journey_request_partial_approval_access() {
    let engine = make_engine();
    let service = register_service(&engine, "Tutoring Platform", RiskCategory::Medium);
    let student = StudentId::new("student-1");

    // No grant yet: everything is denied with the no-grant reason.
    let decision = engine.check_access(&student, &service.id, "email").unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some(REASON_NO_GRANT));

    let (request, assessment) = engine
        .create_request(
            &student,
            &service.id,
            fields(&["email", "gpa", "ssn"]),
            "course placement and advising".into(),
            90,
            None,
            &RequestContext {
                ip_address: Some("203.0.113.9".into()),
                user_agent: Some("portal/1.0".into()),
            },
        )
        .unwrap();
    assert!(request.status.is_pending());
    assert_eq!(request.risk_score, assessment.score);
    assert!(assessment.score > 0);
    assert_eq!(engine.list_pending(&student).unwrap().len(), 1);

    // The student narrows the approval to email and gpa for 30 days.
    let outcome = engine
        .respond(
            &request.id,
            &student,
            ConsentDecision::Approve {
                modified_fields: Some(
                    ["email", "gpa"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
                ),
                modified_duration_days: Some(30),
                denied_fields: None,
            },
            &RequestContext::default(),
        )
        .unwrap();
    let grant = match outcome {
        RequestOutcome::Approved { grant, .. } => grant,
        RequestOutcome::Denied { .. } => panic!("expected approval"),
    };
    assert_eq!(grant.approved_fields.len(), 2);

    // Approved fields pass; the narrowed-out field is denied with the
    // field-level reason, not a validity reason.
    assert!(engine.check_access(&student, &service.id, "email").unwrap().allowed);
    assert!(engine.check_access(&student, &service.id, "gpa").unwrap().allowed);
    let denied = engine.check_access(&student, &service.id, "ssn").unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.reason.as_deref(), Some(REASON_FIELD_NOT_APPROVED));

    // Multi-field check partitions the input exactly.
    let multi = engine
        .check_multi_access(&student, &service.id, &fields(&["email", "ssn", "gpa"]))
        .unwrap();
    assert!(!multi.all_allowed);
    assert_eq!(multi.allowed_fields, fields(&["email", "gpa"]));
    assert_eq!(multi.denied_fields, fields(&["ssn"]));
    assert_eq!(multi.results.len(), 3);

    let mut accessible = engine.get_accessible_fields(&student, &service.id).unwrap();
    accessible.sort();
    assert_eq!(accessible, fields(&["email", "gpa"]));

    // The audit trail captured the whole journey.
    let logs = engine.list_audit_logs(&student, 50).unwrap();
    for action in [
        AuditAction::RequestCreated,
        AuditAction::RequestApproved,
        AuditAction::GrantIssued,
        AuditAction::AccessChecked,
        AuditAction::AccessDenied,
    ] {
        assert!(
            logs.iter().any(|e| e.action == action),
            "missing audit action {:?}",
            action
        );
    }

    let events = engine.drain_risk_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, RiskEventKind::ConsentApproved);

    engine.shutdown().unwrap();
}

// ============================================================================
// Journey 2: supersession
// ============================================================================

#[test]
fn test_journey_second_approval_supersedes() {
    let engine = make_engine();
    let service = register_service(&engine, "Scholarship Finder", RiskCategory::Low);
    let student = StudentId::new("student-2");
    let ctx = RequestContext::default();

    let (first, _) = engine
        .create_request(&student, &service.id, fields(&["email"]), "alerts".into(), 30, None, &ctx)
        .unwrap();
    engine.respond(&first.id, &student, full_approval(), &ctx).unwrap();

    let (second, _) = engine
        .create_request(
            &student,
            &service.id,
            fields(&["email", "gpa"]),
            "matching".into(),
            60,
            None,
            &ctx,
        )
        .unwrap();
    engine.respond(&second.id, &student, full_approval(), &ctx).unwrap();

    // Exactly one active grant, issued from the second request.
    let active = engine.list_active_grants(&student).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].request_id, second.id);

    let logs = engine.list_audit_logs(&student, 50).unwrap();
    assert!(logs.iter().any(|e| e.action == AuditAction::GrantSuperseded));

    engine.shutdown().unwrap();
}

// ============================================================================
// Journey 3: revocation
// ============================================================================

#[test]
fn test_journey_revocation_blocks_access() {
    let engine = make_engine();
    let service = register_service(&engine, "Housing Portal", RiskCategory::High);
    let student = StudentId::new("student-3");
    let ctx = RequestContext::default();

    let (request, _) = engine
        .create_request(&student, &service.id, fields(&["address"]), "placement".into(), 30, None, &ctx)
        .unwrap();
    let outcome = engine.respond(&request.id, &student, full_approval(), &ctx).unwrap();
    let grant = match outcome {
        RequestOutcome::Approved { grant, .. } => grant,
        RequestOutcome::Denied { .. } => panic!("expected approval"),
    };
    assert!(engine.check_access(&student, &service.id, "address").unwrap().allowed);
    engine.drain_risk_events().unwrap();

    let revoked = engine
        .revoke(&grant.id, &student, Some("moved out".into()))
        .unwrap();
    assert!(revoked.state.is_revoked());

    let decision = engine.check_access(&student, &service.id, "address").unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some(REASON_REVOKED));
    assert!(engine.list_active_grants(&student).unwrap().is_empty());
    assert!(!engine.has_active_grant(&student, &service.id).unwrap());

    let events = engine.drain_risk_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, RiskEventKind::ConsentRevoked);

    // Revocation is terminal.
    let err = engine.revoke(&grant.id, &student, None).unwrap_err();
    assert!(matches!(err, consentry_core::EngineError::Conflict(_)));

    engine.shutdown().unwrap();
}

// ============================================================================
// Journey 4: expiry sweep
// ============================================================================

// The engine facade clocks everything at Timestamp::now() and the minimum
// grant duration is a day, so the expiry journey drives the managers directly
// with explicit timestamps over the SQLite store.
#[test]
fn test_journey_expiry_sweep_and_guard() {
    let store = Arc::new(consentry::SqliteStore::in_memory().unwrap());
    let sink = Arc::new(MemoryAuditSink::new());
    let queue = Arc::new(RiskEventQueue::new());
    let manager = GrantManager::new(store.clone(), store.clone(), sink.clone(), queue);
    let guard = AccessGuard::new(store.clone(), sink.clone());

    let student = StudentId::new("student-4");
    let service = ServiceId::new("svc-archive");
    let issued = Timestamp::from_seconds(1_000);
    let request = ConsentRequest {
        id: RequestId::new("req-1"),
        student_id: student.clone(),
        service_id: service.clone(),
        requested_fields: ["transcript".to_string()].into_iter().collect(),
        purpose: "records transfer".into(),
        requested_duration_days: 1,
        risk_score: 40,
        status: RequestStatus::Pending,
        created_at: issued,
    };
    manager
        .issue(&request, request.requested_fields.clone(), 1, issued)
        .unwrap();

    // The sweep flips the grant once; a second sweep is a no-op.
    let later = issued.plus_days(2);
    assert_eq!(manager.process_expired(later).unwrap(), 1);
    assert_eq!(manager.process_expired(later).unwrap(), 0);
    let expired_audits = sink
        .entries()
        .iter()
        .filter(|e| e.action == AuditAction::GrantExpired)
        .count();
    assert_eq!(expired_audits, 1);

    // The guard reports expiry, not absence, for the swept grant.
    let decision = guard.check_field_access(&student, &service, "transcript").unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.reason.as_deref(), Some(REASON_EXPIRED));
    assert!(manager.list_valid(&student, later).unwrap().is_empty());
}

// ============================================================================
// Journey 5: concurrent approvals
// ============================================================================

#[test]
fn test_journey_concurrent_approvals_single_active_grant() {
    let engine = Arc::new(make_engine());
    let service = register_service(&engine, "Racing Service", RiskCategory::Low);
    let student = StudentId::new("student-5");
    let ctx = RequestContext::default();

    let requests: Vec<_> = (0..8)
        .map(|i| {
            engine
                .create_request(
                    &student,
                    &service.id,
                    fields(&["email"]),
                    format!("attempt {}", i),
                    30,
                    None,
                    &ctx,
                )
                .unwrap()
                .0
        })
        .collect();

    std::thread::scope(|scope| {
        for request in &requests {
            let engine = engine.clone();
            let student = student.clone();
            scope.spawn(move || {
                engine
                    .respond(&request.id, &student, full_approval(), &RequestContext::default())
                    .unwrap();
            });
        }
    });

    // However the approvals interleaved, exactly one grant is left active.
    let active = engine.list_active_grants(&student).unwrap();
    assert_eq!(active.len(), 1);

    let logs = engine.list_audit_logs(&student, 100).unwrap();
    let issued = logs.iter().filter(|e| e.action == AuditAction::GrantIssued).count();
    let superseded = logs
        .iter()
        .filter(|e| e.action == AuditAction::GrantSuperseded)
        .count();
    assert_eq!(issued, 8);
    assert_eq!(superseded, 7);

    engine.shutdown().unwrap();
}
