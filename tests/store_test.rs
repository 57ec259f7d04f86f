//! Integration tests for the verification store lifecycle

use humansig::signal::ChannelScores;
use humansig::store::{
    AuditEventType, AuditFilter, ConstraintRequest, DelegationScope, DelegationStatus, Store,
    TokenStatus, DEMO_SITE_KEY,
};

fn human_channels() -> ChannelScores {
    ChannelScores {
        pointer: 0.7,
        scroll: 0.6,
        keystroke: 0.65,
        tremor: 0.5,
        coherence: 0.4,
    }
}

/// Complete a fresh session as human and return its id.
fn verified_session(store: &mut Store, score: f64) -> String {
    let session = store
        .create_session(DEMO_SITE_KEY, "203.0.113.7", "test-agent")
        .expect("session should open");
    store
        .complete_session(&session.id, score, human_channels())
        .expect("session should complete");
    session.id
}

#[test]
fn test_session_lifecycle() {
    let mut store = Store::new();

    let session = store
        .create_session(DEMO_SITE_KEY, "203.0.113.7", "test-agent")
        .unwrap();
    assert!(session.id.starts_with("ses_"));
    assert!(!session.is_human);
    assert!(session.token.is_empty());

    let completed = store
        .complete_session(&session.id, 0.82, human_channels())
        .unwrap();
    assert!(completed.is_human);
    assert!(completed.token.starts_with("hsg_tok_"));
    assert!(completed.completed_at.is_some());

    let verification = store.verify_token(&completed.token);
    assert!(verification.valid);
    assert_eq!(verification.session.unwrap().id, session.id);
}

#[test]
fn test_low_score_session_gets_no_token() {
    let mut store = Store::new();
    let session = store
        .create_session(DEMO_SITE_KEY, "203.0.113.7", "test-agent")
        .unwrap();
    let completed = store
        .complete_session(&session.id, 0.31, ChannelScores::default())
        .unwrap();
    assert!(!completed.is_human);
    assert!(completed.token.is_empty());

    // A low-score session cannot back a human token
    assert!(store
        .issue_token(&session.id, "user-1", "fp-1")
        .is_none());
}

#[test]
fn test_unknown_site_key_opens_no_session() {
    let mut store = Store::new();
    assert!(store
        .create_session("hsg_live_unknown", "203.0.113.7", "test-agent")
        .is_none());
}

#[test]
fn test_monthly_quota_exhaustion() {
    let mut store = Store::new();

    // Free plan allows 10,000 sessions per month
    for _ in 0..10_000 {
        assert!(store
            .create_session(DEMO_SITE_KEY, "203.0.113.7", "test-agent")
            .is_some());
    }
    assert!(store
        .create_session(DEMO_SITE_KEY, "203.0.113.7", "test-agent")
        .is_none());

    // Usage stops counting once the quota refuses the session
    let key = store.api_key_by_site_key(DEMO_SITE_KEY).unwrap();
    assert_eq!(key.usage.count, 10_000);
}

#[test]
fn test_verify_rejects_empty_and_unknown_tokens() {
    let mut store = Store::new();
    assert!(!store.verify_token("").valid);
    assert!(!store.verify_token("hsg_tok_bogus").valid);
}

#[test]
fn test_token_issuance_is_idempotent_per_user() {
    let mut store = Store::new();
    let first_session = verified_session(&mut store, 0.9);
    let second_session = verified_session(&mut store, 0.88);

    let first = store
        .issue_token(&first_session, "user-1", "fp-1")
        .unwrap();
    assert!(first.id.starts_with("htk_"));
    assert_eq!(first.refresh_count, 0);

    // Same user again: the existing token is refreshed, not duplicated
    let second = store
        .issue_token(&second_session, "user-1", "fp-1")
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.refresh_count, 1);
    assert!(second.expires_at >= first.expires_at);
    assert_eq!(store.list_tokens().len(), 1);
    assert_eq!(store.token_by_user("user-1").unwrap().id, first.id);
    assert!(store.token_by_user("user-2").is_none());
}

#[test]
fn test_refresh_requires_active_token() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();

    store.revoke_token(&token.id).unwrap();
    assert!(store.refresh_token(&token.id).is_none());
    assert_eq!(
        store.token(&token.id).unwrap().status,
        TokenStatus::Revoked
    );
}

#[test]
fn test_revoking_token_cascades_to_delegations() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();

    let d1 = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Read],
            ConstraintRequest::default(),
        )
        .unwrap();
    let d2 = store
        .create_delegation(
            &token.id,
            "agent-b",
            "Agent B",
            "platform-x",
            vec![DelegationScope::Purchase],
            ConstraintRequest::default(),
        )
        .unwrap();

    let cascade = store.revoke_token(&token.id).unwrap();
    assert_eq!(cascade, 2);
    assert_eq!(
        store.delegation(&d1.id).unwrap().status,
        DelegationStatus::Revoked
    );
    assert_eq!(
        store.delegation(&d2.id).unwrap().status,
        DelegationStatus::Revoked
    );

    // A delegation under a revoked token cannot authorize even if somehow active
    let decision = store.verify_delegation(&d1.id, "read", None, None);
    assert!(!decision.authorized);
    assert_eq!(decision.reason.as_deref(), Some("Delegation revoked"));
}

#[test]
fn test_delegation_defaults() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();

    let delegation = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Read],
            ConstraintRequest::default(),
        )
        .unwrap();

    assert_eq!(delegation.constraints.max_actions, 100);
    assert_eq!(delegation.constraints.max_spend, None);
    assert_eq!(delegation.constraints.allowed_domains, vec!["*"]);
    assert_eq!(delegation.status, DelegationStatus::Active);
}

#[test]
fn test_verify_delegation_consumes_actions_and_exhausts() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();

    let delegation = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Read],
            ConstraintRequest {
                max_actions: Some(2),
                ..Default::default()
            },
        )
        .unwrap();

    let first = store.verify_delegation(&delegation.id, "read", None, None);
    assert!(first.authorized);
    assert_eq!(first.delegation.unwrap().constraints.actions_used, 1);

    let second = store.verify_delegation(&delegation.id, "read", None, None);
    assert!(second.authorized);

    // Budget spent: the third attempt flips the delegation to exhausted
    let third = store.verify_delegation(&delegation.id, "read", None, None);
    assert!(!third.authorized);
    assert_eq!(third.reason.as_deref(), Some("Action limit reached"));
    assert_eq!(
        store.delegation(&delegation.id).unwrap().status,
        DelegationStatus::Exhausted
    );

    // And every attempt after that reports the exhausted status
    let fourth = store.verify_delegation(&delegation.id, "read", None, None);
    assert_eq!(fourth.reason.as_deref(), Some("Delegation exhausted"));
}

#[test]
fn test_verify_delegation_domain_allowlist() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();

    let delegation = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Purchase],
            ConstraintRequest {
                allowed_domains: Some(vec!["shop.example".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();

    let allowed = store.verify_delegation(&delegation.id, "purchase", Some("shop.example"), None);
    assert!(allowed.authorized);

    let blocked = store.verify_delegation(&delegation.id, "purchase", Some("evil.example"), None);
    assert!(!blocked.authorized);
    assert_eq!(blocked.reason.as_deref(), Some("Domain not allowed"));

    // A denial costs no action
    assert_eq!(
        store
            .delegation(&delegation.id)
            .unwrap()
            .constraints
            .actions_used,
        1
    );
}

#[test]
fn test_verify_delegation_spend_ceiling() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();

    let delegation = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Purchase],
            ConstraintRequest {
                max_spend: Some(100.0),
                ..Default::default()
            },
        )
        .unwrap();

    let first = store.verify_delegation(&delegation.id, "purchase", None, Some(60.0));
    assert!(first.authorized);

    // 60 already spent; another 60 would break the ceiling
    let second = store.verify_delegation(&delegation.id, "purchase", None, Some(60.0));
    assert!(!second.authorized);
    assert_eq!(second.reason.as_deref(), Some("Spend limit exceeded"));

    // But a smaller amount still fits
    let third = store.verify_delegation(&delegation.id, "purchase", None, Some(40.0));
    assert!(third.authorized);
    assert_eq!(
        third.delegation.unwrap().constraints.spent_amount,
        100.0
    );
}

#[test]
fn test_verify_unknown_delegation() {
    let mut store = Store::new();
    let decision = store.verify_delegation("del_missing", "read", None, None);
    assert!(!decision.authorized);
    assert_eq!(decision.reason.as_deref(), Some("Delegation not found"));
}

#[test]
fn test_audit_trail_records_lifecycle() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();
    let delegation = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Read],
            ConstraintRequest::default(),
        )
        .unwrap();
    store.verify_delegation(&delegation.id, "read", None, None);
    store.revoke_token(&token.id);

    let for_token = store.audit_entries(&AuditFilter {
        human_token_id: Some(token.id.clone()),
        ..Default::default()
    });
    let types: Vec<AuditEventType> = for_token.iter().map(|e| e.event_type).collect();

    // Newest first
    assert_eq!(
        types,
        vec![
            AuditEventType::TokenRevoked,
            AuditEventType::DelegationRevoked,
            AuditEventType::AgentAction,
            AuditEventType::DelegationCreated,
            AuditEventType::TokenIssued,
        ]
    );
}

#[test]
fn test_stats_reflect_activity() {
    let mut store = Store::new();
    let session_id = verified_session(&mut store, 0.9);
    let token = store.issue_token(&session_id, "user-1", "fp-1").unwrap();
    let delegation = store
        .create_delegation(
            &token.id,
            "agent-a",
            "Agent A",
            "platform-x",
            vec![DelegationScope::Purchase],
            ConstraintRequest {
                allowed_domains: Some(vec!["shop.example".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    store.verify_delegation(&delegation.id, "purchase", Some("shop.example"), None);
    store.verify_delegation(&delegation.id, "purchase", Some("evil.example"), None);

    let stats = store.stats();
    assert_eq!(stats.total_sessions, 1);
    assert_eq!(stats.completed_sessions, 1);
    assert_eq!(stats.human_verified, 1);
    assert!((stats.avg_score - 0.9).abs() < 1e-9);
    assert_eq!(stats.active_tokens, 1);
    assert_eq!(stats.active_delegations, 1);
    assert_eq!(stats.total_agent_actions, 1);
    assert_eq!(stats.blocked_agent_actions, 1);
}

/// End-to-end: a user verifies as human, delegates a single booking to a
/// travel agent, and the agent gets exactly one authorized action on the
/// allowed domain.
#[test]
fn test_single_use_booking_delegation() {
    let mut store = Store::new();

    let session_id = verified_session(&mut store, 0.92);
    let token = store
        .issue_token(&session_id, "traveler-7", "fp-laptop")
        .unwrap();

    let delegation = store
        .create_delegation(
            &token.id,
            "trip-bot",
            "Trip Bot",
            "agent-hub",
            vec![DelegationScope::TravelBooking],
            ConstraintRequest {
                max_actions: Some(1),
                max_spend: Some(500.0),
                allowed_domains: Some(vec!["airline.com".to_string()]),
                duration_minutes: Some(30),
                ..Default::default()
            },
        )
        .unwrap();

    let booking = store.verify_delegation(
        &delegation.id,
        "book_flight",
        Some("airline.com"),
        Some(340.0),
    );
    assert!(booking.authorized);
    assert_eq!(booking.human_token.unwrap().user_id, "traveler-7");

    // The single action is spent; a second booking is refused
    let retry = store.verify_delegation(
        &delegation.id,
        "book_flight",
        Some("airline.com"),
        Some(100.0),
    );
    assert!(!retry.authorized);
    assert_eq!(retry.reason.as_deref(), Some("Action limit reached"));
}
