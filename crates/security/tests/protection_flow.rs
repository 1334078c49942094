//! End-to-end protection flow: scan a message, escalate the violation,
//! and gate the AI spend that processing it would incur.

use bidguard_config::AppConfig;
use bidguard_core::event::{EventBus, SecurityEvent};
use bidguard_core::store::ViolationStore;
use bidguard_core::violation::{
    AccountStatus, EnforcementAction, RiskLevel, Severity, ViolationCategory,
};
use bidguard_security::{ContentScanner, CostCircuitBreaker, ViolationEscalationEngine};
use bidguard_storage::InMemoryStore;
use std::sync::Arc;

fn map_severity(risk: RiskLevel) -> Severity {
    match risk {
        RiskLevel::High => Severity::High,
        RiskLevel::Medium => Severity::Medium,
        RiskLevel::Low => Severity::Low,
    }
}

#[tokio::test]
async fn scan_escalate_and_gate_costs() {
    let config = AppConfig::default();
    let store = Arc::new(InMemoryStore::new());
    let bus = EventBus::new(config.events.capacity);
    let mut rx = bus.subscribe();

    let scanner = ContentScanner::with_defaults().unwrap();
    let engine = ViolationEscalationEngine::new(
        config.escalation.clone(),
        store.clone(),
        bus.clone(),
    )
    .unwrap();
    let breaker = CostCircuitBreaker::new(config.cost.clone(), store.clone(), bus.clone());

    // The AI-powered intake pass is gated before it runs.
    let decision = breaker.check(0.03, "message_scan", Some("user-42"));
    assert!(decision.approved);

    let message = "Call me at 555-123-4567 about the bathroom remodel";
    let result = scanner.scan(message, None);
    breaker.record(0.025, "message_scan");

    assert!(result.violations_found);
    assert_eq!(result.risk_level, RiskLevel::High);
    assert!(result
        .matches
        .iter()
        .any(|m| m.category == ViolationCategory::PhoneNumber));
    assert!(result
        .matches
        .iter()
        .any(|m| m.category == ViolationCategory::ContactIntent));
    assert!(!result.redacted_text.chars().any(|c| c.is_ascii_digit()));
    assert!(result.redacted_text.contains("bathroom remodel"));

    // The scan outcome drives escalation: high risk, first offense.
    let category = result.matches[0].category;
    let record = engine
        .process_violation(
            "user-42",
            category,
            &result.redacted_text,
            map_severity(result.risk_level),
        )
        .await
        .unwrap();

    // High severity (3 points) from a clean slate lands on the
    // suspension rung.
    assert_eq!(record.escalation_level_after, 3);
    assert_eq!(
        record.action_taken,
        EnforcementAction::AccountSuspension { duration_hours: Some(168) }
    );
    // The excerpt stored is the redacted text, never the raw message.
    assert!(!record.content_excerpt.contains("555"));

    let profile = store.get_user_profile("user-42").await.unwrap().unwrap();
    assert_eq!(profile.escalation_level, 3);
    assert_eq!(profile.account_status, AccountStatus::Suspended);

    // One more high-severity violation is terminal.
    let record = engine
        .process_violation("user-42", category, "[PHONE NUMBER BLOCKED] again", Severity::High)
        .await
        .unwrap();
    assert_eq!(record.action_taken, EnforcementAction::PermanentBan);

    let profile = store.get_user_profile("user-42").await.unwrap().unwrap();
    assert_eq!(profile.account_status, AccountStatus::Banned);
    assert_eq!(profile.total_violations, 2);

    // The bus saw the record, the admin alert, and the user notification.
    let mut topics = Vec::new();
    while let Ok(event) = rx.try_recv() {
        topics.push(event.topic());
        if let SecurityEvent::ViolationRecorded { record } = event.as_ref() {
            assert_eq!(record.user_id, "user-42");
        }
    }
    assert!(topics.contains(&"security.violations"));
    assert!(topics.contains(&"security.alerts"));
    assert!(topics.contains(&"security.notifications"));
}

#[tokio::test]
async fn redacted_output_is_safe_to_rescan_and_store() {
    let scanner = ContentScanner::with_defaults().unwrap();

    let messages = [
        "My number is 555-123-4567, text me anytime",
        "Email john [at] gmail [dot] com or find me on instagram",
        "Let's talk offline - whatsapp me",
    ];

    for message in messages {
        let first = scanner.scan(message, None);
        assert!(first.violations_found, "expected violation in: {message}");

        let second = scanner.scan(&first.redacted_text, None);
        assert!(
            !second.violations_found,
            "redacted text re-flagged for {message}: {:?}",
            second.matches
        );
    }
}

#[tokio::test]
async fn breaker_shutdown_halts_spend_until_reset() {
    let mut config = AppConfig::default();
    config.cost.per_event_limit = 200.0;
    config.cost.daily_limit = 100.0;
    config.cost.hourly_limit = 1000.0;
    config.cost.emergency_threshold = 150.0;
    config.cost.admin_key_sha256 = Some(bidguard_security::audit::sha256_hex("ops-key"));

    let store = Arc::new(InMemoryStore::new());
    let bus = EventBus::new(64);
    let breaker = CostCircuitBreaker::new(config.cost.clone(), store, bus);

    breaker.record(120.0, "batch_rescan");
    let rejected = breaker.check(40.0, "llm_call", None);
    assert!(!rejected.approved);

    // Tripped: even trivial spend is refused.
    assert!(!breaker.check(0.01, "llm_call", None).approved);

    breaker.reset("ops-key", "reviewed by on-call").unwrap();
    // Closed again, but the daily ceiling still reflects committed spend.
    let decision = breaker.check(0.01, "llm_call", None);
    assert!(!decision.approved);
}
