//! Audit logging — structured security event logging.
//!
//! Records security-relevant events for monitoring and compliance. Entries
//! carry one-way hashes where content is involved; raw scanned text never
//! enters the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Entries kept in memory before the oldest are dropped.
const MAX_ENTRIES: usize = 10_000;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    /// Who or what caused the event ("system", a user id, an admin id).
    pub actor: String,
    pub outcome: AuditOutcome,
    pub details: Option<String>,
}

/// Types of auditable security events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A scan found contact-sharing signals (hash of content, never the text)
    ContentScanned {
        content_hash: String,
        risk_level: String,
        categories: Vec<String>,
    },
    /// A violation was escalated and recorded
    ViolationProcessed { user_id: String, escalation_level: u32 },
    /// An enforcement action was applied to an account
    EnforcementApplied { user_id: String, action: String },
    /// An enforcement action failed delivery and was parked for retry
    EnforcementDeferred { user_id: String, action: String },
    /// A cost request was rejected
    CostRejected { reason: String },
    /// The cost breaker tripped
    EmergencyShutdown { reason: String },
    /// The cost breaker was reset by an administrator
    BreakerReset { reason: String },
    /// A user's escalation state was reset by an administrator
    EscalationReset { user_id: String },
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

/// Trait for audit log sinks (where events are written).
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditEntry);
}

/// In-memory audit log with pluggable sinks.
///
/// Entries are bounded at [`MAX_ENTRIES`]; the durable audit trail is the
/// violation/cost record store, not this buffer.
pub struct SecurityAuditLog {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
    sinks: Vec<Box<dyn AuditSink>>,
}

impl std::fmt::Debug for SecurityAuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("SecurityAuditLog")
            .field("entry_count", &count)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityAuditLog {
    /// Create a new audit log with no sinks.
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
            sinks: Vec::new(),
        }
    }

    /// Create a new audit log with the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn AuditSink>>) -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
            sinks,
        }
    }

    /// Record an audit event. Infallible by design: audit recording is a
    /// fire-and-forget side channel and must never fail the operation
    /// being audited.
    pub fn log(&self, event: AuditEvent, actor: &str, outcome: AuditOutcome, details: Option<String>) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
            actor: actor.into(),
            outcome,
            details,
        };

        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= MAX_ENTRIES {
                entries.remove(0);
            }
            entries.push(entry.clone());
        }

        for sink in &self.sinks {
            sink.record(&entry);
        }
    }

    /// Get all recorded entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Get entries filtered by outcome.
    pub fn entries_by_outcome(&self, outcome: &AuditOutcome) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|e| &e.outcome == outcome)
            .collect()
    }

    /// Count of stored entries.
    pub fn count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

/// A tracing-based audit sink that logs entries via `tracing::info!`.
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, entry: &AuditEntry) {
        tracing::info!(
            event = ?entry.event,
            actor = %entry.actor,
            outcome = ?entry.outcome,
            details = ?entry.details,
            "AUDIT"
        );
    }
}

/// Lowercase hex SHA-256 of the input. Used for privacy-preserving content
/// references and admin-key verification.
pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_and_retrieve_entries() {
        let log = SecurityAuditLog::new();
        log.log(
            AuditEvent::ViolationProcessed {
                user_id: "user-1".into(),
                escalation_level: 2,
            },
            "system",
            AuditOutcome::Success,
            None,
        );
        log.log(
            AuditEvent::CostRejected {
                reason: "PER_EVENT_EXCEEDED".into(),
            },
            "system",
            AuditOutcome::Denied,
            Some("estimated $6.00".into()),
        );

        assert_eq!(log.count(), 2);
        let denied = log.entries_by_outcome(&AuditOutcome::Denied);
        assert_eq!(denied.len(), 1);
        assert!(matches!(denied[0].event, AuditEvent::CostRejected { .. }));
    }

    #[test]
    fn custom_sink_receives_events() {
        use std::sync::{Arc, Mutex};

        struct TestSink {
            received: Arc<Mutex<Vec<String>>>,
        }

        impl AuditSink for TestSink {
            fn record(&self, entry: &AuditEntry) {
                self.received.lock().unwrap().push(entry.actor.clone());
            }
        }

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = TestSink {
            received: received.clone(),
        };
        let log = SecurityAuditLog::with_sinks(vec![Box::new(sink)]);

        log.log(
            AuditEvent::BreakerReset {
                reason: "false alarm".into(),
            },
            "admin-7",
            AuditOutcome::Success,
            None,
        );

        let seen = received.lock().unwrap();
        assert_eq!(seen.as_slice(), ["admin-7"]);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let events = vec![
            AuditEvent::ContentScanned {
                content_hash: "ab".repeat(32),
                risk_level: "high".into(),
                categories: vec!["phone_number".into()],
            },
            AuditEvent::EnforcementApplied {
                user_id: "u1".into(),
                action: "permanent_ban".into(),
            },
            AuditEvent::EmergencyShutdown {
                reason: "threshold crossed".into(),
            },
            AuditEvent::EscalationReset { user_id: "u2".into() },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: AuditEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn sha256_hex_is_stable_and_one_way() {
        let hash = sha256_hex("Call me at 555-123-4567");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, sha256_hex("Call me at 555-123-4567"));
        assert_ne!(hash, sha256_hex("different text"));
    }

    #[test]
    fn debug_format() {
        let log = SecurityAuditLog::new();
        let debug_str = format!("{log:?}");
        assert!(debug_str.contains("SecurityAuditLog"));
        assert!(debug_str.contains("entry_count"));
    }
}
