//! Security event system — decoupled fan-out to enforcement, alerting,
//! and analytics consumers.
//!
//! Events are published when the protection core detects, records, or
//! enforces something. Delivery is fire-and-forget: a publish never blocks
//! or fails the operation that produced it.

use crate::cost::BreakerState;
use crate::violation::{EnforcementAction, RiskLevel, Severity, ViolationRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All events emitted by the protection core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// A violation was processed and its record persisted.
    ViolationRecorded { record: ViolationRecord },

    /// A high/critical violation or breaker trip needs administrator eyes.
    AdminAlert {
        user_id: Option<String>,
        summary: String,
        severity: Severity,
        requires_review: bool,
        timestamp: DateTime<Utc>,
    },

    /// A user-facing notification (warning message, restriction notice).
    UserNotification {
        user_id: String,
        title: String,
        body: String,
        timestamp: DateTime<Utc>,
    },

    /// The cost breaker tripped; all cost-incurring operations halt.
    EmergencyShutdown {
        reason: String,
        daily_total: f64,
        threshold: f64,
        timestamp: DateTime<Utc>,
    },

    /// The breaker was reset by an administrator.
    BreakerReset {
        reason: String,
        previous_state: BreakerState,
        timestamp: DateTime<Utc>,
    },

    /// An enforcement side effect failed and was parked for retry.
    EnforcementDeferred {
        user_id: String,
        action: EnforcementAction,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Privacy-preserving scan analytics (hash of content, never the text).
    ContentFlagged {
        content_hash: String,
        risk_level: RiskLevel,
        categories: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl SecurityEvent {
    /// The transport topic this event is delivered on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ViolationRecorded { .. } | Self::ContentFlagged { .. } => "security.violations",
            Self::AdminAlert { .. }
            | Self::BreakerReset { .. }
            | Self::EnforcementDeferred { .. } => "security.alerts",
            Self::UserNotification { .. } => "security.notifications",
            Self::EmergencyShutdown { .. } => "cost.emergency_shutdown",
        }
    }
}

/// A broadcast-based event bus for security events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. The external
/// transport adapter subscribes and forwards to the real bus; in tests a
/// plain receiver inspects what was published.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<SecurityEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SecurityEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SecurityEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
