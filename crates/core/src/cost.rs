//! Cost-control domain model — decisions, reason codes, windows, and the
//! persisted cost event.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ── Windows ───────────────────────────────────────────────────────────────

/// A UTC hour window key, `YYYY-MM-DD-HH`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HourSlot {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourSlot {
    /// The slot containing the given instant.
    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            date: at.date_naive(),
            hour: at.hour(),
        }
    }
}

impl std::fmt::Display for HourSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}-{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.hour
        )
    }
}

// ── Breaker state ─────────────────────────────────────────────────────────

/// Circuit breaker state. `Closed` is normal operation; `Open` rejects
/// every request until an explicit authorized reset, never auto-closing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

// ── Decisions ─────────────────────────────────────────────────────────────

/// Machine-readable rejection codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    PerEventExceeded,
    DailyLimitExceeded,
    HourlyRateExceeded,
    EmergencyShutdown,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerEventExceeded => write!(f, "PER_EVENT_EXCEEDED"),
            Self::DailyLimitExceeded => write!(f, "DAILY_LIMIT_EXCEEDED"),
            Self::HourlyRateExceeded => write!(f, "HOURLY_RATE_EXCEEDED"),
            Self::EmergencyShutdown => write!(f, "EMERGENCY_SHUTDOWN"),
        }
    }
}

/// Advisory warnings attached to otherwise-approved decisions.
/// Never the sole cause of a rejection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostWarning {
    SuspiciousPattern,
}

/// Point-in-time view of the committed totals and configured ceilings,
/// returned inside every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub daily_total: f64,
    pub daily_limit: f64,
    pub daily_remaining: f64,
    pub hourly_total: f64,
    pub hourly_limit: f64,
    pub hourly_remaining: f64,
    pub per_event_limit: f64,
    pub emergency_threshold: f64,
    pub breaker_state: BreakerState,
}

/// The outcome of a `check` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostDecision {
    pub approved: bool,
    /// `None` when approved.
    pub reason_code: Option<DenyReason>,
    /// Human-readable companion to `reason_code`.
    pub message: String,
    pub current_costs: CostSnapshot,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<CostWarning>,
}

impl CostDecision {
    pub fn approved(message: impl Into<String>, costs: CostSnapshot) -> Self {
        Self {
            approved: true,
            reason_code: None,
            message: message.into(),
            current_costs: costs,
            warnings: Vec::new(),
        }
    }

    pub fn rejected(reason: DenyReason, message: impl Into<String>, costs: CostSnapshot) -> Self {
        Self {
            approved: false,
            reason_code: Some(reason),
            message: message.into(),
            current_costs: costs,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: CostWarning) -> Self {
        self.warnings.push(warning);
        self
    }
}

// ── Persisted cost event ──────────────────────────────────────────────────

/// One recorded (committed) cost, persisted for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvent {
    pub id: String,
    pub operation_type: String,
    pub cost: f64,
    pub recorded_at: DateTime<Utc>,
    pub daily_total_after: f64,
    pub hourly_total_after: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hour_slot_formats() {
        let at = Utc.with_ymd_and_hms(2025, 3, 7, 9, 15, 0).unwrap();
        let slot = HourSlot::of(at);
        assert_eq!(slot.to_string(), "2025-03-07-09");
    }

    #[test]
    fn hour_slot_changes_at_boundary() {
        let before = Utc.with_ymd_and_hms(2025, 3, 7, 9, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 7, 10, 0, 0).unwrap();
        assert_ne!(HourSlot::of(before), HourSlot::of(after));
    }

    #[test]
    fn deny_reason_codes_are_screaming_snake() {
        let json = serde_json::to_string(&DenyReason::DailyLimitExceeded).unwrap();
        assert_eq!(json, "\"DAILY_LIMIT_EXCEEDED\"");
        assert_eq!(DenyReason::EmergencyShutdown.to_string(), "EMERGENCY_SHUTDOWN");
    }

    #[test]
    fn decision_constructors() {
        let costs = CostSnapshot {
            daily_total: 10.0,
            daily_limit: 100.0,
            daily_remaining: 90.0,
            hourly_total: 1.0,
            hourly_limit: 50.0,
            hourly_remaining: 49.0,
            per_event_limit: 5.0,
            emergency_threshold: 150.0,
            breaker_state: BreakerState::Closed,
        };

        let ok = CostDecision::approved("granted", costs.clone())
            .with_warning(CostWarning::SuspiciousPattern);
        assert!(ok.approved);
        assert!(ok.reason_code.is_none());
        assert_eq!(ok.warnings, vec![CostWarning::SuspiciousPattern]);

        let no = CostDecision::rejected(DenyReason::PerEventExceeded, "too big", costs);
        assert!(!no.approved);
        assert_eq!(no.reason_code, Some(DenyReason::PerEventExceeded));
    }
}
