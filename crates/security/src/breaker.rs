//! Multi-window cost circuit breaker.
//!
//! Gates every cost-incurring operation against a per-event ceiling, an
//! hourly ceiling, a daily ceiling, and an emergency threshold that trips
//! the breaker open. Open never auto-closes; only an authorized reset
//! clears it, and a reset never touches the accumulated totals.
//!
//! `check` never commits the estimate; `record` is the only commit point,
//! called after the real operation completes. A caller that aborts an
//! approved operation simply never calls `record`.
//!
//! All counters and the breaker state live behind one mutex: `check` and
//! `record` are linearizable with respect to them, and the lock is held
//! only for the in-memory decision. Persistence is handed to spawned
//! tasks; the decision path never awaits.

use crate::audit::{sha256_hex, AuditEvent, AuditOutcome, SecurityAuditLog};
use bidguard_config::CostConfig;
use bidguard_core::cost::{
    BreakerState, CostDecision, CostEvent, CostSnapshot, CostWarning, DenyReason, HourSlot,
};
use bidguard_core::event::{EventBus, SecurityEvent};
use bidguard_core::store::CostStore;
use bidguard_core::violation::Severity;
use bidguard_core::{CostError, Error};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};
use uuid::Uuid;

/// Near-ceiling request timestamps kept for pattern detection.
const NEAR_LIMIT_RING: usize = 32;

/// Trailing window for the near-ceiling advisory.
const NEAR_LIMIT_WINDOW_SECS: i64 = 300;

/// Near-ceiling requests in the window beyond which the advisory fires.
const NEAR_LIMIT_THRESHOLD: usize = 3;

/// Fraction of the per-event limit that counts as near-ceiling.
const NEAR_LIMIT_FRACTION: f64 = 0.8;

struct CostState {
    daily_total: f64,
    daily_date: NaiveDate,
    hourly_total: f64,
    hourly_slot: HourSlot,
    breaker: BreakerState,
    open_reason: Option<String>,
    near_limit: VecDeque<DateTime<Utc>>,
}

impl CostState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_total: 0.0,
            daily_date: now.date_naive(),
            hourly_total: 0.0,
            hourly_slot: HourSlot::of(now),
            breaker: BreakerState::Closed,
            open_reason: None,
            near_limit: VecDeque::new(),
        }
    }

    /// Lazy window reset: totals zero out the first time a call observes
    /// a new UTC date or hour, before any ceiling comparison.
    fn roll_windows(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.daily_date {
            self.daily_date = today;
            self.daily_total = 0.0;
        }
        let slot = HourSlot::of(now);
        if slot != self.hourly_slot {
            self.hourly_slot = slot;
            self.hourly_total = 0.0;
        }
    }
}

/// The cost circuit breaker. One instance per tenant, with injected
/// limits, store, and bus.
pub struct CostCircuitBreaker {
    limits: CostConfig,
    state: Mutex<CostState>,
    store: Arc<dyn CostStore>,
    bus: EventBus,
    audit: Option<Arc<SecurityAuditLog>>,
}

impl CostCircuitBreaker {
    pub fn new(limits: CostConfig, store: Arc<dyn CostStore>, bus: EventBus) -> Self {
        Self {
            limits,
            state: Mutex::new(CostState::new(Utc::now())),
            store,
            bus,
            audit: None,
        }
    }

    /// Attach an audit log.
    pub fn with_audit_log(mut self, audit: Arc<SecurityAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Hydrate the window totals from the store. Call once at startup;
    /// the decision path itself never reads the store.
    pub async fn recover(&self) -> Result<(), Error> {
        let now = Utc::now();
        let daily = self.store.get_daily_cost(now.date_naive()).await?;
        let hourly = self.store.get_hourly_cost(&HourSlot::of(now)).await?;

        let mut state = self.lock_state();
        state.roll_windows(now);
        state.daily_total = daily.max(0.0);
        state.hourly_total = hourly.max(0.0);
        Ok(())
    }

    /// Decide whether an operation may proceed. Never mutates committed
    /// totals; the only state changes possible here are the lazy window
    /// reset and a trip to `Open`.
    pub fn check(
        &self,
        estimated_cost: f64,
        operation_type: &str,
        context: Option<&str>,
    ) -> CostDecision {
        if !estimated_cost.is_finite() || estimated_cost < 0.0 {
            // Invalid estimates fail closed: silent cost overrun is the
            // higher business risk.
            let state = self.lock_state();
            let snapshot = self.snapshot(&state);
            return self.reject(
                DenyReason::PerEventExceeded,
                format!("invalid cost estimate {estimated_cost} for {operation_type}"),
                snapshot,
                operation_type,
                context,
            );
        }

        let now = Utc::now();
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                error!(operation_type, "cost state mutex poisoned; failing closed");
                let state = poisoned.into_inner();
                let snapshot = self.snapshot(&state);
                return self.reject(
                    DenyReason::EmergencyShutdown,
                    "internal error in cost path; failing closed".to_string(),
                    snapshot,
                    operation_type,
                    context,
                );
            }
        };

        if state.breaker == BreakerState::Open {
            let reason = state
                .open_reason
                .clone()
                .unwrap_or_else(|| "emergency shutdown active".into());
            let snapshot = self.snapshot(&state);
            drop(state);
            return self.reject(
                DenyReason::EmergencyShutdown,
                format!("cost breaker is open: {reason}"),
                snapshot,
                operation_type,
                context,
            );
        }

        state.roll_windows(now);

        if estimated_cost > self.limits.per_event_limit {
            let snapshot = self.snapshot(&state);
            drop(state);
            return self.reject(
                DenyReason::PerEventExceeded,
                format!(
                    "per-event cost limit exceeded: ${estimated_cost:.4} > ${:.4}",
                    self.limits.per_event_limit
                ),
                snapshot,
                operation_type,
                context,
            );
        }

        let projected_daily = state.daily_total + estimated_cost;
        if projected_daily > self.limits.daily_limit {
            if projected_daily > self.limits.emergency_threshold {
                // The only automatic transition into Open.
                self.trip(
                    &mut state,
                    format!(
                        "daily cost projection ${projected_daily:.2} exceeds emergency threshold ${:.2}",
                        self.limits.emergency_threshold
                    ),
                    now,
                );
            }
            let snapshot = self.snapshot(&state);
            drop(state);
            return self.reject(
                DenyReason::DailyLimitExceeded,
                format!(
                    "daily cost limit would be exceeded: ${projected_daily:.2} > ${:.2}",
                    self.limits.daily_limit
                ),
                snapshot,
                operation_type,
                context,
            );
        }

        let projected_hourly = state.hourly_total + estimated_cost;
        if projected_hourly > self.limits.hourly_limit {
            let snapshot = self.snapshot(&state);
            drop(state);
            return self.reject(
                DenyReason::HourlyRateExceeded,
                format!(
                    "hourly rate limit would be exceeded: ${projected_hourly:.2} > ${:.2}",
                    self.limits.hourly_limit
                ),
                snapshot,
                operation_type,
                context,
            );
        }

        // Advisory only: a burst of near-ceiling requests is flagged but
        // never rejected on its own.
        let mut suspicious = false;
        if estimated_cost > self.limits.per_event_limit * NEAR_LIMIT_FRACTION {
            let cutoff = now - chrono::Duration::seconds(NEAR_LIMIT_WINDOW_SECS);
            while state.near_limit.front().is_some_and(|t| *t < cutoff) {
                state.near_limit.pop_front();
            }
            if state.near_limit.len() >= NEAR_LIMIT_RING {
                state.near_limit.pop_front();
            }
            state.near_limit.push_back(now);
            suspicious = state.near_limit.len() > NEAR_LIMIT_THRESHOLD;
        }

        let snapshot = self.snapshot(&state);
        drop(state);

        let mut decision = CostDecision::approved("cost approval granted", snapshot);
        if suspicious {
            warn!(
                operation_type,
                estimated_cost, "repeated near-ceiling requests within five minutes"
            );
            decision = decision.with_warning(CostWarning::SuspiciousPattern);
        }
        decision
    }

    /// Commit the actual cost of a completed operation. The only place
    /// totals grow; an approved-then-aborted operation must simply never
    /// call this.
    pub fn record(&self, actual_cost: f64, operation_type: &str) {
        if !actual_cost.is_finite() || actual_cost < 0.0 {
            warn!(operation_type, actual_cost, "discarding invalid cost record");
            return;
        }

        let now = Utc::now();
        let mut state = self.lock_state();
        state.roll_windows(now);
        state.daily_total += actual_cost;
        state.hourly_total += actual_cost;

        if state.breaker == BreakerState::Closed
            && state.daily_total > self.limits.emergency_threshold
        {
            let reason = format!(
                "recorded daily total ${:.2} exceeds emergency threshold ${:.2}",
                state.daily_total, self.limits.emergency_threshold
            );
            self.trip(&mut state, reason, now);
        }

        let event = CostEvent {
            id: Uuid::new_v4().to_string(),
            operation_type: operation_type.to_string(),
            cost: actual_cost,
            recorded_at: now,
            daily_total_after: state.daily_total,
            hourly_total_after: state.hourly_total,
        };
        drop(state);

        self.spawn_persist(move |store| async move { store.put_cost_event(&event).await });
    }

    /// Clear `Open` back to `Closed`. Requires the configured admin key;
    /// accumulated totals are left untouched.
    pub fn reset(&self, admin_key: &str, reason: &str) -> Result<(), Error> {
        let Some(expected) = &self.limits.admin_key_sha256 else {
            warn!("breaker reset attempted but no admin key is configured");
            return Err(CostError::Unauthorized.into());
        };
        if sha256_hex(admin_key) != *expected {
            warn!("breaker reset attempted with invalid admin key");
            if let Some(audit) = &self.audit {
                audit.log(
                    AuditEvent::BreakerReset {
                        reason: reason.to_string(),
                    },
                    "admin",
                    AuditOutcome::Denied,
                    Some("invalid admin key".into()),
                );
            }
            return Err(CostError::Unauthorized.into());
        }

        let mut state = self.lock_state();
        let previous = state.breaker;
        state.breaker = BreakerState::Closed;
        state.open_reason = None;
        drop(state);

        self.bus.publish(SecurityEvent::BreakerReset {
            reason: reason.to_string(),
            previous_state: previous,
            timestamp: Utc::now(),
        });
        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::BreakerReset {
                    reason: reason.to_string(),
                },
                "admin",
                AuditOutcome::Success,
                None,
            );
        }
        warn!(reason, ?previous, "cost circuit breaker reset by administrator");
        Ok(())
    }

    /// Current totals, ceilings, and breaker state for monitoring.
    pub fn status(&self) -> CostSnapshot {
        let mut state = self.lock_state();
        state.roll_windows(Utc::now());
        self.snapshot(&state)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, CostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self, state: &CostState) -> CostSnapshot {
        CostSnapshot {
            daily_total: state.daily_total,
            daily_limit: self.limits.daily_limit,
            daily_remaining: (self.limits.daily_limit - state.daily_total).max(0.0),
            hourly_total: state.hourly_total,
            hourly_limit: self.limits.hourly_limit,
            hourly_remaining: (self.limits.hourly_limit - state.hourly_total).max(0.0),
            per_event_limit: self.limits.per_event_limit,
            emergency_threshold: self.limits.emergency_threshold,
            breaker_state: state.breaker,
        }
    }

    fn reject(
        &self,
        reason: DenyReason,
        message: String,
        snapshot: CostSnapshot,
        operation_type: &str,
        context: Option<&str>,
    ) -> CostDecision {
        warn!(operation_type, context, %reason, "{message}");
        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::CostRejected {
                    reason: reason.to_string(),
                },
                "system",
                AuditOutcome::Denied,
                Some(message.clone()),
            );
        }
        CostDecision::rejected(reason, message, snapshot)
    }

    /// Trip to `Open`. Called with the state lock held; everything beyond
    /// the state flip is fire-and-forget.
    fn trip(&self, state: &mut CostState, reason: String, now: DateTime<Utc>) {
        state.breaker = BreakerState::Open;
        state.open_reason = Some(reason.clone());

        error!(reason, daily_total = state.daily_total, "EMERGENCY COST SHUTDOWN TRIGGERED");

        self.bus.publish(SecurityEvent::EmergencyShutdown {
            reason: reason.clone(),
            daily_total: state.daily_total,
            threshold: self.limits.emergency_threshold,
            timestamp: now,
        });
        self.bus.publish(SecurityEvent::AdminAlert {
            user_id: None,
            summary: format!("cost circuit breaker tripped: {reason}"),
            severity: Severity::Critical,
            requires_review: true,
            timestamp: now,
        });
        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::EmergencyShutdown {
                    reason: reason.clone(),
                },
                "system",
                AuditOutcome::Denied,
                None,
            );
        }

        self.spawn_persist(move |store| async move { store.put_breaker_trip(&reason, now).await });
    }

    /// Hand a store write to the runtime without awaiting it on the
    /// decision path. Outside a runtime the write is skipped and logged;
    /// the in-memory state already reflects the outcome.
    fn spawn_persist<F, Fut>(&self, write: F)
    where
        F: FnOnce(Arc<dyn CostStore>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), bidguard_core::StoreError>> + Send + 'static,
    {
        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = write(store).await {
                        warn!(error = %e, "cost persistence write failed");
                    }
                });
            }
            Err(_) => warn!("no async runtime; cost persistence write skipped"),
        }
    }
}

#[cfg(test)]
impl CostCircuitBreaker {
    /// Force the window keys into the past so the next call observes a
    /// boundary crossing.
    fn backdate_windows(&self) {
        let mut state = self.lock_state();
        state.daily_date = state.daily_date.pred_opt().unwrap();
        state.hourly_slot = HourSlot {
            date: state.hourly_slot.date.pred_opt().unwrap(),
            hour: state.hourly_slot.hour,
        };
    }
}
