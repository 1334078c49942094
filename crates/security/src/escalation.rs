//! Progressive violation escalation — per-user state machine from warning
//! to permanent ban.
//!
//! The persisted `escalation_level` is the single source of truth. Each
//! violation adds severity points to it and the resulting level selects a
//! ladder rung. Writing the `ViolationRecord` is the one fatal step: an
//! unrecorded violation is an audit-integrity gap, while failed enforcement
//! delivery is recoverable and parked for retry.

use crate::audit::{AuditEvent, AuditOutcome, SecurityAuditLog};
use bidguard_config::{EscalationConfig, LadderRung};
use bidguard_core::event::{EventBus, SecurityEvent};
use bidguard_core::store::ViolationStore;
use bidguard_core::violation::{
    AccountStatus, DetectionMethod, EnforcementAction, Severity, UserViolationProfile,
    ViolationCategory, ViolationRecord,
};
use bidguard_core::{Error, EscalationError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Dead letters parked before the oldest are dropped.
const MAX_DEAD_LETTERS: usize = 1_000;

/// An enforcement write that failed and awaits replay.
#[derive(Debug, Clone)]
struct DeferredEnforcement {
    user_id: String,
    status: AccountStatus,
    expiry: Option<DateTime<Utc>>,
    action: EnforcementAction,
}

#[derive(Debug, Default)]
struct Counters {
    violations_processed: AtomicU64,
    warnings_issued: AtomicU64,
    restrictions_applied: AtomicU64,
    suspensions_applied: AtomicU64,
    bans_applied: AtomicU64,
    enforcements_deferred: AtomicU64,
}

/// Point-in-time engine metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalationMetrics {
    pub violations_processed: u64,
    pub warnings_issued: u64,
    pub restrictions_applied: u64,
    pub suspensions_applied: u64,
    pub bans_applied: u64,
    pub enforcements_deferred: u64,
}

/// The escalation engine. One instance per tenant; all state beyond the
/// per-user locks and the dead-letter queue lives in the injected store.
pub struct ViolationEscalationEngine {
    policy: EscalationConfig,
    store: Arc<dyn ViolationStore>,
    bus: EventBus,
    audit: Option<Arc<SecurityAuditLog>>,
    /// Per-user serialization: concurrent violations for the same user
    /// must not lose level updates.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    dead_letters: StdMutex<VecDeque<DeferredEnforcement>>,
    counters: Counters,
}

impl ViolationEscalationEngine {
    pub fn new(
        policy: EscalationConfig,
        store: Arc<dyn ViolationStore>,
        bus: EventBus,
    ) -> Result<Self, Error> {
        if policy.ladder.is_empty() {
            return Err(EscalationError::LadderMisconfigured("empty ladder".into()).into());
        }
        Ok(Self {
            policy,
            store,
            bus,
            audit: None,
            user_locks: Mutex::new(HashMap::new()),
            dead_letters: StdMutex::new(VecDeque::new()),
            counters: Counters::default(),
        })
    }

    /// Attach an audit log.
    pub fn with_audit_log(mut self, audit: Arc<SecurityAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Process an automated-detection violation. See
    /// [`Self::process_violation_with_method`].
    pub async fn process_violation(
        &self,
        user_id: &str,
        violation_type: ViolationCategory,
        excerpt: &str,
        severity: Severity,
    ) -> Result<ViolationRecord, Error> {
        self.process_violation_with_method(
            user_id,
            violation_type,
            excerpt,
            severity,
            DetectionMethod::Automated,
        )
        .await
    }

    /// Process a violation: load the authoritative level, add severity
    /// points, persist the record, apply enforcement, update the profile.
    ///
    /// Calls for the same user are serialized. Record persistence failing
    /// is fatal; enforcement and notification failures are logged, parked
    /// for retry, and never roll back the record or the level.
    pub async fn process_violation_with_method(
        &self,
        user_id: &str,
        violation_type: ViolationCategory,
        excerpt: &str,
        severity: Severity,
        method: DetectionMethod,
    ) -> Result<ViolationRecord, Error> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let profile = self.load_profile(user_id).await?;

        let points = self.policy.severity_points.points(severity);
        let new_level = (profile.escalation_level + points).min(self.policy.max_level());
        let rung = self.rung_for(new_level)?;

        let record = ViolationRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            violation_type,
            severity,
            content_excerpt: truncate_chars(excerpt, self.policy.excerpt_max_chars),
            detection_method: method,
            created_at: Utc::now(),
            escalation_level_after: new_level,
            action_taken: rung.action.clone(),
            resolved: false,
        };

        // The audit fact is written before any enforcement side effect:
        // the record must exist even if delivery fails from here on.
        self.store
            .put_violation_record(&record)
            .await
            .map_err(|e| EscalationError::RecordPersistFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?;

        self.apply_enforcement(&record).await;
        self.notify_user(&record, &rung.description);

        if matches!(severity, Severity::High | Severity::Critical) {
            self.bus.publish(SecurityEvent::AdminAlert {
                user_id: Some(user_id.to_string()),
                summary: format!(
                    "{severity} violation ({violation_type}) escalated user to level {new_level}"
                ),
                severity,
                requires_review: severity == Severity::Critical,
                timestamp: record.created_at,
            });
        }

        let mut updated = profile;
        updated.total_violations += 1;
        updated.escalation_level = new_level;
        updated.last_violation_at = Some(record.created_at);
        if let Some(target) = record.action_taken.target_status() {
            updated.account_status = updated.account_status.max(target);
        }
        if let Err(e) = self.store.upsert_profile(&updated).await {
            // The record exists; a stale level under-enforces until the
            // next successful write, which is the recoverable direction.
            warn!(user_id, error = %e, "failed to persist updated violation profile");
        }

        self.bus.publish(SecurityEvent::ViolationRecorded {
            record: record.clone(),
        });
        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::ViolationProcessed {
                    user_id: user_id.to_string(),
                    escalation_level: new_level,
                },
                user_id,
                AuditOutcome::Success,
                None,
            );
        }

        self.counters.violations_processed.fetch_add(1, Ordering::Relaxed);
        warn!(
            user_id,
            violation_type = %violation_type,
            level = new_level,
            action = %record.action_taken,
            "violation processed"
        );

        Ok(record)
    }

    /// Administrative reset: escalation level back to zero, account back to
    /// active, history marked resolved. The only path out of `banned`.
    pub async fn reset_user(&self, user_id: &str, reason: &str) -> Result<(), Error> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut profile = self
            .store
            .get_user_profile(user_id)
            .await
            .map_err(|e| EscalationError::ProfileLoadFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?
            .unwrap_or_else(|| UserViolationProfile::new(user_id));

        let history = self
            .store
            .get_violation_history(user_id, self.policy.history_limit)
            .await
            .unwrap_or_default();
        for record in history.iter().filter(|r| !r.resolved) {
            if let Err(e) = self.store.mark_resolved(&record.id).await {
                warn!(user_id, record_id = %record.id, error = %e, "failed to resolve record");
            }
        }

        profile.escalation_level = 0;
        profile.account_status = AccountStatus::Active;
        self.store.upsert_profile(&profile).await?;
        self.store
            .upsert_account_status(user_id, AccountStatus::Active, None)
            .await?;

        self.bus.publish(SecurityEvent::AdminAlert {
            user_id: Some(user_id.to_string()),
            summary: format!("escalation state reset: {reason}"),
            severity: Severity::Low,
            requires_review: false,
            timestamp: Utc::now(),
        });
        if let Some(audit) = &self.audit {
            audit.log(
                AuditEvent::EscalationReset {
                    user_id: user_id.to_string(),
                },
                "admin",
                AuditOutcome::Success,
                Some(reason.to_string()),
            );
        }
        warn!(user_id, reason, "escalation state reset by administrator");
        Ok(())
    }

    /// Replay parked enforcement writes. Returns how many were applied;
    /// writes that fail again are re-parked.
    pub async fn retry_pending_enforcements(&self) -> usize {
        let pending: Vec<DeferredEnforcement> = {
            let mut queue = self.dead_letters.lock().unwrap_or_else(|p| p.into_inner());
            queue.drain(..).collect()
        };

        let mut applied = 0;
        for item in pending {
            match self
                .store
                .upsert_account_status(&item.user_id, item.status, item.expiry)
                .await
            {
                Ok(()) => {
                    applied += 1;
                    if let Some(audit) = &self.audit {
                        audit.log(
                            AuditEvent::EnforcementApplied {
                                user_id: item.user_id.clone(),
                                action: item.action.to_string(),
                            },
                            "system",
                            AuditOutcome::Success,
                            Some("replayed from dead-letter queue".into()),
                        );
                    }
                }
                Err(e) => {
                    warn!(user_id = %item.user_id, error = %e, "enforcement replay failed");
                    self.park(item);
                }
            }
        }
        applied
    }

    /// Enforcement writes currently awaiting replay.
    pub fn pending_enforcement_count(&self) -> usize {
        self.dead_letters
            .lock()
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> EscalationMetrics {
        EscalationMetrics {
            violations_processed: self.counters.violations_processed.load(Ordering::Relaxed),
            warnings_issued: self.counters.warnings_issued.load(Ordering::Relaxed),
            restrictions_applied: self.counters.restrictions_applied.load(Ordering::Relaxed),
            suspensions_applied: self.counters.suspensions_applied.load(Ordering::Relaxed),
            bans_applied: self.counters.bans_applied.load(Ordering::Relaxed),
            enforcements_deferred: self.counters.enforcements_deferred.load(Ordering::Relaxed),
        }
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn rung_for(&self, level: u32) -> Result<&LadderRung, Error> {
        self.policy
            .ladder
            .iter()
            .find(|r| r.level == level)
            .ok_or_else(|| {
                EscalationError::LadderMisconfigured(format!("no rung for level {level}")).into()
            })
    }

    /// Load the profile and recent history. The stored `escalation_level`
    /// is authoritative; history implying a higher level is flagged as a
    /// data-integrity problem, never silently adopted.
    async fn load_profile(&self, user_id: &str) -> Result<UserViolationProfile, Error> {
        let stored = self
            .store
            .get_user_profile(user_id)
            .await
            .map_err(|e| EscalationError::ProfileLoadFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?;
        let mut profile = stored.unwrap_or_else(|| UserViolationProfile::new(user_id));

        let history = self
            .store
            .get_violation_history(user_id, self.policy.history_limit)
            .await
            .map_err(|e| EscalationError::ProfileLoadFailed {
                user_id: user_id.to_string(),
                reason: e.to_string(),
            })?;

        let derived = history
            .iter()
            .filter(|r| !r.resolved)
            .map(|r| r.escalation_level_after)
            .max()
            .unwrap_or(0);
        if derived > profile.escalation_level {
            warn!(
                user_id,
                stored = profile.escalation_level,
                derived,
                "escalation level diverges from history; keeping stored value"
            );
        }

        profile.violation_history = history;
        Ok(profile)
    }

    /// Apply the enforcement action. Best-effort: a failed status write is
    /// parked for replay, never propagated.
    async fn apply_enforcement(&self, record: &ViolationRecord) {
        let Some(status) = record.action_taken.target_status() else {
            // Warning rung: notification only, no account change.
            self.counters.warnings_issued.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let expiry = record
            .action_taken
            .duration_hours()
            .map(|hours| record.created_at + Duration::hours(i64::from(hours)));

        match self
            .store
            .upsert_account_status(&record.user_id, status, expiry)
            .await
        {
            Ok(()) => {
                match status {
                    AccountStatus::Restricted => {
                        self.counters.restrictions_applied.fetch_add(1, Ordering::Relaxed);
                    }
                    AccountStatus::Suspended => {
                        self.counters.suspensions_applied.fetch_add(1, Ordering::Relaxed);
                    }
                    AccountStatus::Banned => {
                        self.counters.bans_applied.fetch_add(1, Ordering::Relaxed);
                    }
                    AccountStatus::Active => {}
                }
                if let Some(audit) = &self.audit {
                    audit.log(
                        AuditEvent::EnforcementApplied {
                            user_id: record.user_id.clone(),
                            action: record.action_taken.to_string(),
                        },
                        "system",
                        AuditOutcome::Success,
                        None,
                    );
                }
            }
            Err(e) => {
                warn!(
                    user_id = %record.user_id,
                    action = %record.action_taken,
                    error = %e,
                    "enforcement delivery failed; parked for retry"
                );
                self.counters.enforcements_deferred.fetch_add(1, Ordering::Relaxed);
                self.park(DeferredEnforcement {
                    user_id: record.user_id.clone(),
                    status,
                    expiry,
                    action: record.action_taken.clone(),
                });
                self.bus.publish(SecurityEvent::EnforcementDeferred {
                    user_id: record.user_id.clone(),
                    action: record.action_taken.clone(),
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                if let Some(audit) = &self.audit {
                    audit.log(
                        AuditEvent::EnforcementDeferred {
                            user_id: record.user_id.clone(),
                            action: record.action_taken.to_string(),
                        },
                        "system",
                        AuditOutcome::Failure,
                        Some(e.to_string()),
                    );
                }
            }
        }
    }

    fn park(&self, item: DeferredEnforcement) {
        let mut queue = self.dead_letters.lock().unwrap_or_else(|p| p.into_inner());
        if queue.len() >= MAX_DEAD_LETTERS {
            queue.pop_front();
        }
        queue.push_back(item);
    }

    fn notify_user(&self, record: &ViolationRecord, description: &str) {
        self.bus.publish(SecurityEvent::UserNotification {
            user_id: record.user_id.clone(),
            title: "Content Policy Violation Detected".into(),
            body: format!(
                "Sharing contact information is not allowed on the platform. \
                 {description}. This is violation #{} on your account.",
                record.escalation_level_after
            ),
            timestamp: record.created_at,
        });
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
