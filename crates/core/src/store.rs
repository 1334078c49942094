//! Persistent store traits — the seam between the protection core and
//! durable storage.
//!
//! Storage is external and assumed reliable; at-least-once writes are
//! acceptable for audit records. Implementations: SQLite (production),
//! in-memory (testing/ephemeral).

use crate::cost::{CostEvent, HourSlot};
use crate::error::StoreError;
use crate::violation::{AccountStatus, UserViolationProfile, ViolationRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Durable storage for violation records, user profiles, and account status.
#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Persist a violation record. Records are append-only: the same id
    /// written twice must not duplicate (at-least-once delivery).
    async fn put_violation_record(&self, record: &ViolationRecord) -> Result<(), StoreError>;

    /// Most recent violations for a user, newest first.
    async fn get_violation_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ViolationRecord>, StoreError>;

    /// The stored profile, or `None` for a user with no history.
    async fn get_user_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<UserViolationProfile>, StoreError>;

    /// Write the authoritative profile fields (level, counters, status).
    async fn upsert_profile(&self, profile: &UserViolationProfile) -> Result<(), StoreError>;

    /// Set the account status, with an expiry for temporary restrictions.
    async fn upsert_account_status(
        &self,
        user_id: &str,
        status: AccountStatus,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Flip the `resolved` flag on a record (the only mutable field).
    async fn mark_resolved(&self, record_id: &str) -> Result<(), StoreError>;
}

/// Durable storage for committed cost events and window totals.
#[async_trait]
pub trait CostStore: Send + Sync {
    /// The backend name.
    fn name(&self) -> &str;

    /// Persist one committed cost event.
    async fn put_cost_event(&self, event: &CostEvent) -> Result<(), StoreError>;

    /// Sum of recorded costs for a UTC calendar date.
    async fn get_daily_cost(&self, date: NaiveDate) -> Result<f64, StoreError>;

    /// Sum of recorded costs for a UTC hour slot.
    async fn get_hourly_cost(&self, slot: &HourSlot) -> Result<f64, StoreError>;

    /// Persist a breaker trip so the open reason survives restarts.
    async fn put_breaker_trip(&self, reason: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}
