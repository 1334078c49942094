//! In-memory store — useful for testing and ephemeral deployments.

use async_trait::async_trait;
use bidguard_core::cost::{CostEvent, HourSlot};
use bidguard_core::error::StoreError;
use bidguard_core::store::{CostStore, ViolationStore};
use bidguard_core::violation::{AccountStatus, UserViolationProfile, ViolationRecord};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An in-memory store backing both the violation and cost interfaces.
/// Useful for tests and deployments where durability isn't needed.
#[derive(Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<ViolationRecord>>>,
    profiles: Arc<RwLock<HashMap<String, UserViolationProfile>>>,
    statuses: Arc<RwLock<HashMap<String, (AccountStatus, Option<DateTime<Utc>>)>>>,
    cost_events: Arc<RwLock<Vec<CostEvent>>>,
    trips: Arc<RwLock<Vec<(String, DateTime<Utc>)>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored account status for a user, if any. Test helper.
    pub async fn account_status(
        &self,
        user_id: &str,
    ) -> Option<(AccountStatus, Option<DateTime<Utc>>)> {
        self.statuses.read().await.get(user_id).copied()
    }

    /// All persisted cost events. Test helper.
    pub async fn cost_events(&self) -> Vec<CostEvent> {
        self.cost_events.read().await.clone()
    }

    /// All persisted breaker trips. Test helper.
    pub async fn breaker_trips(&self) -> Vec<(String, DateTime<Utc>)> {
        self.trips.read().await.clone()
    }
}

#[async_trait]
impl ViolationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put_violation_record(&self, record: &ViolationRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        // At-least-once delivery: a replayed id must not duplicate.
        if records.iter().any(|r| r.id == record.id) {
            return Ok(());
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get_violation_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ViolationRecord>, StoreError> {
        let records = self.records.read().await;
        let mut history: Vec<ViolationRecord> = records
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.truncate(limit);
        Ok(history)
    }

    async fn get_user_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<UserViolationProfile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn upsert_profile(&self, profile: &UserViolationProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn upsert_account_status(
        &self,
        user_id: &str,
        status: AccountStatus,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.statuses
            .write()
            .await
            .insert(user_id.to_string(), (status, expiry));
        if let Some(profile) = self.profiles.write().await.get_mut(user_id) {
            profile.account_status = status;
        }
        Ok(())
    }

    async fn mark_resolved(&self, record_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.resolved = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(record_id.to_string())),
        }
    }
}

#[async_trait]
impl CostStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn put_cost_event(&self, event: &CostEvent) -> Result<(), StoreError> {
        self.cost_events.write().await.push(event.clone());
        Ok(())
    }

    async fn get_daily_cost(&self, date: NaiveDate) -> Result<f64, StoreError> {
        let events = self.cost_events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.recorded_at.date_naive() == date)
            .map(|e| e.cost)
            .sum())
    }

    async fn get_hourly_cost(&self, slot: &HourSlot) -> Result<f64, StoreError> {
        let events = self.cost_events.read().await;
        Ok(events
            .iter()
            .filter(|e| HourSlot::of(e.recorded_at) == *slot)
            .map(|e| e.cost)
            .sum())
    }

    async fn put_breaker_trip(&self, reason: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.trips.write().await.push((reason.to_string(), at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidguard_core::violation::{
        DetectionMethod, EnforcementAction, Severity, ViolationCategory,
    };

    fn test_record(id: &str, user_id: &str) -> ViolationRecord {
        ViolationRecord {
            id: id.into(),
            user_id: user_id.into(),
            violation_type: ViolationCategory::PhoneNumber,
            severity: Severity::High,
            content_excerpt: "call me at [PHONE NUMBER BLOCKED]".into(),
            detection_method: DetectionMethod::Automated,
            created_at: Utc::now(),
            escalation_level_after: 3,
            action_taken: EnforcementAction::AccountSuspension {
                duration_hours: Some(168),
            },
            resolved: false,
        }
    }

    #[tokio::test]
    async fn record_roundtrip_and_dedup() {
        let store = InMemoryStore::new();
        let record = test_record("v1", "user-1");

        store.put_violation_record(&record).await.unwrap();
        store.put_violation_record(&record).await.unwrap();

        let history = store.get_violation_history("user-1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, "v1");
    }

    #[tokio::test]
    async fn history_is_newest_first_and_bounded() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            let mut record = test_record(&format!("v{i}"), "user-1");
            record.created_at = Utc::now() + chrono::Duration::seconds(i);
            store.put_violation_record(&record).await.unwrap();
        }

        let history = store.get_violation_history("user-1", 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, "v4");
    }

    #[tokio::test]
    async fn profile_upsert_and_status() {
        let store = InMemoryStore::new();
        assert!(store.get_user_profile("user-1").await.unwrap().is_none());

        let mut profile = UserViolationProfile::new("user-1");
        profile.escalation_level = 2;
        store.upsert_profile(&profile).await.unwrap();

        store
            .upsert_account_status("user-1", AccountStatus::Restricted, None)
            .await
            .unwrap();

        let loaded = store.get_user_profile("user-1").await.unwrap().unwrap();
        assert_eq!(loaded.escalation_level, 2);
        assert_eq!(loaded.account_status, AccountStatus::Restricted);
    }

    #[tokio::test]
    async fn mark_resolved_flips_flag() {
        let store = InMemoryStore::new();
        store.put_violation_record(&test_record("v1", "u")).await.unwrap();

        store.mark_resolved("v1").await.unwrap();
        let history = store.get_violation_history("u", 1).await.unwrap();
        assert!(history[0].resolved);

        assert!(store.mark_resolved("missing").await.is_err());
    }

    #[tokio::test]
    async fn cost_totals_by_window() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for (i, cost) in [1.5, 2.5].iter().enumerate() {
            store
                .put_cost_event(&CostEvent {
                    id: format!("c{i}"),
                    operation_type: "scan".into(),
                    cost: *cost,
                    recorded_at: now,
                    daily_total_after: 0.0,
                    hourly_total_after: 0.0,
                })
                .await
                .unwrap();
        }

        let daily = store.get_daily_cost(now.date_naive()).await.unwrap();
        assert!((daily - 4.0).abs() < f64::EPSILON);

        let hourly = store.get_hourly_cost(&HourSlot::of(now)).await.unwrap();
        assert!((hourly - 4.0).abs() < f64::EPSILON);

        let other_day = now.date_naive().pred_opt().unwrap();
        assert_eq!(store.get_daily_cost(other_day).await.unwrap(), 0.0);
    }
}
