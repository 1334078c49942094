//! SQLite store — the production persistence backend.
//!
//! One database file, four tables:
//! - `violation_records` — append-only audit facts
//! - `user_profiles` — authoritative per-user escalation state
//! - `cost_events` — every committed cost, keyed by day and hour slot
//! - `breaker_trips` — emergency shutdown reasons
//!
//! WAL mode for concurrent readers. Pass `":memory:"` for an in-process
//! ephemeral database (useful for tests).

use async_trait::async_trait;
use bidguard_core::cost::{CostEvent, HourSlot};
use bidguard_core::error::StoreError;
use bidguard_core::store::{CostStore, ViolationStore};
use bidguard_core::violation::{
    AccountStatus, DetectionMethod, EnforcementAction, Severity, UserViolationProfile,
    ViolationCategory, ViolationRecord,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A production SQLite store backing both the violation and cost interfaces.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS violation_records (
                id                     TEXT PRIMARY KEY,
                user_id                TEXT NOT NULL,
                violation_type         TEXT NOT NULL,
                severity               TEXT NOT NULL,
                content_excerpt        TEXT NOT NULL,
                detection_method       TEXT NOT NULL,
                created_at             TEXT NOT NULL,
                escalation_level_after INTEGER NOT NULL,
                action_taken           TEXT NOT NULL,
                resolved               INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("violation_records table: {e}")))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_violations_user
            ON violation_records(user_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("violations index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id           TEXT PRIMARY KEY,
                total_violations  INTEGER NOT NULL DEFAULT 0,
                escalation_level  INTEGER NOT NULL DEFAULT 0,
                last_violation_at TEXT,
                account_status    TEXT NOT NULL DEFAULT 'active',
                status_expiry     TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("user_profiles table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cost_events (
                id                 TEXT PRIMARY KEY,
                operation_type     TEXT NOT NULL,
                cost               REAL NOT NULL,
                recorded_at        TEXT NOT NULL,
                day                TEXT NOT NULL,
                hour_slot          TEXT NOT NULL,
                daily_total_after  REAL NOT NULL,
                hourly_total_after REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("cost_events table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cost_day ON cost_events(day)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("cost day index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cost_hour ON cost_events(hour_slot)")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(format!("cost hour index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS breaker_trips (
                tripped_at TEXT NOT NULL,
                reason     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("breaker_trips table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ViolationRecord, StoreError> {
        let created_at: String = column(row, "created_at")?;
        Ok(ViolationRecord {
            id: column(row, "id")?,
            user_id: column(row, "user_id")?,
            violation_type: enum_from_text(&column::<String>(row, "violation_type")?)?,
            severity: enum_from_text(&column::<String>(row, "severity")?)?,
            content_excerpt: column(row, "content_excerpt")?,
            detection_method: enum_from_text(&column::<String>(row, "detection_method")?)?,
            created_at: parse_timestamp(&created_at)?,
            escalation_level_after: column::<i64>(row, "escalation_level_after")? as u32,
            action_taken: serde_json::from_str(&column::<String>(row, "action_taken")?)
                .map_err(|e| StoreError::QueryFailed(format!("action_taken column: {e}")))?,
            resolved: column::<i64>(row, "resolved")? != 0,
        })
    }
}

fn column<'r, T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>>(
    row: &'r sqlx::sqlite::SqliteRow,
    name: &str,
) -> Result<T, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::QueryFailed(format!("{name} column: {e}")))
}

/// Serialize a unit enum to its serde string form (e.g. `phone_number`).
fn enum_to_text<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(other) => Err(StoreError::Storage(format!("non-string enum encoding: {other}"))),
        Err(e) => Err(StoreError::Storage(format!("enum encoding: {e}"))),
    }
}

fn enum_from_text<T: DeserializeOwned>(text: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| StoreError::QueryFailed(format!("enum decoding '{text}': {e}")))
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("timestamp '{text}': {e}")))
}

#[async_trait]
impl ViolationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put_violation_record(&self, record: &ViolationRecord) -> Result<(), StoreError> {
        // INSERT OR IGNORE: at-least-once delivery must not duplicate records.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO violation_records
            (id, user_id, violation_type, severity, content_excerpt, detection_method,
             created_at, escalation_level_after, action_taken, resolved)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(enum_to_text(&record.violation_type)?)
        .bind(enum_to_text(&record.severity)?)
        .bind(&record.content_excerpt)
        .bind(enum_to_text(&record.detection_method)?)
        .bind(record.created_at.to_rfc3339())
        .bind(record.escalation_level_after as i64)
        .bind(
            serde_json::to_string(&record.action_taken)
                .map_err(|e| StoreError::Storage(format!("action_taken encoding: {e}")))?,
        )
        .bind(record.resolved as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert violation record: {e}")))?;
        Ok(())
    }

    async fn get_violation_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ViolationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, violation_type, severity, content_excerpt, detection_method,
                   created_at, escalation_level_after, action_taken, resolved
            FROM violation_records
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("violation history: {e}")))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn get_user_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<UserViolationProfile>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, total_violations, escalation_level, last_violation_at, account_status
            FROM user_profiles
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("user profile: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let last_violation_at: Option<String> = column(&row, "last_violation_at")?;
        Ok(Some(UserViolationProfile {
            user_id: column(&row, "user_id")?,
            total_violations: column::<i64>(&row, "total_violations")? as u64,
            escalation_level: column::<i64>(&row, "escalation_level")? as u32,
            last_violation_at: last_violation_at.as_deref().map(parse_timestamp).transpose()?,
            account_status: enum_from_text(&column::<String>(&row, "account_status")?)?,
            violation_history: Vec::new(),
        }))
    }

    async fn upsert_profile(&self, profile: &UserViolationProfile) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles
            (user_id, total_violations, escalation_level, last_violation_at, account_status)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                total_violations = excluded.total_violations,
                escalation_level = excluded.escalation_level,
                last_violation_at = excluded.last_violation_at,
                account_status = excluded.account_status
            "#,
        )
        .bind(&profile.user_id)
        .bind(profile.total_violations as i64)
        .bind(profile.escalation_level as i64)
        .bind(profile.last_violation_at.map(|t| t.to_rfc3339()))
        .bind(enum_to_text(&profile.account_status)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("upsert profile: {e}")))?;
        Ok(())
    }

    async fn upsert_account_status(
        &self,
        user_id: &str,
        status: AccountStatus,
        expiry: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, account_status, status_expiry)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                account_status = excluded.account_status,
                status_expiry = excluded.status_expiry
            "#,
        )
        .bind(user_id)
        .bind(enum_to_text(&status)?)
        .bind(expiry.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("upsert account status: {e}")))?;
        Ok(())
    }

    async fn mark_resolved(&self, record_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE violation_records SET resolved = 1 WHERE id = ?")
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("mark resolved: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CostStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put_cost_event(&self, event: &CostEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO cost_events
            (id, operation_type, cost, recorded_at, day, hour_slot,
             daily_total_after, hourly_total_after)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.operation_type)
        .bind(event.cost)
        .bind(event.recorded_at.to_rfc3339())
        .bind(event.recorded_at.date_naive().to_string())
        .bind(HourSlot::of(event.recorded_at).to_string())
        .bind(event.daily_total_after)
        .bind(event.hourly_total_after)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("insert cost event: {e}")))?;
        Ok(())
    }

    async fn get_daily_cost(&self, date: NaiveDate) -> Result<f64, StoreError> {
        let row = sqlx::query("SELECT COALESCE(SUM(cost), 0.0) AS total FROM cost_events WHERE day = ?")
            .bind(date.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("daily cost: {e}")))?;
        column(&row, "total")
    }

    async fn get_hourly_cost(&self, slot: &HourSlot) -> Result<f64, StoreError> {
        let row =
            sqlx::query("SELECT COALESCE(SUM(cost), 0.0) AS total FROM cost_events WHERE hour_slot = ?")
                .bind(slot.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::QueryFailed(format!("hourly cost: {e}")))?;
        column(&row, "total")
    }

    async fn put_breaker_trip(&self, reason: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO breaker_trips (tripped_at, reason) VALUES (?, ?)")
            .bind(at.to_rfc3339())
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("insert breaker trip: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    fn test_record(id: &str, user_id: &str, level: u32) -> ViolationRecord {
        ViolationRecord {
            id: id.into(),
            user_id: user_id.into(),
            violation_type: ViolationCategory::EmailAddress,
            severity: Severity::Medium,
            content_excerpt: "email me at [EMAIL BLOCKED]".into(),
            detection_method: DetectionMethod::Automated,
            created_at: Utc::now(),
            escalation_level_after: level,
            action_taken: EnforcementAction::MessagingRestriction {
                duration_hours: Some(24),
            },
            resolved: false,
        }
    }

    #[tokio::test]
    async fn record_roundtrip() {
        let store = test_store().await;
        let record = test_record("v1", "user-1", 2);
        store.put_violation_record(&record).await.unwrap();

        let history = store.get_violation_history("user-1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        let loaded = &history[0];
        assert_eq!(loaded.violation_type, ViolationCategory::EmailAddress);
        assert_eq!(loaded.severity, Severity::Medium);
        assert_eq!(loaded.escalation_level_after, 2);
        assert_eq!(
            loaded.action_taken,
            EnforcementAction::MessagingRestriction { duration_hours: Some(24) }
        );
        assert!(!loaded.resolved);
    }

    #[tokio::test]
    async fn replayed_record_does_not_duplicate() {
        let store = test_store().await;
        let record = test_record("v1", "user-1", 1);
        store.put_violation_record(&record).await.unwrap();
        store.put_violation_record(&record).await.unwrap();

        let history = store.get_violation_history("user-1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn profile_upsert_roundtrip() {
        let store = test_store().await;
        assert!(store.get_user_profile("user-1").await.unwrap().is_none());

        let mut profile = UserViolationProfile::new("user-1");
        profile.total_violations = 3;
        profile.escalation_level = 4;
        profile.last_violation_at = Some(Utc::now());
        profile.account_status = AccountStatus::Banned;
        store.upsert_profile(&profile).await.unwrap();

        let loaded = store.get_user_profile("user-1").await.unwrap().unwrap();
        assert_eq!(loaded.total_violations, 3);
        assert_eq!(loaded.escalation_level, 4);
        assert_eq!(loaded.account_status, AccountStatus::Banned);
        assert!(loaded.last_violation_at.is_some());
    }

    #[tokio::test]
    async fn account_status_upsert_creates_profile() {
        let store = test_store().await;
        let expiry = Utc::now() + chrono::Duration::hours(24);
        store
            .upsert_account_status("user-9", AccountStatus::Restricted, Some(expiry))
            .await
            .unwrap();

        let profile = store.get_user_profile("user-9").await.unwrap().unwrap();
        assert_eq!(profile.account_status, AccountStatus::Restricted);
        assert_eq!(profile.escalation_level, 0);
    }

    #[tokio::test]
    async fn mark_resolved() {
        let store = test_store().await;
        store.put_violation_record(&test_record("v1", "u", 1)).await.unwrap();

        store.mark_resolved("v1").await.unwrap();
        let history = store.get_violation_history("u", 1).await.unwrap();
        assert!(history[0].resolved);

        assert!(matches!(
            store.mark_resolved("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cost_window_sums() {
        let store = test_store().await;
        let now = Utc::now();
        for (i, cost) in [0.25, 0.75].iter().enumerate() {
            store
                .put_cost_event(&CostEvent {
                    id: format!("c{i}"),
                    operation_type: "llm_call".into(),
                    cost: *cost,
                    recorded_at: now,
                    daily_total_after: 0.0,
                    hourly_total_after: 0.0,
                })
                .await
                .unwrap();
        }

        let daily = store.get_daily_cost(now.date_naive()).await.unwrap();
        assert!((daily - 1.0).abs() < 1e-10);

        let hourly = store.get_hourly_cost(&HourSlot::of(now)).await.unwrap();
        assert!((hourly - 1.0).abs() < 1e-10);

        let empty = store
            .get_daily_cost(now.date_naive().pred_opt().unwrap())
            .await
            .unwrap();
        assert_eq!(empty, 0.0);
    }

    #[tokio::test]
    async fn breaker_trip_persists() {
        let store = test_store().await;
        store
            .put_breaker_trip("daily projection exceeded emergency threshold", Utc::now())
            .await
            .unwrap();
    }
}
