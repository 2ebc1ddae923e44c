//! Scheduler state that must survive a restart.
//!
//! Lives in the UNLOGGED `app_kv` table. A crash that loses it only means the next
//! cycle starts without waiting out the cooldown.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use ulid::Ulid;

/// Keys the scheduler writes to `app_kv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKey {
    /// RFC 3339 time the last scheduled cycle began.
    CycleStart,
    /// ULID of that cycle, for matching log lines to `harvest_results` rows.
    CycleId,
}

impl StateKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StateKey::CycleStart => "scheduler.cycle_start",
            StateKey::CycleId => "scheduler.cycle_id",
        }
    }
}

#[derive(Clone)]
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: StateKey) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT value FROM app_kv WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
    }

    /// Write every entry in one statement; existing keys are overwritten.
    pub async fn put_all(&self, entries: &[(StateKey, String)]) -> Result<(), sqlx::Error> {
        let (keys, values): (Vec<&str>, Vec<&str>) = entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .unzip();

        sqlx::query(
            r#"
            INSERT INTO app_kv (key, value)
            SELECT * FROM UNNEST($1::text[], $2::text[])
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(&keys)
        .bind(&values)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// When the last scheduled cycle began. An unreadable value counts as never.
    pub async fn last_cycle_start(&self) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
        let raw = self.get(StateKey::CycleStart).await?;
        Ok(raw.and_then(|v| DateTime::parse_from_rfc3339(&v).ok().map(|dt| dt.to_utc())))
    }

    pub async fn record_cycle_start(&self, cycle_id: Ulid, at: DateTime<Utc>) -> Result<(), sqlx::Error> {
        self.put_all(&[
            (StateKey::CycleStart, at.to_rfc3339()),
            (StateKey::CycleId, cycle_id.to_string()),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        for key in [StateKey::CycleStart, StateKey::CycleId] {
            assert!(key.as_str().starts_with("scheduler."), "{key:?}");
        }
        assert_ne!(StateKey::CycleStart.as_str(), StateKey::CycleId.as_str());
    }
}
