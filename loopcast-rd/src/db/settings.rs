//! Typed key/value settings
//!
//! Values are stored as text with a `value_type` tag so they read back as
//! the type they were written with. Configuration getters write their
//! default on first read, so the settings table always shows the values in
//! effect.

use super::{persistence_error, RotationState, WRITE_LOCK_WAIT_MS};
use crate::error::{Error, Result};
use crate::retry::retry_on_lock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Total number of items swapped into the current slot
pub const TOTAL_PLAYED_KEY: &str = "total_played";

/// A typed setting value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Text(String),
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
}

impl StateValue {
    fn type_tag(&self) -> &'static str {
        match self {
            StateValue::Text(_) => "string",
            StateValue::Integer(_) => "integer",
            StateValue::Float(_) => "float",
            StateValue::DateTime(_) => "datetime",
            StateValue::Json(_) => "json",
        }
    }

    fn to_storage(&self) -> String {
        match self {
            StateValue::Text(s) => s.clone(),
            StateValue::Integer(i) => i.to_string(),
            StateValue::Float(f) => f.to_string(),
            StateValue::DateTime(dt) => dt.to_rfc3339(),
            StateValue::Json(v) => v.to_string(),
        }
    }

    fn from_storage(key: &str, value: String, value_type: &str) -> Result<Self> {
        let bad = |e: String| Error::Config(format!("Failed to parse setting '{}': {}", key, e));
        Ok(match value_type {
            "integer" => StateValue::Integer(value.parse().map_err(|e| bad(format!("{}", e)))?),
            "float" => StateValue::Float(value.parse().map_err(|e| bad(format!("{}", e)))?),
            "datetime" => StateValue::DateTime(
                DateTime::parse_from_rfc3339(&value)
                    .map_err(|e| bad(e.to_string()))?
                    .with_timezone(&Utc),
            ),
            "json" => StateValue::Json(serde_json::from_str(&value).map_err(|e| bad(e.to_string()))?),
            _ => StateValue::Text(value),
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Float(f) => Some(*f),
            StateValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            StateValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::Text(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::Text(v.to_string())
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Integer(v)
    }
}

impl From<u64> for StateValue {
    fn from(v: u64) -> Self {
        StateValue::Integer(v.min(i64::MAX as u64) as i64)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Float(v)
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(v: DateTime<Utc>) -> Self {
        StateValue::DateTime(v)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(v: serde_json::Value) -> Self {
        StateValue::Json(v)
    }
}

async fn upsert<'e, E>(executor: E, key: &str, value: &StateValue) -> std::result::Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, value_type, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            value_type = excluded.value_type,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_storage())
    .bind(value.type_tag())
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

impl RotationState {
    /// Read a typed value
    pub async fn get(&self, key: &str) -> Result<Option<StateValue>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, value_type FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(self.pool())
                .await?;

        row.map(|(value, value_type)| StateValue::from_storage(key, value, &value_type))
            .transpose()
    }

    /// Insert or replace a typed value
    pub async fn put(&self, key: &str, value: impl Into<StateValue>) -> Result<()> {
        let value = value.into();
        let _guard = self.writer().await;

        retry_on_lock("settings put", WRITE_LOCK_WAIT_MS, || {
            upsert(self.pool(), key, &value)
        })
        .await
        .map_err(persistence_error("settings put"))
    }

    /// Read-modify-write a value under the writer lock, in one transaction
    ///
    /// `f` receives the current value (if any) and returns the replacement.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<StateValue>
    where
        F: FnOnce(Option<StateValue>) -> StateValue,
    {
        let _guard = self.writer().await;
        let map_err = persistence_error("settings update");

        let mut tx = self.pool().begin().await.map_err(&map_err)?;

        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, value_type FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(&map_err)?;
        let current = row
            .map(|(value, value_type)| StateValue::from_storage(key, value, &value_type))
            .transpose()?;

        let next = f(current);
        upsert(&mut *tx, key, &next).await.map_err(&map_err)?;
        tx.commit().await.map_err(&map_err)?;

        Ok(next)
    }

    /// Atomically add `delta` to an integer counter, returning the new value
    pub async fn increment_counter(&self, key: &str, delta: i64) -> Result<i64> {
        let value = self
            .update(key, |current| {
                let base = current.and_then(|v| v.as_i64()).unwrap_or(0);
                StateValue::Integer(base + delta)
            })
            .await?;
        Ok(value.as_i64().unwrap_or(0))
    }

    /// Generic setting getter
    ///
    /// Returns None if key doesn't exist. Parses the stored text using FromStr.
    pub async fn get_setting<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;

        match value {
            Some(s) => match s.parse::<T>() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Err(Error::Config(format!(
                    "Failed to parse setting '{}' value: {}",
                    key, s
                ))),
            },
            None => Ok(None),
        }
    }

    /// Read a setting, writing `default` when it is missing
    pub async fn get_or_init<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr + Into<StateValue> + Clone,
    {
        match self.get_setting::<T>(key).await? {
            Some(value) => Ok(value),
            None => {
                self.put(key, default.clone()).await?;
                Ok(default)
            }
        }
    }

    /// All settings as `(key, value)` pairs, ordered by key
    pub async fn all_settings(&self) -> Result<Vec<(String, StateValue)>> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT key, value, value_type FROM settings ORDER BY key")
                .fetch_all(self.pool())
                .await?;

        rows.into_iter()
            .map(|(key, value, value_type)| {
                let parsed = StateValue::from_storage(&key, value, &value_type)?;
                Ok((key, parsed))
            })
            .collect()
    }
}
