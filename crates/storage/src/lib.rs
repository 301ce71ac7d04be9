use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use shared::state::AggregateState;

/// Load/save contract for the single aggregate snapshot.
///
/// `load` yields `Ok(None)` both when nothing was stored yet and when the
/// stored payload cannot be decoded; callers reseed in either case. Errors
/// are reserved for the backing store itself being unreachable.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<AggregateState>>;
    async fn save(&self, state: &AggregateState) -> Result<()>;
}

fn decode_snapshot(raw: &str) -> Option<AggregateState> {
    match serde_json::from_str::<AggregateState>(raw) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!(error = %err, "stored state is malformed; ignoring it");
            None
        }
    }
}

fn encode_snapshot(state: &AggregateState) -> Result<String> {
    serde_json::to_string(state).context("failed to serialize aggregate state")
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid sqlite url '{database_url}'"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn load_raw(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT payload FROM aggregate_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("failed to read aggregate state")?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    /// Writes a payload verbatim; the snapshot path goes through [`StateStore::save`].
    pub async fn save_raw(&self, payload: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO aggregate_state (id, payload, saved_at)
             VALUES (1, ?, CURRENT_TIMESTAMP)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, saved_at = CURRENT_TIMESTAMP",
        )
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("failed to write aggregate state")?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for Storage {
    async fn load(&self) -> Result<Option<AggregateState>> {
        Ok(self.load_raw().await?.as_deref().and_then(decode_snapshot))
    }

    async fn save(&self, state: &AggregateState) -> Result<()> {
        let payload = encode_snapshot(state)?;
        self.save_raw(&payload).await?;
        debug!(bytes = payload.len(), "saved aggregate state");
        Ok(())
    }
}

/// Keeps the serialized snapshot in memory; used by tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    payload: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Mutex::new(Some(payload.into())),
        }
    }

    pub async fn raw(&self) -> Option<String> {
        self.payload.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<AggregateState>> {
        Ok(self.payload.lock().await.as_deref().and_then(decode_snapshot))
    }

    async fn save(&self, state: &AggregateState) -> Result<()> {
        let payload = encode_snapshot(state)?;
        *self.payload.lock().await = Some(payload);
        Ok(())
    }
}

/// Turns a bare file path into a sqlite url; urls pass through untouched.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
