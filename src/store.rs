//! Loads fresh rule snapshots from the backing relational store.
//!
//! The two rule queries are operator-supplied SQL, so they run as raw
//! statements instead of entity queries. Both must succeed for a load to
//! count; a failure in either aborts the whole load and no partial snapshot
//! is ever published.

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, QueryResult,
    Statement,
};
use std::time::Duration;
use tokio::time::timeout;

use crate::cache::FileCache;
use crate::errors::EngineError;
use crate::rules::types::{ProfileRow, UserRow};
use crate::rules::RuleSnapshot;
use crate::settings::Settings;

const CACHE_PROFILES: &str = "profiles";
const CACHE_USERS: &str = "users";

#[derive(Clone)]
pub struct SnapshotStore {
    db: DatabaseConnection,
    profiles_query: String,
    users_query: String,
    query_timeout: Duration,
    default_domain: String,
    cache: Option<FileCache>,
}

impl SnapshotStore {
    /// Build the connection pool. The pool is configured to connect lazily so
    /// an unreachable store surfaces on the first `load`, where bootstrap can
    /// fall back to the persisted cache instead of failing outright.
    pub async fn connect(settings: &Settings) -> Result<Self, EngineError> {
        let db_cfg = &settings.database;
        let mut opts = ConnectOptions::new(db_cfg.url.clone());
        opts.max_connections(db_cfg.max_connections)
            .connect_timeout(Duration::from_secs(db_cfg.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(db_cfg.idle_timeout_secs))
            .set_schema_search_path(db_cfg.schema.clone())
            .connect_lazy(true)
            .sqlx_logging(false);
        let db = Database::connect(opts).await?;

        let cache = settings
            .cache
            .enabled
            .then(|| FileCache::new(&settings.cache.path));

        Ok(Self {
            db,
            profiles_query: db_cfg.profiles_query.clone(),
            users_query: db_cfg.users_query.clone(),
            query_timeout: Duration::from_secs(db_cfg.query_timeout_secs),
            default_domain: settings.relay.default_domain.clone(),
            cache,
        })
    }

    /// Run both rule queries and compile a fresh snapshot. On success the raw
    /// rows are persisted to the fallback cache; a cache-write failure is
    /// logged, not fatal.
    pub async fn load(&self) -> Result<RuleSnapshot, EngineError> {
        let profile_rows = self.fetch_profiles().await?;
        let user_rows = self.fetch_users().await?;

        if let Some(cache) = &self.cache {
            let persisted = cache
                .set(CACHE_PROFILES, &profile_rows)
                .and_then(|()| cache.set(CACHE_USERS, &user_rows));
            if let Err(err) = persisted {
                tracing::warn!(%err, "Could not persist rule rows to the fallback cache");
            }
        }

        let snapshot = RuleSnapshot::build(profile_rows, user_rows, &self.default_domain);
        tracing::info!(
            profiles = snapshot.profiles.len(),
            users = snapshot.users.len(),
            "Loaded rule snapshot from the backing store"
        );
        Ok(snapshot)
    }

    /// Initial load at process start: the live store first, then the
    /// persisted cache. With neither available the engine must not start —
    /// it cannot serve authorization decisions with zero rules.
    pub async fn bootstrap(&self) -> Result<RuleSnapshot, EngineError> {
        match self.load().await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                tracing::error!(%err, "Initial rule load failed, trying the fallback cache");
                let Some(cache) = &self.cache else {
                    return Err(EngineError::Bootstrap(format!(
                        "store unreachable and no fallback cache is configured: {err}"
                    )));
                };
                let snapshot = snapshot_from_cache(cache, &self.default_domain)?;
                tracing::info!(
                    profiles = snapshot.profiles.len(),
                    users = snapshot.users.len(),
                    "Serving rules from the fallback cache"
                );
                Ok(snapshot)
            }
        }
    }

    async fn fetch_profiles(&self) -> Result<Vec<ProfileRow>, EngineError> {
        let rows = self.query_all(&self.profiles_query, "profiles").await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn fetch_users(&self) -> Result<Vec<UserRow>, EngineError> {
        let rows = self.query_all(&self.users_query, "users").await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Raw query under the configured deadline; a timeout is treated exactly
    /// like a connection failure.
    async fn query_all(
        &self,
        sql: &str,
        label: &'static str,
    ) -> Result<Vec<QueryResult>, EngineError> {
        let stmt = Statement::from_string(DbBackend::Postgres, sql.to_owned());
        match timeout(self.query_timeout, self.db.query_all(stmt)).await {
            Ok(rows) => Ok(rows?),
            Err(_elapsed) => Err(EngineError::QueryTimeout { query: label }),
        }
    }
}

/// Rebuild a snapshot from the persisted rows. Both keys must be present;
/// a half-written cache is no better than none.
pub fn snapshot_from_cache(
    cache: &FileCache,
    default_domain: &str,
) -> Result<RuleSnapshot, EngineError> {
    let profile_rows: Vec<ProfileRow> = cache
        .get(CACHE_PROFILES)?
        .ok_or_else(|| EngineError::Bootstrap("no cached profiles found".into()))?;
    let user_rows: Vec<UserRow> = cache
        .get(CACHE_USERS)?
        .ok_or_else(|| EngineError::Bootstrap("no cached users found".into()))?;
    Ok(RuleSnapshot::build(
        profile_rows,
        user_rows,
        default_domain,
    ))
}

fn profile_from_row(row: &QueryResult) -> Result<ProfileRow, EngineError> {
    Ok(ProfileRow {
        id: row.try_get("", "id")?,
        name: row.try_get("", "name")?,
        open: row.try_get::<Option<bool>>("", "open")?.unwrap_or(false),
        host: row.try_get("", "host")?,
        rcpt: row.try_get("", "rcpt")?,
        rcpt_re: row.try_get("", "rcpt_re")?,
        maxsize: row.try_get("", "maxsize")?,
    })
}

fn user_from_row(row: &QueryResult) -> Result<UserRow, EngineError> {
    Ok(UserRow {
        username: row.try_get("", "username")?,
        password: row.try_get("", "password")?,
        profile_id: row.try_get("", "profile_id")?,
        froms: row.try_get("", "froms")?,
    })
}
