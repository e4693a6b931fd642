use async_trait::async_trait;
use common_redis::{Client as RedisClient, CustomRedisError};
use metrics::counter;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FeatureFlagList, TEAM_FLAGS_CACHE_PREFIX};
use crate::metrics::consts::{FLAG_CACHE_READS_COUNTER, FLAG_CACHE_WRITES_COUNTER};
use crate::ProjectId;

/// Source of truth for a project's flags.
#[async_trait]
pub trait FlagFetcher: Send + Sync {
    async fn fetch(&self, project_id: ProjectId) -> Result<Vec<FeatureFlag>, FlagError>;
}

pub struct PostgresFlagFetcher {
    pool: PgPool,
}

impl PostgresFlagFetcher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlagFetcher for PostgresFlagFetcher {
    async fn fetch(&self, project_id: ProjectId) -> Result<Vec<FeatureFlag>, FlagError> {
        let list = FeatureFlagList::from_pg(&self.pool, project_id).await?;
        Ok(list.flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Created,
    Updated,
    Deleted,
}

impl FlagChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagChange::Created => "created",
            FlagChange::Updated => "updated",
            FlagChange::Deleted => "deleted",
        }
    }
}

/// Keeps the per-project cache entry of active flags in step with the source of truth.
///
/// The cache is an optimization only: write failures are logged and swallowed, and
/// every read failure looks like a miss.
pub struct FlagCacheManager<F: FlagFetcher = PostgresFlagFetcher> {
    redis: Arc<dyn RedisClient + Send + Sync>,
    fetcher: F,
    ttl: Duration,
    operation_timeout: Duration,
}

impl<F: FlagFetcher> FlagCacheManager<F> {
    pub fn new(
        redis: Arc<dyn RedisClient + Send + Sync>,
        fetcher: F,
        ttl: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            redis,
            fetcher,
            ttl,
            operation_timeout,
        }
    }

    pub fn from_config(
        redis: Arc<dyn RedisClient + Send + Sync>,
        fetcher: F,
        config: &Config,
    ) -> Self {
        Self::new(
            redis,
            fetcher,
            config.flags_cache_ttl(),
            config.cache_operation_timeout(),
        )
    }

    pub fn cache_key(project_id: ProjectId) -> String {
        format!("{TEAM_FLAGS_CACHE_PREFIX}{project_id}")
    }

    /// Rewrites the project's cache entry and returns the cached flags.
    ///
    /// With `flags` of `None` the flags are loaded from the source of truth; that load is
    /// the only failure this returns.
    #[instrument(skip_all, fields(project_id = project_id))]
    pub async fn refresh(
        &self,
        project_id: ProjectId,
        flags: Option<Vec<FeatureFlag>>,
    ) -> Result<Vec<FeatureFlag>, FlagError> {
        let flags = match flags {
            Some(flags) => flags,
            None => self.fetcher.fetch(project_id).await?,
        };
        let flags: Vec<FeatureFlag> = flags
            .into_iter()
            .filter(|flag| flag.active && !flag.deleted)
            .collect();

        let payload = match serde_json::to_string(&flags) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize flags for project {}: {}", project_id, e);
                counter!(FLAG_CACHE_WRITES_COUNTER, "outcome" => "serialization_error")
                    .increment(1);
                return Ok(flags);
            }
        };

        let write = tokio::time::timeout(
            self.operation_timeout,
            self.redis
                .setex(Self::cache_key(project_id), payload, self.ttl.as_secs()),
        )
        .await;

        match write {
            Ok(Ok(())) => {
                debug!(count = flags.len(), "Wrote flags to cache");
                counter!(FLAG_CACHE_WRITES_COUNTER, "outcome" => "success").increment(1);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to write flags to cache");
                counter!(FLAG_CACHE_WRITES_COUNTER, "outcome" => "error").increment(1);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Timed out writing flags to cache"
                );
                counter!(FLAG_CACHE_WRITES_COUNTER, "outcome" => "timeout").increment(1);
            }
        }

        Ok(flags)
    }

    /// Reads the project's cached flags. Any failure reads as `None`.
    #[instrument(skip_all, fields(project_id = project_id))]
    pub async fn read(&self, project_id: ProjectId) -> Option<Vec<FeatureFlag>> {
        let read = tokio::time::timeout(
            self.operation_timeout,
            self.redis.get(Self::cache_key(project_id)),
        )
        .await;

        let payload = match read {
            Ok(Ok(payload)) => payload,
            Ok(Err(CustomRedisError::NotFound)) => {
                debug!("No cached flags");
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "miss").increment(1);
                return None;
            }
            Ok(Err(CustomRedisError::ParseError(e))) => {
                error!(error = %e, "Failed to decode cached flags");
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "corrupt").increment(1);
                return None;
            }
            Ok(Err(e)) if e.is_unavailable() => {
                warn!(error = %e, "Flags cache unavailable");
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "unavailable").increment(1);
                return None;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Unexpected error reading cached flags");
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "error").increment(1);
                return None;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Timed out reading flags from cache"
                );
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "timeout").increment(1);
                return None;
            }
        };

        match serde_json::from_str::<Vec<FeatureFlag>>(&payload) {
            Ok(flags) => {
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "hit").increment(1);
                Some(flags)
            }
            Err(e) => {
                error!(error = %e, "Failed to parse cached flags");
                counter!(FLAG_CACHE_READS_COUNTER, "outcome" => "corrupt").increment(1);
                None
            }
        }
    }

    /// Write-through hook for every create, update or delete of a flag in the project.
    #[instrument(skip_all, fields(project_id = project_id, change = change.as_str()))]
    pub async fn on_flag_write(
        &self,
        project_id: ProjectId,
        change: FlagChange,
    ) -> Result<Vec<FeatureFlag>, FlagError> {
        info!("Refreshing flags cache after flag {}", change.as_str());
        self.refresh(project_id, None).await
    }
}
