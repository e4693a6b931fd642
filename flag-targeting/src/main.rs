use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common_redis::{CompressionConfig, RedisClient, RedisValueFormat};
use flag_targeting::config::{Config, ProjectIdCollection};
use flag_targeting::flags::feature_flag_list::list_project_ids;
use flag_targeting::flags::flags_cache::{FlagCacheManager, PostgresFlagFetcher};

fn init_logging(debug: bool) {
    let log_layer = {
        let base_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true);

        if debug {
            base_layer
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;
    init_logging(*config.debug);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.read_database_url)
        .await
        .context("Failed to connect to postgres")?;

    let compression = if *config.redis_compression_enabled {
        CompressionConfig::default()
    } else {
        CompressionConfig::disabled()
    };
    let redis = RedisClient::with_config(
        config.redis_url.clone(),
        compression,
        RedisValueFormat::default(),
        config.redis_response_timeout(),
        config.redis_connection_timeout(),
    )
    .await
    .context("Failed to connect to redis")?;

    let project_ids = match &config.project_ids_to_sync {
        ProjectIdCollection::None => {
            tracing::info!("PROJECT_IDS_TO_SYNC is empty, nothing to do");
            return Ok(());
        }
        ProjectIdCollection::All => list_project_ids(&pool)
            .await
            .context("Failed to list projects")?,
        ProjectIdCollection::ProjectIds(ids) => ids.clone(),
    };

    let manager = FlagCacheManager::from_config(
        Arc::new(redis),
        PostgresFlagFetcher::new(pool),
        &config,
    );

    let mut failed = 0;
    for &project_id in &project_ids {
        match manager.refresh(project_id, None).await {
            Ok(flags) => tracing::info!(
                project_id,
                flag_count = flags.len(),
                "Refreshed flags cache"
            ),
            Err(e) => {
                failed += 1;
                tracing::error!(project_id, error = %e, "Failed to refresh flags cache");
            }
        }
    }

    tracing::info!(
        projects = project_ids.len(),
        failed,
        "Finished syncing flags cache"
    );
    Ok(())
}
