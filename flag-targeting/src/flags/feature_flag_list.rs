use metrics::counter;
use sqlx::PgPool;
use tracing::instrument;

use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FeatureFlagList, FeatureFlagRow};
use crate::metrics::consts::{DB_FLAG_READS_COUNTER, TOMBSTONE_COUNTER};
use crate::ProjectId;

impl FeatureFlagList {
    /// Converts database rows, skipping (and counting) rows whose filters don't parse.
    pub fn from_rows(rows: Vec<FeatureFlagRow>) -> Self {
        let flags = rows
            .into_iter()
            .filter_map(|row| match row.into_flag() {
                Ok(flag) => Some(flag),
                Err(_) => {
                    counter!(
                        TOMBSTONE_COUNTER,
                        "namespace" => "feature_flags",
                        "operation" => "flag_filter_deserialization_error",
                        "component" => "feature_flag_list",
                    )
                    .increment(1);
                    None
                }
            })
            .collect();
        Self { flags }
    }

    /// Returns the active, non-deleted feature flags of every team in a project
    #[instrument(skip_all, fields(project_id = project_id))]
    pub async fn from_pg(pool: &PgPool, project_id: ProjectId) -> Result<Self, FlagError> {
        let query = r#"
            SELECT f.id,
                  f.team_id,
                  f.name,
                  f.key,
                  f.filters,
                  f.rollout_percentage,
                  f.deleted,
                  f.active,
                  f.ensure_experience_continuity,
                  f.has_encrypted_payloads,
                  f.version,
                  f.evaluation_runtime
              FROM posthog_featureflag AS f
              JOIN posthog_team AS t ON (f.team_id = t.id)
            WHERE t.project_id = $1
              AND f.deleted = false
              AND f.active = true
            ORDER BY f.id
        "#;
        let rows = sqlx::query_as::<_, FeatureFlagRow>(query)
            .bind(project_id)
            .fetch_all(pool)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to fetch feature flags from database for project {}: {}",
                    project_id,
                    e
                );
                FlagError::from(e)
            })?;

        counter!(DB_FLAG_READS_COUNTER).increment(1);
        let list = Self::from_rows(rows);

        tracing::debug!(
            "Fetched {} flags from database for project {}",
            list.flags.len(),
            project_id
        );

        Ok(list)
    }
}

/// Every project that owns at least one team.
pub async fn list_project_ids(pool: &PgPool) -> Result<Vec<ProjectId>, FlagError> {
    let ids = sqlx::query_scalar::<_, ProjectId>(
        "SELECT DISTINCT project_id FROM posthog_team WHERE project_id IS NOT NULL ORDER BY project_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
