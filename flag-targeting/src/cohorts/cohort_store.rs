use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::cohorts::cohort_models::{Cohort, CohortId};
use crate::errors::FlagError;
use crate::ProjectId;

/// Looks up a cohort definition by id, scoped to a project.
///
/// `Ok(None)` means the cohort does not exist in the project (or was deleted).
#[async_trait]
pub trait CohortStore: Send + Sync {
    async fn get(
        &self,
        cohort_id: CohortId,
        project_id: ProjectId,
    ) -> Result<Option<Cohort>, FlagError>;
}

pub struct PostgresCohortStore {
    pool: PgPool,
}

impl PostgresCohortStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CohortStore for PostgresCohortStore {
    #[instrument(skip_all, fields(cohort_id = cohort_id, project_id = project_id))]
    async fn get(
        &self,
        cohort_id: CohortId,
        project_id: ProjectId,
    ) -> Result<Option<Cohort>, FlagError> {
        let query = r#"
            SELECT c.id,
                  c.name,
                  c.team_id,
                  c.deleted,
                  c.is_static,
                  c.filters
              FROM posthog_cohort AS c
              JOIN posthog_team AS t ON (c.team_id = t.id)
            WHERE c.id = $1
              AND t.project_id = $2
              AND c.deleted = false
        "#;
        let cohort = sqlx::query_as::<_, Cohort>(query)
            .bind(cohort_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch cohort {} from database: {}", cohort_id, e);
                FlagError::from(e)
            })?;

        Ok(cohort)
    }
}

/// Cohorts already held in memory, e.g. everything a batch preloaded for one project.
///
/// Counts lookups, and can be told to fail or stall on specific ids to simulate a
/// broken backend.
#[derive(Default)]
pub struct InMemoryCohortStore {
    project_id: ProjectId,
    cohorts: HashMap<CohortId, Cohort>,
    failing: HashSet<CohortId>,
    delay: Option<Duration>,
    lookups: Arc<AtomicUsize>,
}

impl InMemoryCohortStore {
    pub fn new(project_id: ProjectId, cohorts: impl IntoIterator<Item = Cohort>) -> Self {
        Self {
            project_id,
            cohorts: cohorts.into_iter().map(|c| (c.id, c)).collect(),
            ..Default::default()
        }
    }

    pub fn with_failure(mut self, cohort_id: CohortId) -> Self {
        self.failing.insert(cohort_id);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CohortStore for InMemoryCohortStore {
    async fn get(
        &self,
        cohort_id: CohortId,
        project_id: ProjectId,
    ) -> Result<Option<Cohort>, FlagError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&cohort_id) {
            return Err(FlagError::DatabaseUnavailable);
        }
        if project_id != self.project_id {
            return Ok(None);
        }
        Ok(self
            .cohorts
            .get(&cohort_id)
            .filter(|c| !c.deleted)
            .cloned())
    }
}
