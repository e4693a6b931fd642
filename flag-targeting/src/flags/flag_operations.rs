use serde_json::json;
use std::collections::HashSet;

use crate::cohorts::cohort_models::CohortId;
use crate::cohorts::cohort_resolver::{CohortGraphResolver, ResolvedCohortCache};
use crate::errors::FlagError;
use crate::flags::flag_models::*;
use crate::ProjectId;

impl FeatureFlag {
    pub fn get_conditions(&self) -> &Vec<FlagPropertyGroup> {
        &self.filters.groups
    }

    pub fn uses_cohorts(&self) -> bool {
        self.get_conditions().iter().any(|condition| {
            condition
                .properties
                .iter()
                .flatten()
                .any(|filter| filter.is_cohort())
        })
    }

    /// Cohort ids referenced directly by the flag's conditions, in first-seen order.
    pub fn direct_cohort_ids(&self) -> Result<Vec<CohortId>, FlagError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for filter in self
            .get_conditions()
            .iter()
            .flat_map(|condition| condition.properties.iter().flatten())
        {
            if let Some(id) = filter.get_cohort_id()? {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Every cohort the flag depends on, directly or through other cohorts.
    ///
    /// Cohorts that cannot be found are left out. With `sort_by_topological_order` the
    /// ids come dependencies first; otherwise they are in ascending id order.
    pub async fn get_cohort_ids(
        &self,
        resolver: &CohortGraphResolver,
        project_id: ProjectId,
        cache: &mut ResolvedCohortCache,
        sort_by_topological_order: bool,
    ) -> Result<Vec<CohortId>, FlagError> {
        let direct = self.direct_cohort_ids()?;
        if sort_by_topological_order {
            return Ok(resolver.resolve_ordered(project_id, direct, cache).await);
        }
        let mut ids: Vec<CohortId> = resolver
            .resolve(project_id, direct, cache)
            .await
            .into_iter()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

impl FeatureFlagRow {
    /// Filters as stored, upgrading the legacy shape (top level `properties` plus the
    /// row's `rollout_percentage`, no `groups`) into a single condition.
    pub fn get_filters(&self) -> serde_json::Value {
        if self.filters.get("groups").is_some() {
            return self.filters.clone();
        }
        json!({
            "groups": [{
                "properties": self.filters.get("properties").cloned().unwrap_or_else(|| json!([])),
                "rollout_percentage": self.rollout_percentage,
            }]
        })
    }

    pub fn into_flag(self) -> Result<FeatureFlag, FlagError> {
        let filters = serde_json::from_value(self.get_filters()).map_err(|e| {
            tracing::warn!(
                "Failed to deserialize filters for flag {} in team {}: {}",
                self.key,
                self.team_id,
                e
            );
            FlagError::DeserializeFiltersError
        })?;

        Ok(FeatureFlag {
            id: self.id,
            team_id: self.team_id,
            name: self.name,
            key: self.key,
            filters,
            deleted: self.deleted,
            active: self.active,
            ensure_experience_continuity: self.ensure_experience_continuity.unwrap_or(false),
            has_encrypted_payloads: self.has_encrypted_payloads.unwrap_or(false),
            version: self.version,
            evaluation_runtime: self.evaluation_runtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohorts::cohort_store::InMemoryCohortStore;
    use crate::properties::property_models::OperatorType;
    use crate::utils::test_utils::{
        cohort_filter, cohort_with_filters, cohort_with_person_filter, create_test_flag,
        person_filter,
    };
    use std::sync::Arc;
    use std::time::Duration;

    fn row(filters: serde_json::Value, rollout_percentage: Option<i32>) -> FeatureFlagRow {
        FeatureFlagRow {
            id: 1,
            team_id: 1,
            name: Some("Legacy".to_string()),
            key: "legacy".to_string(),
            filters,
            rollout_percentage,
            deleted: false,
            active: true,
            ensure_experience_continuity: None,
            has_encrypted_payloads: None,
            version: Some(1),
            evaluation_runtime: Some("all".to_string()),
        }
    }

    #[test]
    fn test_legacy_filters_become_single_condition() {
        let flag = row(
            json!({"properties": [{"key": "email", "value": "a@b.com", "type": "person"}]}),
            Some(30),
        )
        .into_flag()
        .unwrap();

        assert_eq!(flag.get_conditions().len(), 1);
        let condition = &flag.get_conditions()[0];
        assert_eq!(condition.rollout_percentage, Some(30.0));
        assert_eq!(condition.properties.as_ref().unwrap()[0].key, "email");
        assert!(!flag.ensure_experience_continuity);
    }

    #[test]
    fn test_legacy_empty_filters() {
        let flag = row(json!({}), None).into_flag().unwrap();
        assert_eq!(flag.get_conditions().len(), 1);
        assert_eq!(flag.get_conditions()[0].properties, Some(vec![]));
        assert_eq!(flag.get_conditions()[0].rollout_percentage, None);
    }

    #[test]
    fn test_groups_filters_are_kept() {
        let flag = row(
            json!({"groups": [{"properties": [], "rollout_percentage": 100}]}),
            Some(5),
        )
        .into_flag()
        .unwrap();
        assert_eq!(flag.get_conditions()[0].rollout_percentage, Some(100.0));
    }

    #[test]
    fn test_invalid_filters() {
        let result = row(
            json!({"groups": [{"properties": "x", "rollout_percentage": 100}]}),
            None,
        )
        .into_flag();
        assert!(matches!(result, Err(FlagError::DeserializeFiltersError)));
    }

    #[test]
    fn test_unlisted_operator_and_keys_survive() {
        let filters = json!({
            "groups": [{
                "properties": [{
                    "key": "email",
                    "value": ["@a.com"],
                    "type": "person",
                    "operator": "icontains_multi"
                }],
                "rollout_percentage": 100
            }],
            "feature_enrollment": true
        });
        let flag = row(filters.clone(), None).into_flag().unwrap();

        let property = &flag.get_conditions()[0].properties.as_ref().unwrap()[0];
        assert_eq!(
            property.operator,
            Some(OperatorType::Unknown("icontains_multi".to_string()))
        );
        assert_eq!(flag.filters.extra.get("feature_enrollment"), Some(&json!(true)));
        assert_eq!(
            serde_json::to_value(&flag.filters).unwrap()["groups"][0]["properties"],
            filters["groups"][0]["properties"]
        );
    }

    #[test]
    fn test_direct_cohort_ids_dedup() {
        let flag = create_test_flag(
            1,
            vec![
                FlagPropertyGroup {
                    properties: Some(vec![cohort_filter(5)]),
                    rollout_percentage: Some(100.0),
                    variant: None,
                },
                FlagPropertyGroup {
                    properties: Some(vec![person_filter("plan", "pro"), cohort_filter(3)]),
                    rollout_percentage: Some(100.0),
                    variant: None,
                },
                FlagPropertyGroup {
                    properties: Some(vec![cohort_filter(5)]),
                    rollout_percentage: Some(50.0),
                    variant: None,
                },
            ],
        );
        assert!(flag.uses_cohorts());
        assert_eq!(flag.direct_cohort_ids().unwrap(), vec![5, 3]);
    }

    #[tokio::test]
    async fn test_get_cohort_ids_transitive() {
        let store = InMemoryCohortStore::new(
            1,
            vec![
                cohort_with_filters(
                    10,
                    json!({"properties": {"type": "OR", "values": [
                        {"key": "id", "value": 11, "type": "cohort"}
                    ]}}),
                ),
                cohort_with_person_filter(11, "plan", "pro"),
            ],
        );
        let resolver = CohortGraphResolver::new(Arc::new(store), Duration::from_millis(100));
        let flag = create_test_flag(
            1,
            vec![FlagPropertyGroup {
                properties: Some(vec![cohort_filter(10), cohort_filter(404)]),
                rollout_percentage: Some(100.0),
                variant: None,
            }],
        );
        let mut cache = ResolvedCohortCache::new();

        let ids = flag
            .get_cohort_ids(&resolver, 1, &mut cache, false)
            .await
            .unwrap();
        assert_eq!(ids, vec![10, 11]);

        let ordered = flag
            .get_cohort_ids(&resolver, 1, &mut cache, true)
            .await
            .unwrap();
        assert_eq!(ordered, vec![11, 10]);
        assert!(cache.is_missing(404));
    }

    #[test]
    fn test_flag_without_cohorts() {
        let flag = create_test_flag(
            1,
            vec![FlagPropertyGroup {
                properties: Some(vec![person_filter("plan", "pro")]),
                rollout_percentage: None,
                variant: None,
            }],
        );
        assert!(!flag.uses_cohorts());
        assert!(flag.direct_cohort_ids().unwrap().is_empty());
    }
}
