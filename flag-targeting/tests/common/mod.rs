#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use flag_targeting::cohorts::cohort_models::{Cohort, CohortId};
use flag_targeting::cohorts::cohort_resolver::CohortGraphResolver;
use flag_targeting::cohorts::cohort_store::InMemoryCohortStore;
use flag_targeting::config::DEFAULT_TEST_CONFIG;
use flag_targeting::flags::cohort_expansion::CohortConditionNormalizer;
use flag_targeting::properties::property_models::PropertyGroup;
use flag_targeting::ProjectId;

pub const PROJECT_ID: ProjectId = 1;

pub fn normalizer_for(cohorts: &[Cohort]) -> CohortConditionNormalizer {
    let store = Arc::new(InMemoryCohortStore::new(PROJECT_ID, cohorts.to_vec()));
    let resolver = CohortGraphResolver::new(store, DEFAULT_TEST_CONFIG.cohort_lookup_timeout());
    CohortConditionNormalizer::new(Arc::new(resolver))
}

/// Cohort definitions keyed by id, for evaluating cohort filters directly.
pub fn cohort_trees(cohorts: &[Cohort]) -> HashMap<CohortId, PropertyGroup> {
    cohorts
        .iter()
        .map(|c| (c.id, c.properties().expect("cohort parses")))
        .collect()
}
