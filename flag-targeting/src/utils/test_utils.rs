use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use crate::cohorts::cohort_models::{Cohort, CohortId};
use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FlagFilters, FlagPropertyGroup};
use crate::flags::flags_cache::FlagFetcher;
use crate::properties::property_models::{
    OperatorType, PropertyFilter, PropertyGroup, PropertyNode, PropertyOperatorType, PropertyType,
};
use crate::ProjectId;

pub fn person_filter(key: &str, value: &str) -> PropertyFilter {
    PropertyFilter {
        key: key.to_string(),
        value: Some(json!(value)),
        operator: Some(OperatorType::Exact),
        prop_type: PropertyType::Person,
        negation: None,
        group_type_index: None,
    }
}

pub fn cohort_filter(cohort_id: CohortId) -> PropertyFilter {
    PropertyFilter {
        key: "id".to_string(),
        value: Some(json!(cohort_id)),
        operator: None,
        prop_type: PropertyType::Cohort,
        negation: None,
        group_type_index: None,
    }
}

pub fn cohort_with_filters(id: CohortId, filters: Value) -> Cohort {
    Cohort {
        id,
        name: Some(format!("Cohort {id}")),
        team_id: 1,
        deleted: false,
        is_static: false,
        filters: Some(filters),
    }
}

pub fn cohort_with_person_filter(id: CohortId, key: &str, value: &str) -> Cohort {
    cohort_with_filters(
        id,
        json!({
            "properties": {
                "type": "OR",
                "values": [{
                    "type": "AND",
                    "values": [{"key": key, "value": value, "type": "person", "operator": "exact"}]
                }]
            }
        }),
    )
}

pub fn create_test_flag(id: i32, conditions: Vec<FlagPropertyGroup>) -> FeatureFlag {
    FeatureFlag {
        id,
        team_id: 1,
        name: Some(format!("Test flag {id}")),
        key: format!("test_flag_{id}"),
        filters: FlagFilters {
            groups: conditions,
            ..Default::default()
        },
        deleted: false,
        active: true,
        ensure_experience_continuity: false,
        has_encrypted_payloads: false,
        version: Some(1),
        evaluation_runtime: Some("all".to_string()),
    }
}

/// Flag source backed by a shared list that tests can swap out between calls.
#[derive(Clone, Default)]
pub struct StaticFlagFetcher {
    flags: Arc<Mutex<Vec<FeatureFlag>>>,
    failing: bool,
}

impl StaticFlagFetcher {
    pub fn new(flags: Vec<FeatureFlag>) -> Self {
        Self {
            flags: Arc::new(Mutex::new(flags)),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn set_flags(&self, flags: Vec<FeatureFlag>) {
        if let Ok(mut guard) = self.flags.lock() {
            *guard = flags;
        }
    }
}

#[async_trait]
impl FlagFetcher for StaticFlagFetcher {
    async fn fetch(&self, _project_id: ProjectId) -> Result<Vec<FeatureFlag>, FlagError> {
        if self.failing {
            return Err(FlagError::DatabaseUnavailable);
        }
        self.flags
            .lock()
            .map(|flags| flags.clone())
            .map_err(|e| FlagError::Internal(e.to_string()))
    }
}

/// A minimal matcher for the operators the fixtures use: exact, is_not, is_set and
/// is_not_set. Anything else never matches.
pub fn match_filter(filter: &PropertyFilter, properties: &HashMap<String, Value>) -> bool {
    let actual = properties.get(&filter.key);
    let expected = filter.value.as_ref();
    let equals = |actual: &Value| match expected {
        Some(Value::Array(options)) => options.contains(actual),
        Some(value) => value == actual,
        None => false,
    };

    let matched = match filter.operator.as_ref() {
        None | Some(OperatorType::Exact) => actual.is_some_and(equals),
        Some(OperatorType::IsNot) => actual.is_some_and(|a| !equals(a)),
        Some(OperatorType::IsSet) => actual.is_some(),
        Some(OperatorType::IsNotSet) => actual.is_none(),
        _ => false,
    };
    matched != filter.is_negated()
}

/// Evaluates a property tree; cohort filters look up membership in `cohorts`.
pub fn match_tree(
    group: &PropertyGroup,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, PropertyGroup>,
) -> bool {
    let mut results = group.values.iter().map(|node| match node {
        PropertyNode::Group(inner) => match_tree(inner, properties, cohorts),
        PropertyNode::Filter(filter) => match_leaf(filter, properties, cohorts),
    });
    match group.operator {
        PropertyOperatorType::And => results.all(|r| r),
        PropertyOperatorType::Or => results.any(|r| r),
    }
}

fn match_leaf(
    filter: &PropertyFilter,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, PropertyGroup>,
) -> bool {
    match filter.get_cohort_id() {
        Ok(Some(id)) => {
            let member = cohorts
                .get(&id)
                .is_some_and(|tree| match_tree(tree, properties, cohorts));
            member != filter.is_negated()
        }
        Ok(None) => match_filter(filter, properties),
        Err(_) => false,
    }
}

/// Stable position of a user in `[0, 1)` for a flag's rollout.
pub fn rollout_hash(flag_key: &str, distinct_id: &str) -> f64 {
    let mut hasher = DefaultHasher::new();
    flag_key.hash(&mut hasher);
    distinct_id.hash(&mut hasher);
    (hasher.finish() % 10_000) as f64 / 10_000.0
}

/// Whether a user gets the flag under `conditions`: any condition whose properties all
/// match and whose rollout covers the user's hash.
pub fn match_conditions(
    conditions: &[FlagPropertyGroup],
    flag_key: &str,
    distinct_id: &str,
    properties: &HashMap<String, Value>,
    cohorts: &HashMap<CohortId, PropertyGroup>,
) -> bool {
    let hash = rollout_hash(flag_key, distinct_id);
    conditions.iter().any(|condition| {
        let props_match = condition
            .properties
            .iter()
            .flatten()
            .all(|filter| match_leaf(filter, properties, cohorts));
        let rollout = condition.rollout_percentage.unwrap_or(100.0);
        props_match && hash < rollout / 100.0
    })
}

/// A random user drawn from a small value space, so property filters match often.
pub fn random_person<R: Rng>(
    rng: &mut R,
    keys: &[&str],
    values: &[&str],
) -> HashMap<String, Value> {
    let mut person = HashMap::new();
    for key in keys {
        if rng.gen_bool(0.8) {
            let value = values[rng.gen_range(0..values.len())];
            person.insert(key.to_string(), json!(value));
        }
    }
    person
}
