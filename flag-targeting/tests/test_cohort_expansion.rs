use rand::rngs::StdRng;
use rand::SeedableRng;
use rstest::rstest;
use serde_json::{json, Value};

use flag_targeting::cohorts::cohort_models::Cohort;
use flag_targeting::cohorts::cohort_resolver::ResolvedCohortCache;
use flag_targeting::flags::flag_models::FlagPropertyGroup;
use flag_targeting::utils::test_utils::{
    cohort_filter, cohort_with_filters, create_test_flag, match_conditions, person_filter,
    random_person,
};

mod common;
use common::{cohort_trees, normalizer_for, PROJECT_ID};

const KEYS: [&str; 3] = ["plan", "country", "role"];
const VALUES: [&str; 3] = ["a", "b", "c"];
const SAMPLED_USERS: usize = 500;

fn person(key: &str, value: &str) -> Value {
    json!({"key": key, "value": value, "type": "person", "operator": "exact"})
}

fn person_op(key: &str, value: &str, operator: &str) -> Value {
    json!({"key": key, "value": value, "type": "person", "operator": operator})
}

fn cohort(properties: Value) -> Cohort {
    cohort_with_filters(1, json!({"properties": properties}))
}

fn expandable_cohorts() -> Vec<Value> {
    vec![
        json!({"type": "AND", "values": [person("plan", "a")]}),
        json!({"type": "AND", "values": [person("plan", "a"), person("country", "b")]}),
        json!({"type": "OR", "values": [person("plan", "a"), person("plan", "b")]}),
        json!({"type": "OR", "values": [
            {"type": "AND", "values": [person("plan", "a"), person_op("country", "c", "is_not")]},
            {"type": "AND", "values": [person_op("role", "", "is_set"), person("plan", "c")]}
        ]}),
        json!({"type": "OR", "values": [
            {"type": "OR", "values": [person("role", "b")]},
            {"type": "AND", "values": [person("plan", "b")]}
        ]}),
        json!({"type": "AND", "values": [{"type": "OR", "values": [{"type": "AND", "values": [
            person("plan", "c"), person("role", "a")
        ]}]}]}),
    ]
}

fn flag_conditions(rollout: f64) -> Vec<FlagPropertyGroup> {
    vec![
        FlagPropertyGroup {
            properties: Some(vec![person_filter("role", "c")]),
            rollout_percentage: Some(100.0),
            variant: None,
        },
        FlagPropertyGroup {
            properties: Some(vec![cohort_filter(1)]),
            rollout_percentage: Some(rollout),
            variant: None,
        },
    ]
}

#[rstest]
#[tokio::test]
async fn test_normalized_conditions_match_the_same_users(
    #[values(0.0, 25.0, 50.0, 100.0)] rollout: f64,
) {
    let mut rng = StdRng::seed_from_u64(42);

    for (index, properties) in expandable_cohorts().into_iter().enumerate() {
        let cohorts = vec![cohort(properties)];
        let trees = cohort_trees(&cohorts);
        let flag = create_test_flag(index as i32, flag_conditions(rollout));
        let mut cache = ResolvedCohortCache::new();

        let normalized = normalizer_for(&cohorts)
            .normalize(PROJECT_ID, &flag, &mut cache)
            .await
            .unwrap();
        assert!(
            normalized
                .iter()
                .all(|c| c.properties.iter().flatten().all(|p| !p.is_cohort())),
            "cohort {index} should have been expanded: {normalized:?}"
        );

        for user in 0..SAMPLED_USERS {
            let distinct_id = format!("user_{user}");
            let props = random_person(&mut rng, &KEYS, &VALUES);
            let original = match_conditions(
                flag.get_conditions(),
                &flag.key,
                &distinct_id,
                &props,
                &trees,
            );
            let expanded = match_conditions(&normalized, &flag.key, &distinct_id, &props, &trees);
            assert_eq!(
                original, expanded,
                "cohort {index}, rollout {rollout}, user {props:?}"
            );
        }
    }
}

#[rstest]
#[case::negated_leaf(json!({"type": "AND", "values": [
    {"key": "plan", "value": "a", "type": "person", "operator": "exact", "negation": true}
]}))]
#[case::negated_in_or(json!({"type": "OR", "values": [
    person("plan", "a"),
    {"key": "plan", "value": "b", "type": "person", "operator": "exact", "negation": true}
]}))]
#[case::negated_in_nested_group(json!({"type": "OR", "values": [
    {"type": "AND", "values": [person("plan", "a")]},
    {"type": "AND", "values": [
        person("country", "b"),
        {"key": "role", "value": "c", "type": "person", "operator": "exact", "negation": true}
    ]}
]}))]
#[tokio::test]
async fn test_negated_properties_are_never_expanded(
    #[case] properties: Value,
    #[values(0.0, 50.0, 100.0)] rollout: f64,
) {
    let cohorts = vec![cohort(properties)];
    let flag = create_test_flag(1, flag_conditions(rollout));
    let mut cache = ResolvedCohortCache::new();

    let normalized = normalizer_for(&cohorts)
        .normalize(PROJECT_ID, &flag, &mut cache)
        .await
        .unwrap();
    assert_eq!(&normalized, flag.get_conditions());
}

#[tokio::test]
async fn test_one_cache_serves_a_batch() {
    let properties = json!({"type": "AND", "values": [person("plan", "a")]});
    let cohorts = vec![cohort(properties)];
    let normalizer = normalizer_for(&cohorts);
    let flags: Vec<_> = (1..=5)
        .map(|id| create_test_flag(id, flag_conditions(50.0)))
        .collect();
    let mut cache = ResolvedCohortCache::new();

    let normalized = normalizer
        .normalize_flags(PROJECT_ID, &flags, &mut cache)
        .await;

    assert_eq!(normalized.len(), 5);
    assert_eq!(cache.len(), 1);
    for conditions in normalized {
        assert_eq!(conditions.len(), 2);
        assert_eq!(
            conditions[1].properties,
            Some(vec![person_filter("plan", "a")])
        );
        assert_eq!(conditions[1].rollout_percentage, Some(50.0));
    }
}
