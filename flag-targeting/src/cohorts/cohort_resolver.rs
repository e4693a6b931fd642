use metrics::counter;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::DfsPostOrder;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::cohorts::cohort_models::{Cohort, CohortId};
use crate::cohorts::cohort_store::CohortStore;
use crate::metrics::consts::{
    COHORT_FILTERS_PARSE_ERRORS_COUNTER, COHORT_LOOKUP_COUNTER, COHORT_LOOKUP_ERRORS_COUNTER,
};
use crate::ProjectId;

#[derive(Debug, Clone)]
pub enum ResolvedCohort {
    Found(Arc<Cohort>),
    /// Looked up before and not usable: not found, deleted, or the lookup failed.
    Missing,
}

impl ResolvedCohort {
    pub fn found(&self) -> Option<Arc<Cohort>> {
        match self {
            ResolvedCohort::Found(cohort) => Some(cohort.clone()),
            ResolvedCohort::Missing => None,
        }
    }
}

/// Per-resolution memo of cohort lookups, owned by the caller.
///
/// One cache can be threaded through every flag of a batch so each cohort is looked up
/// at most once. It is never shared implicitly.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCohortCache {
    entries: HashMap<CohortId, ResolvedCohort>,
}

impl ResolvedCohortCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cohort_id: CohortId) -> Option<&ResolvedCohort> {
        self.entries.get(&cohort_id)
    }

    pub fn insert(&mut self, cohort_id: CohortId, entry: ResolvedCohort) {
        self.entries.insert(cohort_id, entry);
    }

    pub fn is_missing(&self, cohort_id: CohortId) -> bool {
        matches!(self.entries.get(&cohort_id), Some(ResolvedCohort::Missing))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walks cohort-to-cohort references starting from a set of cohorts.
pub struct CohortGraphResolver {
    store: Arc<dyn CohortStore>,
    lookup_timeout: Duration,
}

impl CohortGraphResolver {
    pub fn new(store: Arc<dyn CohortStore>, lookup_timeout: Duration) -> Self {
        Self {
            store,
            lookup_timeout,
        }
    }

    /// Returns the cohort, looking it up in the store only when the cache has no entry.
    ///
    /// Not found, deleted, store errors and timeouts are all recorded as a tombstone, so a
    /// cohort that failed once is not retried within the same cache.
    pub async fn fetch(
        &self,
        project_id: ProjectId,
        cohort_id: CohortId,
        cache: &mut ResolvedCohortCache,
    ) -> Option<Arc<Cohort>> {
        if let Some(entry) = cache.get(cohort_id) {
            counter!(COHORT_LOOKUP_COUNTER, "outcome" => "cached").increment(1);
            return entry.found();
        }

        let lookup =
            tokio::time::timeout(self.lookup_timeout, self.store.get(cohort_id, project_id)).await;

        let entry = match lookup {
            Ok(Ok(Some(cohort))) if !cohort.deleted => {
                counter!(COHORT_LOOKUP_COUNTER, "outcome" => "found").increment(1);
                ResolvedCohort::Found(Arc::new(cohort))
            }
            Ok(Ok(_)) => {
                counter!(COHORT_LOOKUP_COUNTER, "outcome" => "not_found").increment(1);
                ResolvedCohort::Missing
            }
            Ok(Err(e)) => {
                warn!(
                    cohort_id,
                    project_id,
                    error = %e,
                    "Cohort lookup failed, treating cohort as missing"
                );
                counter!(COHORT_LOOKUP_ERRORS_COUNTER, "reason" => e.error_code()).increment(1);
                ResolvedCohort::Missing
            }
            Err(_) => {
                warn!(
                    cohort_id,
                    project_id,
                    timeout_ms = self.lookup_timeout.as_millis() as u64,
                    "Cohort lookup timed out, treating cohort as missing"
                );
                counter!(COHORT_LOOKUP_ERRORS_COUNTER, "reason" => "timeout").increment(1);
                ResolvedCohort::Missing
            }
        };

        let found = entry.found();
        cache.insert(cohort_id, entry);
        found
    }

    /// Every cohort reachable from `cohort_ids` through cohort filters, including the
    /// starting cohorts themselves. Ids that resolve to a tombstone are left out.
    #[instrument(skip_all, fields(project_id = project_id))]
    pub async fn resolve(
        &self,
        project_id: ProjectId,
        cohort_ids: impl IntoIterator<Item = CohortId>,
        cache: &mut ResolvedCohortCache,
    ) -> HashSet<CohortId> {
        let graph = self.build_graph(project_id, cohort_ids, cache).await;
        graph.graph.node_weights().copied().collect()
    }

    /// Same set as [`resolve`](Self::resolve), ordered so that every cohort comes after
    /// all the cohorts it depends on. Members of a cycle appear once each, in
    /// traversal order.
    #[instrument(skip_all, fields(project_id = project_id))]
    pub async fn resolve_ordered(
        &self,
        project_id: ProjectId,
        cohort_ids: impl IntoIterator<Item = CohortId>,
        cache: &mut ResolvedCohortCache,
    ) -> Vec<CohortId> {
        let graph = self.build_graph(project_id, cohort_ids, cache).await;
        graph.dependencies_first()
    }

    /// Explicit-stack DFS over the references. Nodes are only created for cohorts that
    /// were found; edges point from dependent to dependency.
    async fn build_graph(
        &self,
        project_id: ProjectId,
        cohort_ids: impl IntoIterator<Item = CohortId>,
        cache: &mut ResolvedCohortCache,
    ) -> CohortGraph {
        let mut graph = CohortGraph::default();
        let mut edges: Vec<(CohortId, CohortId)> = Vec::new();
        let mut visited = HashSet::new();

        let mut stack: Vec<CohortId> = cohort_ids.into_iter().collect();
        stack.reverse();

        while let Some(cohort_id) = stack.pop() {
            if !visited.insert(cohort_id) {
                continue;
            }
            let Some(cohort) = self.fetch(project_id, cohort_id, cache).await else {
                continue;
            };
            graph.node(cohort_id);

            let dependencies = match cohort.extract_dependencies() {
                Ok(dependencies) => dependencies,
                Err(e) => {
                    warn!(
                        cohort_id,
                        project_id,
                        error = %e,
                        "Cohort filters could not be parsed, keeping it without dependencies"
                    );
                    counter!(COHORT_FILTERS_PARSE_ERRORS_COUNTER).increment(1);
                    continue;
                }
            };

            let mut dependencies: Vec<CohortId> = dependencies.into_iter().collect();
            dependencies.sort_unstable_by(|a, b| b.cmp(a));
            for dependency in dependencies {
                edges.push((cohort_id, dependency));
                if !visited.contains(&dependency) {
                    stack.push(dependency);
                }
            }
        }

        for (dependent, dependency) in edges {
            if let (Some(from), Some(to)) = (graph.index(dependent), graph.index(dependency)) {
                graph.graph.add_edge(from, to, ());
            }
        }
        graph
    }
}

#[derive(Default)]
struct CohortGraph {
    graph: DiGraph<CohortId, ()>,
    indices: HashMap<CohortId, NodeIndex>,
}

impl CohortGraph {
    fn node(&mut self, cohort_id: CohortId) -> NodeIndex {
        if let Some(index) = self.indices.get(&cohort_id) {
            return *index;
        }
        let index = self.graph.add_node(cohort_id);
        self.indices.insert(cohort_id, index);
        index
    }

    fn index(&self, cohort_id: CohortId) -> Option<NodeIndex> {
        self.indices.get(&cohort_id).copied()
    }

    /// Post-order from each node in discovery order: a node is emitted only after
    /// everything it points at has been emitted. Back edges of a cycle are skipped by
    /// the traversal's discovered set.
    fn dependencies_first(&self) -> Vec<CohortId> {
        let mut order = Vec::with_capacity(self.graph.node_count());
        let mut dfs = DfsPostOrder::empty(&self.graph);
        for root in self.graph.node_indices() {
            dfs.move_to(root);
            while let Some(index) = dfs.next(&self.graph) {
                order.push(self.graph[index]);
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohorts::cohort_store::InMemoryCohortStore;
    use crate::utils::test_utils::{cohort_with_filters, cohort_with_person_filter};
    use serde_json::json;

    const PROJECT_ID: ProjectId = 1;

    fn referencing(id: CohortId, deps: &[CohortId]) -> Cohort {
        let values: Vec<_> = deps
            .iter()
            .map(|d| json!({"key": "id", "value": d, "type": "cohort"}))
            .collect();
        cohort_with_filters(
            id,
            json!({"properties": {"type": "AND", "values": [{"type": "AND", "values": values}]}}),
        )
    }

    fn resolver(store: InMemoryCohortStore) -> (CohortGraphResolver, Arc<InMemoryCohortStore>) {
        let store = Arc::new(store);
        (
            CohortGraphResolver::new(store.clone(), Duration::from_millis(100)),
            store,
        )
    }

    fn position(order: &[CohortId], id: CohortId) -> usize {
        order.iter().position(|c| *c == id).unwrap()
    }

    #[tokio::test]
    async fn test_resolve_transitive_closure() {
        let store = InMemoryCohortStore::new(
            PROJECT_ID,
            vec![
                referencing(1, &[2, 3]),
                referencing(2, &[4]),
                cohort_with_person_filter(3, "plan", "pro"),
                cohort_with_person_filter(4, "country", "US"),
                cohort_with_person_filter(5, "unrelated", "x"),
            ],
        );
        let (resolver, _) = resolver(store);
        let mut cache = ResolvedCohortCache::new();

        let resolved = resolver.resolve(PROJECT_ID, [1], &mut cache).await;
        assert_eq!(resolved, HashSet::from([1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_resolve_ordered_puts_dependencies_first() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4
        let store = InMemoryCohortStore::new(
            PROJECT_ID,
            vec![
                referencing(1, &[2, 3]),
                referencing(2, &[4]),
                referencing(3, &[4]),
                cohort_with_person_filter(4, "plan", "pro"),
            ],
        );
        let (resolver, _) = resolver(store);
        let mut cache = ResolvedCohortCache::new();

        let order = resolver.resolve_ordered(PROJECT_ID, [1], &mut cache).await;
        assert_eq!(order.len(), 4);
        assert!(position(&order, 4) < position(&order, 2));
        assert!(position(&order, 4) < position(&order, 3));
        assert!(position(&order, 2) < position(&order, 1));
        assert!(position(&order, 3) < position(&order, 1));
    }

    #[tokio::test]
    async fn test_cycle_resolves_each_cohort_once() {
        let cohorts = vec![referencing(1, &[2]), referencing(2, &[1])];
        let (resolver, store) = resolver(InMemoryCohortStore::new(PROJECT_ID, cohorts));
        let mut cache = ResolvedCohortCache::new();

        let resolved = resolver.resolve(PROJECT_ID, [1], &mut cache).await;
        assert_eq!(resolved, HashSet::from([1, 2]));

        let mut order = resolver.resolve_ordered(PROJECT_ID, [1], &mut cache).await;
        order.sort_unstable();
        assert_eq!(order, vec![1, 2]);

        // Second pass is served from the cache.
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn test_dangling_reference_is_skipped_and_tombstoned() {
        let store = InMemoryCohortStore::new(PROJECT_ID, vec![referencing(1, &[99])]);
        let (resolver, store) = resolver(store);
        let mut cache = ResolvedCohortCache::new();

        let resolved = resolver.resolve(PROJECT_ID, [1, 42], &mut cache).await;
        assert_eq!(resolved, HashSet::from([1]));
        assert!(cache.is_missing(99));
        assert!(cache.is_missing(42));

        resolver.resolve(PROJECT_ID, [99], &mut cache).await;
        assert_eq!(store.lookups(), 3);
    }

    #[tokio::test]
    async fn test_store_error_is_tombstoned() {
        let store = InMemoryCohortStore::new(
            PROJECT_ID,
            vec![referencing(1, &[2]), cohort_with_person_filter(2, "plan", "pro")],
        )
        .with_failure(2);
        let (resolver, _) = resolver(store);
        let mut cache = ResolvedCohortCache::new();

        let resolved = resolver.resolve(PROJECT_ID, [1], &mut cache).await;
        assert_eq!(resolved, HashSet::from([1]));
        assert!(cache.is_missing(2));
    }

    #[tokio::test]
    async fn test_timeout_is_tombstoned() {
        let cohorts = vec![cohort_with_person_filter(1, "plan", "pro")];
        let store = InMemoryCohortStore::new(PROJECT_ID, cohorts);
        let store = Arc::new(store.with_delay(Duration::from_millis(500)));
        let resolver = CohortGraphResolver::new(store, Duration::from_millis(10));
        let mut cache = ResolvedCohortCache::new();

        assert!(resolver.fetch(PROJECT_ID, 1, &mut cache).await.is_none());
        assert!(cache.is_missing(1));
    }

    #[tokio::test]
    async fn test_other_project_is_not_found() {
        let cohorts = vec![cohort_with_person_filter(1, "plan", "pro")];
        let (resolver, _) = resolver(InMemoryCohortStore::new(PROJECT_ID, cohorts));
        let mut cache = ResolvedCohortCache::new();

        let resolved = resolver.resolve(PROJECT_ID + 1, [1], &mut cache).await;
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_cohort_is_kept_as_leaf() {
        let store = InMemoryCohortStore::new(
            PROJECT_ID,
            vec![
                referencing(1, &[2]),
                cohort_with_filters(2, json!({"properties": {"type": "NAND", "values": []}})),
            ],
        );
        let (resolver, _) = resolver(store);
        let mut cache = ResolvedCohortCache::new();

        let order = resolver.resolve_ordered(PROJECT_ID, [1], &mut cache).await;
        assert_eq!(order, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_self_reference() {
        let store = InMemoryCohortStore::new(PROJECT_ID, vec![referencing(1, &[1])]);
        let (resolver, _) = resolver(store);
        let mut cache = ResolvedCohortCache::new();

        assert_eq!(
            resolver.resolve_ordered(PROJECT_ID, [1], &mut cache).await,
            vec![1]
        );
    }
}
