//! Rewrites flag conditions that target a cohort into plain person property conditions,
//! so the evaluation path can match them without a cohort membership lookup.
//!
//! The rewrite only happens when the result is guaranteed to match exactly the same
//! users. Whenever that can't be guaranteed the original conditions are returned as-is.

use metrics::counter;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::cohorts::cohort_models::{Cohort, CohortId};
use crate::cohorts::cohort_resolver::{CohortGraphResolver, ResolvedCohortCache};
use crate::errors::FlagError;
use crate::flags::flag_models::{FeatureFlag, FlagPropertyGroup};
use crate::metrics::consts::COHORT_EXPANSION_COUNTER;
use crate::properties::property_models::{
    OperatorType, PropertyFilter, PropertyGroup, PropertyNode, PropertyOperatorType,
};
use crate::ProjectId;

/// Why a flag's conditions were left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unexpandable {
    VariantOverride,
    MultipleCohorts,
    MissingCohort,
    MixedCondition,
    NegatedCohortFilter,
    UnsupportedOperator,
    StaticCohort,
    UnparseableCohort,
    EmptyCohort,
    NonPersonProperty,
    NegatedProperty,
    UnsupportedShape,
}

impl Unexpandable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unexpandable::VariantOverride => "variant_override",
            Unexpandable::MultipleCohorts => "multiple_cohorts",
            Unexpandable::MissingCohort => "missing_cohort",
            Unexpandable::MixedCondition => "mixed_condition",
            Unexpandable::NegatedCohortFilter => "negated_cohort_filter",
            Unexpandable::UnsupportedOperator => "unsupported_operator",
            Unexpandable::StaticCohort => "static_cohort",
            Unexpandable::UnparseableCohort => "unparseable_cohort",
            Unexpandable::EmptyCohort => "empty_cohort",
            Unexpandable::NonPersonProperty => "non_person_property",
            Unexpandable::NegatedProperty => "negated_property",
            Unexpandable::UnsupportedShape => "unsupported_shape",
        }
    }
}

pub struct CohortConditionNormalizer {
    resolver: Arc<CohortGraphResolver>,
}

impl CohortConditionNormalizer {
    pub fn new(resolver: Arc<CohortGraphResolver>) -> Self {
        Self { resolver }
    }

    /// Returns the flag's conditions with its single cohort reference expanded into
    /// person property conditions, or the original conditions when that's not safe.
    ///
    /// Only fails on a malformed cohort id inside the flag's own conditions.
    #[instrument(skip_all, fields(project_id = project_id, flag_key = %flag.key))]
    pub async fn normalize(
        &self,
        project_id: ProjectId,
        flag: &FeatureFlag,
        cache: &mut ResolvedCohortCache,
    ) -> Result<Vec<FlagPropertyGroup>, FlagError> {
        let conditions = flag.get_conditions();
        if !flag.uses_cohorts() {
            counter!(COHORT_EXPANSION_COUNTER, "outcome" => "no_cohorts").increment(1);
            return Ok(conditions.clone());
        }
        let direct = flag.direct_cohort_ids()?;

        match self.expand(project_id, conditions, &direct, cache).await {
            Ok(expanded) => {
                counter!(COHORT_EXPANSION_COUNTER, "outcome" => "expanded").increment(1);
                Ok(expanded)
            }
            Err(reason) => {
                debug!(
                    flag_id = flag.id,
                    reason = reason.as_str(),
                    "Keeping cohort conditions unexpanded"
                );
                counter!(COHORT_EXPANSION_COUNTER, "outcome" => reason.as_str()).increment(1);
                Ok(conditions.clone())
            }
        }
    }

    /// Normalizes a batch of flags sharing one cache. A flag with a malformed cohort
    /// reference keeps its original conditions and doesn't affect the others.
    pub async fn normalize_flags(
        &self,
        project_id: ProjectId,
        flags: &[FeatureFlag],
        cache: &mut ResolvedCohortCache,
    ) -> Vec<Vec<FlagPropertyGroup>> {
        let mut normalized = Vec::with_capacity(flags.len());
        for flag in flags {
            match self.normalize(project_id, flag, cache).await {
                Ok(conditions) => normalized.push(conditions),
                Err(e) => {
                    warn!(
                        flag_id = flag.id,
                        flag_key = %flag.key,
                        error = %e,
                        "Invalid cohort reference in flag conditions, keeping them as-is"
                    );
                    counter!(COHORT_EXPANSION_COUNTER, "outcome" => e.error_code()).increment(1);
                    normalized.push(flag.get_conditions().clone());
                }
            }
        }
        normalized
    }

    async fn expand(
        &self,
        project_id: ProjectId,
        conditions: &[FlagPropertyGroup],
        direct: &[CohortId],
        cache: &mut ResolvedCohortCache,
    ) -> Result<Vec<FlagPropertyGroup>, Unexpandable> {
        if conditions.iter().any(|c| c.variant.is_some()) {
            return Err(Unexpandable::VariantOverride);
        }

        let [cohort_id] = direct else {
            return Err(Unexpandable::MultipleCohorts);
        };
        let reachable = self
            .resolver
            .resolve(project_id, [*cohort_id], cache)
            .await;
        if reachable.is_empty() {
            return Err(Unexpandable::MissingCohort);
        }
        if reachable.len() > 1 {
            return Err(Unexpandable::MultipleCohorts);
        }

        let cohort = self
            .resolver
            .fetch(project_id, *cohort_id, cache)
            .await
            .ok_or(Unexpandable::MissingCohort)?;

        rewrite_conditions(conditions, &cohort)
    }
}

/// Replaces every condition that targets `cohort` with the equivalent person property
/// conditions, in place, each keeping the rollout of the condition it replaces.
pub fn rewrite_conditions(
    conditions: &[FlagPropertyGroup],
    cohort: &Cohort,
) -> Result<Vec<FlagPropertyGroup>, Unexpandable> {
    if conditions.iter().any(|c| c.variant.is_some()) {
        return Err(Unexpandable::VariantOverride);
    }

    let mut expansion: Option<Vec<Vec<PropertyFilter>>> = None;
    let mut rewritten = Vec::with_capacity(conditions.len());

    for condition in conditions {
        let properties = condition.properties.as_deref().unwrap_or_default();
        if !properties.iter().any(|p| p.is_cohort()) {
            rewritten.push(condition.clone());
            continue;
        }

        let [cohort_filter] = properties else {
            return Err(Unexpandable::MixedCondition);
        };
        if cohort_filter.is_negated() || cohort_filter.operator == Some(OperatorType::NotIn) {
            return Err(Unexpandable::NegatedCohortFilter);
        }
        if let Some(OperatorType::Unknown(_)) = cohort_filter.operator {
            return Err(Unexpandable::UnsupportedOperator);
        }
        match cohort_filter.get_cohort_id() {
            Ok(Some(id)) if id == cohort.id => {}
            _ => return Err(Unexpandable::MultipleCohorts),
        }

        if expansion.is_none() {
            expansion = Some(expand_cohort(cohort)?);
        }
        for group in expansion.iter().flatten() {
            rewritten.push(FlagPropertyGroup {
                properties: Some(group.clone()),
                rollout_percentage: condition.rollout_percentage,
                variant: None,
            });
        }
    }

    Ok(rewritten)
}

/// The cohort's definition as an OR of AND groups of person filters.
pub fn expand_cohort(cohort: &Cohort) -> Result<Vec<Vec<PropertyFilter>>, Unexpandable> {
    if cohort.is_static {
        return Err(Unexpandable::StaticCohort);
    }
    let tree = cohort
        .properties()
        .map_err(|_| Unexpandable::UnparseableCohort)?;
    if tree.is_empty() {
        return Err(Unexpandable::EmptyCohort);
    }

    let leaves = tree.flat();
    if leaves.iter().any(|p| !p.is_person()) {
        return Err(Unexpandable::NonPersonProperty);
    }
    if leaves.iter().any(|p| p.is_negated()) {
        return Err(Unexpandable::NegatedProperty);
    }

    expand_tree(tree)
}

fn expand_tree(tree: PropertyGroup) -> Result<Vec<Vec<PropertyFilter>>, Unexpandable> {
    let group = match tree.clear_excess_levels() {
        PropertyNode::Filter(filter) => return Ok(vec![vec![filter]]),
        PropertyNode::Group(group) => group,
    };

    if let Some(leaves) = all_leaves(&group) {
        return match group.operator {
            PropertyOperatorType::And => Ok(vec![leaves]),
            PropertyOperatorType::Or => Ok(leaves.into_iter().map(|leaf| vec![leaf]).collect()),
        };
    }

    // OR of groups, each of which must be a flat AND (or a one-leaf OR).
    if group.operator != PropertyOperatorType::Or {
        return Err(Unexpandable::UnsupportedShape);
    }
    group
        .values
        .iter()
        .map(|node| match node {
            PropertyNode::Group(inner)
                if inner.operator == PropertyOperatorType::And || inner.values.len() == 1 =>
            {
                all_leaves(inner).ok_or(Unexpandable::UnsupportedShape)
            }
            _ => Err(Unexpandable::UnsupportedShape),
        })
        .collect()
}

/// The group's children when it's non-empty and every child is a leaf.
fn all_leaves(group: &PropertyGroup) -> Option<Vec<PropertyFilter>> {
    if group.values.is_empty() {
        return None;
    }
    group
        .values
        .iter()
        .map(|node| node.as_filter().cloned())
        .collect()
}
