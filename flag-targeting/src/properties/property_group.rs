use std::collections::HashSet;

use crate::cohorts::cohort_models::CohortId;
use crate::errors::FlagError;
use crate::properties::property_models::{
    PropertyFilter, PropertyGroup, PropertyNode, PropertyOperatorType,
};

impl Default for PropertyGroup {
    fn default() -> Self {
        Self::empty()
    }
}

impl PropertyGroup {
    pub fn empty() -> Self {
        Self {
            operator: PropertyOperatorType::And,
            values: Vec::new(),
        }
    }

    pub fn new(operator: PropertyOperatorType, values: Vec<PropertyNode>) -> Self {
        Self { operator, values }
    }

    /// True when the tree holds no leaf filters at any depth.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|node| match node {
            PropertyNode::Filter(_) => false,
            PropertyNode::Group(group) => group.is_empty(),
        })
    }

    /// All leaf filters, depth first, in declaration order.
    pub fn flat(&self) -> Vec<&PropertyFilter> {
        let mut leaves = Vec::new();
        let mut stack: Vec<&PropertyNode> = self.values.iter().rev().collect();
        while let Some(node) = stack.pop() {
            match node {
                PropertyNode::Filter(filter) => leaves.push(filter),
                PropertyNode::Group(group) => stack.extend(group.values.iter().rev()),
            }
        }
        leaves
    }

    /// Every cohort id referenced anywhere in the tree.
    pub fn cohort_ids(&self) -> Result<HashSet<CohortId>, FlagError> {
        let mut ids = HashSet::new();
        for filter in self.flat() {
            if let Some(id) = filter.get_cohort_id()? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Drops redundant single-child wrappers.
    ///
    /// A group with one child collapses into that (simplified) child. Children of a
    /// multi-child group are simplified too, but keep their own wrapper, so
    /// `OR(AND(a), AND(b, c))` stays an OR of groups. Example:
    ///
    /// ```text
    /// AND(OR(AND(a, b)))        -> AND(a, b)
    /// OR(AND(a), AND(OR(b, c))) -> OR(AND(a), AND(OR(b, c)))
    /// OR(AND(AND(a)), b)        -> OR(AND(a), b)
    /// ```
    pub fn clear_excess_levels(self) -> PropertyNode {
        PropertyNode::Group(self).clear_excess_levels()
    }
}

impl PropertyNode {
    pub fn clear_excess_levels(self) -> PropertyNode {
        self.simplify(false)
    }

    fn simplify(self, keep_wrapper: bool) -> PropertyNode {
        let mut group = match self {
            PropertyNode::Group(group) => group,
            leaf @ PropertyNode::Filter(_) => return leaf,
        };

        if group.values.len() == 1 {
            let child = group.values.remove(0).simplify(false);
            if !keep_wrapper {
                return child;
            }
            group.values.push(child);
        } else {
            group.values = group
                .values
                .into_iter()
                .map(|child| child.simplify(true))
                .collect();
        }
        PropertyNode::Group(group)
    }
}
