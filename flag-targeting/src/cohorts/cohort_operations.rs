use std::collections::HashSet;

use crate::cohorts::cohort_models::{Cohort, CohortFilters, CohortId};
use crate::errors::FlagError;
use crate::properties::property_models::PropertyGroup;

impl Cohort {
    /// Parses `filters.properties` into a property tree.
    ///
    /// Missing or null filters give an empty tree. A tree that does not parse (wrong
    /// shape, a group operator other than AND/OR) is a `CohortFiltersParsingError`.
    pub fn properties(&self) -> Result<PropertyGroup, FlagError> {
        let filters = match &self.filters {
            Some(filters) if !filters.is_null() => filters,
            _ => return Ok(PropertyGroup::empty()),
        };

        let parsed: CohortFilters = serde_json::from_value(filters.clone()).map_err(|e| {
            tracing::error!("Failed to parse filters for cohort {}: {}", self.id, e);
            FlagError::CohortFiltersParsingError
        })?;

        Ok(parsed.properties.unwrap_or_default())
    }

    /// Extracts the ids of every cohort this cohort references, at any depth.
    ///
    /// Self references are dropped.
    pub fn extract_dependencies(&self) -> Result<HashSet<CohortId>, FlagError> {
        let mut dependencies = self.properties()?.cohort_ids().map_err(|e| {
            tracing::error!(
                cohort_id = self.id,
                error = %e,
                "Cohort references a malformed cohort id"
            );
            FlagError::CohortFiltersParsingError
        })?;
        dependencies.remove(&self.id);
        Ok(dependencies)
    }
}
