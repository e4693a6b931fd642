use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::properties::property_models::PropertyGroup;

pub type CohortId = i32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Cohort {
    pub id: CohortId,
    pub name: Option<String>,
    pub team_id: i32,
    pub deleted: bool,
    pub is_static: bool,
    pub filters: Option<serde_json::Value>,
}

/// The `filters` column of a cohort. Only the property tree is read; the
/// deprecated `groups` shape is ignored and reads as an empty tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CohortFilters {
    #[serde(default)]
    pub properties: Option<PropertyGroup>,
}
