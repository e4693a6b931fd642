use serde::{Deserialize, Serialize};

use crate::properties::property_models::PropertyFilter;
use crate::TeamId;

// TRICKY: this key and payload are shared with django's cache. The "posthog:1:" part is
// django's key prefix and version; changing either side breaks the other.
pub const TEAM_FLAGS_CACHE_PREFIX: &str = "posthog:1:team_feature_flags_";

/// One targeting condition: all properties must match, then the rollout applies.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct FlagPropertyGroup {
    #[serde(default)]
    pub properties: Option<Vec<PropertyFilter>>,
    #[serde(default)]
    pub rollout_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MultivariateFlagVariant {
    pub key: String,
    pub name: Option<String>,
    pub rollout_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MultivariateFlagOptions {
    pub variants: Vec<MultivariateFlagVariant>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct FlagFilters {
    #[serde(default)]
    pub groups: Vec<FlagPropertyGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multivariate: Option<MultivariateFlagOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_group_type_index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payloads: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_groups: Option<Vec<FlagPropertyGroup>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holdout_groups: Option<Vec<FlagPropertyGroup>>,
    /// Keys this crate doesn't read, cached as stored.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The minimal flag record, as cached for the evaluation path.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeatureFlag {
    pub id: i32,
    pub team_id: TeamId,
    pub name: Option<String>,
    pub key: String,
    pub filters: FlagFilters,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub ensure_experience_continuity: bool,
    #[serde(default)]
    pub has_encrypted_payloads: bool,
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub evaluation_runtime: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct FeatureFlagRow {
    pub id: i32,
    pub team_id: TeamId,
    pub name: Option<String>,
    pub key: String,
    pub filters: serde_json::Value,
    pub rollout_percentage: Option<i32>,
    pub deleted: bool,
    pub active: bool,
    pub ensure_experience_continuity: Option<bool>,
    pub has_encrypted_payloads: Option<bool>,
    pub version: Option<i32>,
    pub evaluation_runtime: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FeatureFlagList {
    pub flags: Vec<FeatureFlag>,
}
