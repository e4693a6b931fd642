use serde::{Deserialize, Serialize};

use crate::cohorts::cohort_models::CohortId;
use crate::errors::FlagError;

/// Filter operator. Operators this crate doesn't know are kept verbatim in `Unknown`,
/// so a flag using one still round-trips through the cache unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    Exact,
    IsNot,
    Icontains,
    NotIcontains,
    Regex,
    NotRegex,
    Gt,
    Lt,
    Gte,
    Lte,
    IsSet,
    IsNotSet,
    IsDateExact,
    IsDateAfter,
    IsDateBefore,
    In,
    NotIn,
    FlagEvaluatesTo,
    #[serde(untagged)]
    Unknown(String),
}

/// Where a filter reads its data from. Unlisted types land in `Unknown` with their
/// original name, so they are never mistaken for a person property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum PropertyType {
    #[serde(rename = "person")]
    Person,
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "cohort")]
    Cohort,
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "element")]
    Element,
    #[serde(rename = "static-cohort")]
    StaticCohort,
    #[serde(rename = "precalculated-cohort")]
    PrecalculatedCohort,
    #[serde(rename = "behavioral")]
    Behavioral,
    #[serde(rename = "session")]
    Session,
    #[serde(rename = "hogql")]
    HogQL,
    #[serde(rename = "data_warehouse")]
    DataWarehouse,
    #[serde(rename = "data_warehouse_person_property")]
    DataWarehousePersonProperty,
    #[serde(rename = "error_tracking_issue")]
    ErrorTrackingIssue,
    #[serde(rename = "log_entry")]
    LogEntry,
    #[serde(rename = "recording")]
    Recording,
    #[serde(rename = "flag")]
    Flag,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PropertyFilter {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorType>,
    #[serde(rename = "type")]
    pub prop_type: PropertyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_type_index: Option<i32>,
}

impl PropertyFilter {
    pub fn is_cohort(&self) -> bool {
        self.prop_type == PropertyType::Cohort
    }

    pub fn is_person(&self) -> bool {
        self.prop_type == PropertyType::Person
    }

    pub fn is_negated(&self) -> bool {
        self.negation.unwrap_or(false)
    }

    /// Returns the referenced cohort id of a cohort filter, `None` for any other filter.
    ///
    /// The id may be stored as a JSON number or as a decimal string; anything else
    /// is a malformed payload and fails fast.
    pub fn get_cohort_id(&self) -> Result<Option<CohortId>, FlagError> {
        if !self.is_cohort() {
            return Ok(None);
        }
        let parsed = match &self.value {
            Some(serde_json::Value::Number(n)) => {
                n.as_i64().and_then(|id| CohortId::try_from(id).ok())
            }
            Some(serde_json::Value::String(s)) => s.trim().parse::<CohortId>().ok(),
            _ => None,
        };
        match parsed {
            Some(id) => Ok(Some(id)),
            None => Err(FlagError::InvalidCohortReference(format!(
                "cohort filter value {:?} is not a cohort id",
                self.value
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyOperatorType {
    And,
    Or,
}

/// A recursive AND/OR tree of property filters, as stored in cohort definitions.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PropertyGroup {
    #[serde(rename = "type")]
    pub operator: PropertyOperatorType,
    #[serde(default)]
    pub values: Vec<PropertyNode>,
}

/// A node in a property tree: either a nested group or a leaf filter.
///
/// Groups are tried first; they are the only shape whose `type` is `AND`/`OR`.
/// A value that is neither shape fails to parse.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PropertyNode {
    Group(PropertyGroup),
    Filter(PropertyFilter),
}

impl PropertyNode {
    pub fn as_filter(&self) -> Option<&PropertyFilter> {
        match self {
            PropertyNode::Filter(filter) => Some(filter),
            PropertyNode::Group(_) => None,
        }
    }
}
