pub mod cohorts;
pub mod config;
pub mod errors;
pub mod flags;
pub mod metrics;
pub mod properties;
pub mod utils;

pub type TeamId = i32;
pub type ProjectId = i64;
