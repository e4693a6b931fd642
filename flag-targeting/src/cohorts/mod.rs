pub mod cohort_models;
pub mod cohort_operations;
pub mod cohort_resolver;
pub mod cohort_store;
