pub mod cohort_expansion;
pub mod feature_flag_list;
pub mod flag_models;
pub mod flag_operations;
pub mod flags_cache;
