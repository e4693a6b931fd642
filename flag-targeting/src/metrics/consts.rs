// Cohort resolution
pub const COHORT_LOOKUP_COUNTER: &str = "flags_cohort_lookup_total";
pub const COHORT_LOOKUP_ERRORS_COUNTER: &str = "flags_cohort_lookup_errors_total";
pub const COHORT_FILTERS_PARSE_ERRORS_COUNTER: &str = "flags_cohort_filters_parse_errors_total";

// Cohort expansion into person property conditions
pub const COHORT_EXPANSION_COUNTER: &str = "flags_cohort_expansion_total";

// Team flags cache
pub const FLAG_CACHE_READS_COUNTER: &str = "flags_flag_cache_reads_total";
pub const FLAG_CACHE_WRITES_COUNTER: &str = "flags_flag_cache_writes_total";
pub const DB_FLAG_READS_COUNTER: &str = "flags_db_flag_reads_total";
pub const TOMBSTONE_COUNTER: &str = "flags_tombstone_total";
