// Kept public so the integration tests under tests/ can share the fixtures.
pub mod test_utils;
