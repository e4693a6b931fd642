pub mod property_group;
pub mod property_models;
