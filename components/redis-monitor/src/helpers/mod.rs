pub mod load_config;
pub mod targets;
