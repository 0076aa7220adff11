//! Integration tests for the Nattevakt generation pipeline

mod test_utils;

mod circuit_breaker;
mod config_integration;
mod feed_fallback;
mod integrity_repair;
mod lock_exclusion;
mod parser_properties;
mod pipeline_scenarios;
mod shared_workspace;
