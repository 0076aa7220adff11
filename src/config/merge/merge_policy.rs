//! Merge rules: defaults, override order, conflict handling.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};

/// Create a Config builder with storage defaults applied. Everything else
/// falls back to the serde defaults on the config structs.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("storage.data_dir", "data")?
        .set_default("storage.state_dir", ".nattevakt")?
        .set_default("storage.output_file", "nattavis.json")
}

/// Environment overrides win over every file: `NATTEVAKT__GENERATION__TEMPERATURE=0.9`.
pub fn environment_source() -> Environment {
    Environment::with_prefix("NATTEVAKT")
        .separator("__")
        .try_parsing(true)
}
