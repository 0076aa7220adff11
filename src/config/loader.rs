//! Layered configuration loading.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::NattevaktConfig;
use crate::error::PipelineError;
use config::File;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace: defaults, then the global file,
    /// then `<workspace>/nattevakt.toml`, then `NATTEVAKT__*` environment
    /// variables. The result is validated.
    pub fn load(workspace_root: &Path) -> Result<NattevaktConfig, PipelineError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let config: NattevaktConfig = builder
            .add_source(merge_policy::environment_source())
            .build()?
            .try_deserialize()?;
        Self::validated(config)
    }

    /// Load from one explicit file (plus environment overrides), skipping the
    /// global and workspace files.
    pub fn load_from_file(path: &Path) -> Result<NattevaktConfig, PipelineError> {
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let config: NattevaktConfig = merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .add_source(merge_policy::environment_source())
            .build()?
            .try_deserialize()?;
        Self::validated(config)
    }

    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
        workspace_file::workspace_config_path(workspace_root)
    }

    /// Render a configuration as TOML, the format the loader reads.
    pub fn render(config: &NattevaktConfig) -> Result<String, PipelineError> {
        toml::to_string_pretty(config)
            .map_err(|e| PipelineError::Config(format!("Failed to render configuration: {}", e)))
    }

    fn validated(config: NattevaktConfig) -> Result<NattevaktConfig, PipelineError> {
        config.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PipelineError::Config(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes access to XDG_CONFIG_HOME and NATTEVAKT__* variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn with_xdg<R>(dir: &Path, f: impl FnOnce() -> R) -> R {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let original = std::env::var("XDG_CONFIG_HOME").ok();
        std::env::set_var("XDG_CONFIG_HOME", dir);
        let out = f();
        match original {
            Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    #[test]
    fn test_load_defaults_without_files() {
        let temp = TempDir::new().unwrap();
        let config = with_xdg(&temp.path().join("xdg"), || {
            ConfigLoader::load(temp.path()).unwrap()
        });
        assert_eq!(config.storage.output_file, "nattavis.json");
        assert_eq!(config.generation.max_tokens, 500);
    }

    #[test]
    fn test_workspace_file_overrides_global() {
        let temp = TempDir::new().unwrap();
        let xdg = temp.path().join("xdg");
        std::fs::create_dir_all(xdg.join("nattevakt")).unwrap();
        std::fs::write(
            xdg.join("nattevakt").join("config.toml"),
            "[generation]\ntemperature = 1.1\ncalls_per_hour = 10\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("nattevakt.toml"),
            "[generation]\ncalls_per_hour = 5\n",
        )
        .unwrap();

        let config = with_xdg(&xdg, || ConfigLoader::load(temp.path()).unwrap());
        assert_eq!(config.generation.calls_per_hour, 5);
        assert!((config.generation.temperature - 1.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_environment_overrides_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("nattevakt.toml"),
            "[breaker]\nfailure_threshold = 4\n",
        )
        .unwrap();
        let config = with_xdg(&temp.path().join("xdg"), || {
            std::env::set_var("NATTEVAKT__BREAKER__FAILURE_THRESHOLD", "7");
            let loaded = ConfigLoader::load(temp.path());
            std::env::remove_var("NATTEVAKT__BREAKER__FAILURE_THRESHOLD");
            loaded.unwrap()
        });
        assert_eq!(config.breaker.failure_threshold, 7);
    }

    #[test]
    fn test_invalid_values_rejected_at_load() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("custom.toml");
        std::fs::write(&file, "[generation]\nmax_tokens = 5000\n").unwrap();
        let err = {
            let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            ConfigLoader::load_from_file(&file).unwrap_err()
        };
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = ConfigLoader::load_from_file(&temp.path().join("absent.toml"));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_render_round_trips_through_loader() {
        let temp = TempDir::new().unwrap();
        let mut config = NattevaktConfig::default();
        config.generation.calls_per_hour = 12;
        let file = temp.path().join("rendered.toml");
        std::fs::write(&file, ConfigLoader::render(&config).unwrap()).unwrap();
        let loaded = {
            let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            ConfigLoader::load_from_file(&file).unwrap()
        };
        assert_eq!(loaded.generation.calls_per_hour, 12);
    }
}
