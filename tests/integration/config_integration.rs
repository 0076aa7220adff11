//! Integration tests for the configuration system

use nattevakt::api::{Health, NattevaktApi};
use nattevakt::config::{ConfigLoader, LockBackendKind};
use nattevakt::error::PipelineError;
use tempfile::TempDir;

use crate::integration::test_utils::with_env;

fn isolated_env<'a>(xdg: &'a str, key: Option<&'a str>) -> Vec<(&'a str, Option<&'a str>)> {
    vec![
        ("XDG_CONFIG_HOME", Some(xdg)),
        ("NATTEVAKT_API_KEY", key),
        ("OPENAI_API_KEY", None),
    ]
}

#[test]
fn workspace_file_drives_the_facade() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("nattevakt.toml"),
        r#"
[storage]
data_dir = "lore"
state_dir = "state"

[generation]
prompt = "Skriv tre korte nattnyheter"
calls_per_hour = 12

[coordination]
lock_backend = "shared"
"#,
    )
    .unwrap();
    let xdg = temp.path().join("xdg").to_string_lossy().to_string();

    let status = with_env(&isolated_env(&xdg, Some("sk-test")), || {
        let config = ConfigLoader::load(temp.path()).unwrap();
        assert_eq!(config.coordination.lock_backend, LockBackendKind::Shared);
        let api = NattevaktApi::from_config(config, temp.path()).unwrap();
        assert_eq!(api.paths().data_dir, temp.path().join("lore"));
        api.status()
    });

    assert!(temp.path().join("lore").is_dir());
    assert!(temp.path().join("state").join("cache").is_dir());
    assert!(status.config.api_key_set);
    assert!(status.config.prompt_set);
    assert_eq!(status.config.calls_per_hour, 12);
    assert_eq!(status.config.lock_backend, LockBackendKind::Shared);
    assert_eq!(status.health, Health::Healthy);
}

#[test]
fn missing_key_is_not_a_construction_error() {
    let temp = TempDir::new().unwrap();
    let xdg = temp.path().join("xdg").to_string_lossy().to_string();

    let status = with_env(&isolated_env(&xdg, None), || {
        let config = ConfigLoader::load(temp.path()).unwrap();
        let api = NattevaktApi::from_config(config, temp.path()).unwrap();
        api.status()
    });
    assert!(!status.config.api_key_set);
    assert_eq!(status.health, Health::Unhealthy);
}

#[test]
fn out_of_range_values_fail_to_load() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("bad.toml");
    std::fs::write(&file, "[generation]\ntemperature = 3.5\n").unwrap();
    let xdg = temp.path().join("xdg").to_string_lossy().to_string();

    let err = with_env(&isolated_env(&xdg, None), || {
        ConfigLoader::load_from_file(&file).unwrap_err()
    });
    assert!(matches!(err, PipelineError::Config(_)));
    assert_eq!(err.code(), "config");
    assert!(err.to_string().contains("temperature"));
}

#[test]
fn overlong_prompt_fails_to_load() {
    let temp = TempDir::new().unwrap();
    let prompt = "ø".repeat(2001);
    std::fs::write(
        temp.path().join("nattevakt.toml"),
        format!("[generation]\nprompt = \"{}\"\n", prompt),
    )
    .unwrap();
    let xdg = temp.path().join("xdg").to_string_lossy().to_string();

    let result = with_env(&isolated_env(&xdg, None), || ConfigLoader::load(temp.path()));
    assert!(result.is_err());
}
