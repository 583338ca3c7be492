//! Integration tests for configuration loading, merging and editing.

mod common;

use cutout::PipelineError;

use common::*;

#[test]
fn test_defaults() {
    let config = Config::default();

    assert_eq!(config.processing.model, "flood");
    assert_eq!(config.processing.device, "auto");
    assert_eq!(config.processing.batch_size, 1);
    assert_eq!(config.processing.file_stability_timeout, 2.0);
    assert!(config.processing.preserve_original);
    assert!(!config.processing.overwrite_existing);
    assert!(config.monitoring.enabled);
    assert_eq!(config.monitoring.debounce_seconds, 1.0);
    assert_eq!(config.quality_of("flood"), "high");
    assert_eq!(config.quality_of("rembg"), "default");
}

#[test]
fn test_partial_file_merges_over_defaults() -> anyhow::Result<()> {
    let text = r#"
        [processing]
        batch_size = 4

        [models.rembg]
        model_name = "u2netp"
    "#;
    let config = Config::from_toml_str(text)?;

    // 1. Given keys override
    assert_eq!(config.processing.batch_size, 4);
    assert_eq!(
        config.backend("rembg").and_then(|b| b.model_name.as_deref()),
        Some("u2netp")
    );

    // 2. Siblings keep their defaults
    assert_eq!(config.processing.model, "flood");
    let rembg = config.backend("rembg").ok_or_else(|| anyhow::anyhow!("rembg missing"))?;
    assert!(rembg.enabled);
    assert_eq!(config.quality_of("flood"), "high");

    Ok(())
}

#[test]
fn test_invalid_file_is_an_error() {
    assert!(Config::from_toml_str("[processing\nbatch_size = 4").is_err());
    assert!(Config::from_toml_str("[processing]\nbatch_size = \"many\"").is_err());
}

#[test]
fn test_load_writes_defaults_when_missing() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("nested").join("cutout.toml");

    let (config, loaded_from) = Config::load(Some(&path))?;
    assert_eq!(config, Config::default());
    assert_eq!(loaded_from, path);
    assert!(path.exists());

    // Round trip through the written file
    let (reloaded, _) = Config::load(Some(&path))?;
    assert_eq!(reloaded, config);

    Ok(())
}

#[test]
fn test_set_dotted_keys() -> anyhow::Result<()> {
    let mut config = Config::default();

    config.set("processing.batch_size", "8")?;
    config.set("processing.overwrite_existing", "true")?;
    config.set("monitoring.debounce_seconds", "0.5")?;
    config.set("models.flood.quality", "low")?;
    config.set("models.rembg.options.model_path", "/models/u2net.rten")?;

    assert_eq!(config.processing.batch_size, 8);
    assert!(config.processing.overwrite_existing);
    assert_eq!(config.monitoring.debounce_seconds, 0.5);
    assert_eq!(config.quality_of("flood"), "low");

    let options = config.backend_options("rembg")?;
    assert_eq!(options.option_str("model_path"), Some("/models/u2net.rten"));

    // Wrong type is rejected and leaves the config unchanged
    assert!(config.set("processing.batch_size", "lots").is_err());
    assert_eq!(config.processing.batch_size, 8);
    assert!(config.set("processing..batch_size", "1").is_err());

    Ok(())
}

#[test]
fn test_set_then_save_persists() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("cutout.toml");

    let mut config = Config::default();
    config.set("processing.model", "rembg")?;
    config.save(&path)?;

    let (loaded, _) = Config::load(Some(&path))?;
    assert_eq!(loaded.processing.model, "rembg");

    Ok(())
}

#[test]
fn test_backend_options_resolution() -> anyhow::Result<()> {
    let mut config = Config::default();
    config.processing.device = "cpu".to_string();

    // 1. Backend without its own device inherits the processing device
    let flood = config.backend_options("flood")?;
    assert_eq!(flood.device, "cpu");
    assert_eq!(flood.quality.as_deref(), Some("high"));

    // 2. A backend device overrides it
    config.set("models.rembg.device", "cuda")?;
    let rembg = config.backend_options("rembg")?;
    assert_eq!(rembg.device, "cuda");
    assert_eq!(rembg.variant.as_deref(), Some("u2net"));

    // 3. Disabled or unknown backends are configuration errors
    config.set("models.flood.enabled", "false")?;
    assert!(matches!(config.backend_options("flood"), Err(PipelineError::Config(_))));
    assert!(matches!(config.backend_options("sam"), Err(PipelineError::Config(_))));

    Ok(())
}
