//! Integration tests for the backend registry and the built-in backends.

mod common;

use std::collections::BTreeMap;

use cutout::backends::{FloodFillBackend, RembgBackend, resolve_device};
use cutout::{BackendOptions, BackendRegistry, PipelineError, TransformBackend};
use image::DynamicImage;

use common::*;

fn flood_options(quality: &str) -> BackendOptions {
    BackendOptions {
        device: "auto".to_string(),
        quality: Some(quality.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_flood_keys_out_border_background() -> anyhow::Result<()> {
    // 1. White background with a red square
    let image = DynamicImage::ImageRgb8(product_shot());
    let mut backend = FloodFillBackend::new(&flood_options("low"))?;
    backend.initialize()?;

    // 2. Transform and inspect the alpha channel
    let result = backend.transform(&image)?.to_rgba8();
    assert_eq!(result.dimensions(), (32, 32));
    assert_eq!(result.get_pixel(0, 0)[3], 0, "corner should be transparent");
    assert_eq!(result.get_pixel(31, 16)[3], 0, "edge should be transparent");
    assert_eq!(result.get_pixel(16, 16)[3], 255, "subject should be opaque");
    assert_eq!(result.get_pixel(16, 16)[0], 200, "subject colour preserved");

    backend.release();
    assert!(!backend.is_initialized());

    Ok(())
}

#[test]
fn test_flood_high_quality_feathers_edges() -> anyhow::Result<()> {
    let image = DynamicImage::ImageRgb8(product_shot());
    let mut backend = FloodFillBackend::new(&flood_options("high"))?;
    backend.initialize()?;

    let result = backend.transform(&image)?.to_rgba8();
    assert_eq!(result.get_pixel(0, 0)[3], 0);
    assert!(result.get_pixel(16, 16)[3] > 200);

    // Feathering leaves partially transparent pixels around the subject
    let edge = result.get_pixel(8, 16)[3];
    assert!(edge > 0 && edge < 255, "edge alpha {} is not feathered", edge);

    Ok(())
}

#[test]
fn test_flood_rejects_bad_settings() {
    assert!(FloodFillBackend::new(&flood_options("ultra")).is_err());

    let mut options = flood_options("low");
    options.options = BTreeMap::from([("tolerance".to_string(), toml::Value::Float(1000.0))]);
    assert!(FloodFillBackend::new(&options).is_err());
}

#[test]
fn test_flood_requires_initialization() -> anyhow::Result<()> {
    let backend = FloodFillBackend::new(&flood_options("low"))?;
    let image = DynamicImage::ImageRgb8(product_shot());
    assert!(backend.transform(&image).is_err());
    Ok(())
}

#[test]
fn test_device_resolution() -> anyhow::Result<()> {
    assert_eq!(resolve_device("auto"), "cpu");
    assert_eq!(resolve_device(""), "cpu");
    assert_eq!(resolve_device("cuda"), "cuda");

    let backend = FloodFillBackend::new(&flood_options("low"))?;
    assert_eq!(backend.device(), "cpu");

    Ok(())
}

#[test]
fn test_registry_builtins_and_unknown_ids() -> anyhow::Result<()> {
    let registry = BackendRegistry::default();
    assert_eq!(registry.available(), vec!["flood", "rembg"]);
    assert!(registry.contains("flood"));

    match registry.create("sam", &BackendOptions::default()) {
        Err(PipelineError::Config(message)) => {
            assert!(message.contains("flood"));
            assert!(message.contains("rembg"));
        }
        Err(other) => panic!("expected config error, got {}", other),
        Ok(_) => panic!("expected config error"),
    }

    let backend = registry.create("flood", &flood_options("medium"))?;
    assert_eq!(backend.name(), "flood");
    assert!(!backend.is_initialized());

    Ok(())
}

#[test]
fn test_custom_backend_registration() -> anyhow::Result<()> {
    let counters = std::sync::Arc::new(StubCounters::default());
    let registry = stub_registry(std::sync::Arc::clone(&counters));

    assert_eq!(registry.available(), vec![STUB_ID]);
    let mut backend = registry.create(STUB_ID, &BackendOptions::default())?;
    backend.initialize()?;
    backend.release();
    assert_eq!(StubCounters::get(&counters.created), 1);
    assert_eq!(StubCounters::get(&counters.released), 1);

    Ok(())
}

#[test]
fn test_rembg_missing_model_fails_initialization() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let model_path = dir.path().join("u2net.rten");

    let options = BackendOptions {
        device: "auto".to_string(),
        variant: Some("u2net".to_string()),
        options: BTreeMap::from([(
            "model_path".to_string(),
            toml::Value::String(model_path.to_string_lossy().into_owned()),
        )]),
        ..Default::default()
    };
    let mut backend = RembgBackend::new(&options)?;
    assert_eq!(backend.variant(), "u2net");

    let err = backend
        .initialize()
        .err()
        .ok_or_else(|| anyhow::anyhow!("initialize should fail without a model file"))?;
    assert!(err.to_string().contains("not found"));
    assert!(!backend.is_initialized());

    // Release on a never-initialized backend is a no-op
    backend.release();

    Ok(())
}

#[test]
fn test_rembg_unknown_variant_is_rejected() {
    let options = BackendOptions {
        variant: Some("u3net".to_string()),
        ..Default::default()
    };
    assert!(RembgBackend::new(&options).is_err());

    let registry = BackendRegistry::default();
    assert!(matches!(
        registry.create("rembg", &options),
        Err(PipelineError::Init { .. })
    ));
}
