//! Integration tests for output naming and skip decisions.
//!
//! Tests cover:
//! - Case-insensitive extension matching
//! - Lookup path versus write path
//! - Skipping when a previous output exists
//! - Backend labels for rembg-family backends
//! - Parsing output names back into fields

mod common;

use std::time::Duration;

use cutout::FileError;
use cutout::core::naming::{self, backend_label, is_supported, output_path, should_process};
use cutout::core::parse_output_name;

use common::*;

#[test]
fn test_extension_matching_is_case_insensitive() -> anyhow::Result<()> {
    let extensions = vec![".jpg".to_string(), "png".to_string()];

    for name in ["a.jpg", "a.JPG", "a.Jpg", "b.png", "b.PNG"] {
        assert!(is_supported(std::path::Path::new(name), &extensions), "{}", name);
    }
    for name in ["c.txt", "d.jpeg", "noext", "e.png.bak"] {
        assert!(!is_supported(std::path::Path::new(name), &extensions), "{}", name);
    }

    Ok(())
}

#[test]
fn test_should_process_ignores_content() -> anyhow::Result<()> {
    // 1. Files with supported extensions but garbage content still qualify
    let ws = Workspace::new()?;
    let params = ws.params();
    let fake = ws.input().join("fake.JPG");
    std::fs::write(&fake, b"not an image")?;
    assert!(should_process(&fake, &params));

    // 2. Unsupported extension never qualifies
    let text = ws.input().join("notes.txt");
    std::fs::write(&text, b"hello")?;
    assert!(!should_process(&text, &params));
    assert!(matches!(naming::check(&text, &params), Err(FileError::Unsupported)));

    // 3. A missing file does not qualify
    let missing = ws.input().join("gone.png");
    assert!(matches!(
        naming::check(&missing, &params),
        Err(FileError::VanishedBeforeProcessing)
    ));

    Ok(())
}

#[test]
fn test_lookup_and_write_paths_differ() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let params = ws.params();
    let input = ws.input().join("a.jpg");

    let lookup = output_path(&input, &params, None);
    assert_eq!(lookup, ws.output().join("a_stub_default_cpu.png"));

    for secs in [0.0, 0.04, 1.25, 12.0] {
        let written = output_path(&input, &params, Some(Duration::from_secs_f64(secs)));
        assert_ne!(lookup, written);

        // Same prefix up to the extension, followed by the elapsed suffix
        let lookup_str = lookup.to_string_lossy();
        let written_str = written.to_string_lossy();
        let prefix = lookup_str.trim_end_matches(".png");
        assert!(written_str.starts_with(&format!("{}_", prefix)));
        assert!(written_str.ends_with("s.png"));
    }

    let written = output_path(&input, &params, Some(Duration::from_millis(1300)));
    assert_eq!(written, ws.output().join("a_stub_default_cpu_1.3s.png"));

    Ok(())
}

#[test]
fn test_existing_output_skips_unless_overwrite() -> anyhow::Result<()> {
    // 1. Create input and a previous output at the lookup path
    let ws = Workspace::new()?;
    let mut params = ws.params();
    let input = write_jpeg(&ws.input(), "a.jpg")?;
    let lookup = output_path(&input, &params, None);
    std::fs::write(&lookup, b"previous")?;

    // 2. Skipped while overwrite is disabled
    match naming::check(&input, &params) {
        Err(err @ FileError::AlreadyExists(_)) => assert!(err.is_skip()),
        other => panic!("expected AlreadyExists, got {:?}", other),
    }

    // 3. Eligible again with overwrite enabled
    params.overwrite_existing = true;
    assert!(should_process(&input, &params));

    // 4. A suffixed output alone does not count as prior completion
    std::fs::remove_file(&lookup)?;
    params.overwrite_existing = false;
    std::fs::write(
        output_path(&input, &params, Some(Duration::from_secs(3))),
        b"previous",
    )?;
    assert!(should_process(&input, &params));

    Ok(())
}

#[test]
fn test_rembg_label_includes_variant() -> anyhow::Result<()> {
    let ws = Workspace::new()?;
    let mut params = ws.params();

    params.backend_id = "rembg".to_string();
    params.variant = Some("isnet-general-use".to_string());
    assert_eq!(backend_label(&params), "rembg_isnet-general-use");

    params.variant = None;
    assert_eq!(backend_label(&params), "rembg_u2net");

    // Other backends ignore the variant
    params.backend_id = "flood".to_string();
    params.variant = Some("ignored".to_string());
    assert_eq!(backend_label(&params), "flood");

    Ok(())
}

#[test]
fn test_parse_output_name() -> anyhow::Result<()> {
    let backends = ["flood", "rembg"];

    let name = parse_output_name("my_photo_flood_high_cpu_2.5s", &backends)
        .ok_or_else(|| anyhow::anyhow!("name not parsed"))?;
    assert_eq!(name.original, "my_photo");
    assert_eq!(name.backend, "flood");
    assert_eq!(name.quality, "high");
    assert_eq!(name.device, "cpu");
    assert_eq!(name.elapsed, Some(2.5));

    let name = parse_output_name("a_rembg_u2net_default_cpu", &backends)
        .ok_or_else(|| anyhow::anyhow!("name not parsed"))?;
    assert_eq!(name.original, "a");
    assert_eq!(name.backend, "rembg_u2net");
    assert_eq!(name.elapsed, None);

    // Unknown backend: the field before the quality is the backend
    let name = parse_output_name("b_custom_low_cpu_0.1s", &backends)
        .ok_or_else(|| anyhow::anyhow!("name not parsed"))?;
    assert_eq!(name.original, "b");
    assert_eq!(name.backend, "custom");

    assert!(parse_output_name("plain", &backends).is_none());
    assert!(parse_output_name("x_low_cpu", &backends).is_none());

    Ok(())
}
