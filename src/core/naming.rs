//! Output naming and the skip-versus-overwrite decision.
//!
//! Output artifacts are named
//! `<stem>_<backend>[_<variant>]_<quality>_<device>[_<elapsed>s].png`.
//! The name without the elapsed suffix is only ever used as a lookup for a
//! previous run; the suffixed name is the one actually written. The two are
//! never equal.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::FileError;
use crate::models::ProcessingParameters;

/// Backend whose sub-variant is part of the output name
pub const REMBG_FAMILY: &str = "rembg";

/// Case-insensitive extension check. Configured extensions may be given with
/// or without the leading dot.
pub fn is_supported(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

/// Backend component of the output name, e.g. `flood` or `rembg_u2net`.
pub fn backend_label(params: &ProcessingParameters) -> String {
    if params.backend_id == REMBG_FAMILY {
        let variant = params.variant.as_deref().unwrap_or("u2net");
        format!("{}_{}", params.backend_id, variant)
    } else {
        params.backend_id.clone()
    }
}

/// Derive the output path for `input`.
///
/// Without `elapsed` this is the lookup path used to detect prior completion;
/// with `elapsed` it is the path the result is written to.
pub fn output_path(
    input: &Path,
    params: &ProcessingParameters,
    elapsed: Option<Duration>,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let label = backend_label(params);

    let name = match elapsed {
        Some(elapsed) => format!(
            "{}_{}_{}_{}_{:.1}s.png",
            stem,
            label,
            params.quality,
            params.device,
            elapsed.as_secs_f64()
        ),
        None => format!("{}_{}_{}_{}.png", stem, label, params.quality, params.device),
    };

    params.output_dir.join(name)
}

/// Classify a candidate file before any work is scheduled.
///
/// `Err(Unsupported)` and `Err(AlreadyExists)` are skips; a file that no longer
/// exists yields `Err(VanishedBeforeProcessing)`.
pub fn check(input: &Path, params: &ProcessingParameters) -> Result<(), FileError> {
    if !is_supported(input, &params.extensions) {
        return Err(FileError::Unsupported);
    }

    if !input.exists() {
        return Err(FileError::VanishedBeforeProcessing);
    }

    let lookup = output_path(input, params, None);
    if lookup.exists() && !params.overwrite_existing {
        debug!("Output already exists, skipping: {}", lookup.display());
        return Err(FileError::AlreadyExists(lookup));
    }

    Ok(())
}

pub fn should_process(input: &Path, params: &ProcessingParameters) -> bool {
    check(input, params).is_ok()
}

/// Fields recovered from an output file name
#[derive(Debug, Clone, PartialEq)]
pub struct OutputName {
    pub original: String,
    /// Backend label, including the variant for rembg-family names
    pub backend: String,
    pub quality: String,
    pub device: String,
    pub elapsed: Option<f64>,
}

/// Split an output stem back into its fields.
///
/// The elapsed suffix is optional. The backend label is located by searching
/// for one of `backends` from the right, so original stems containing
/// underscores survive; without a match the single field before the quality
/// is taken as the backend.
pub fn parse_output_name(stem: &str, backends: &[&str]) -> Option<OutputName> {
    let mut parts: Vec<&str> = stem.split('_').collect();

    let elapsed = parts
        .last()
        .and_then(|p| p.strip_suffix('s'))
        .and_then(|p| p.parse::<f64>().ok());
    if elapsed.is_some() {
        parts.pop();
    }

    if parts.len() < 4 {
        return None;
    }
    let device = parts.pop()?.to_string();
    let quality = parts.pop()?.to_string();

    let split = parts
        .iter()
        .rposition(|p| backends.contains(p))
        .filter(|&i| i > 0)
        .unwrap_or(parts.len() - 1);

    Some(OutputName {
        original: parts[..split].join("_"),
        backend: parts[split..].join("_"),
        quality,
        device,
        elapsed,
    })
}
