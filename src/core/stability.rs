use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

/// Check that a file has finished being written.
///
/// Reads the size, sleeps for `timeout`, reads it again. Returns `true` only if
/// the file still exists and its size did not change. Any read error (including
/// the file disappearing) fails closed.
///
/// This blocks the calling thread for `timeout`; never call it from the
/// filesystem event thread.
pub fn is_stable(path: &Path, timeout: Duration) -> bool {
    let initial = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!("Error checking file stability for {}: {}", path.display(), e);
            return false;
        }
    };

    std::thread::sleep(timeout);

    match fs::metadata(path) {
        Ok(meta) => {
            let stable = meta.len() == initial;
            if !stable {
                debug!(
                    "Size of {} changed from {} to {} bytes",
                    path.display(),
                    initial,
                    meta.len()
                );
            }
            stable
        }
        Err(_) => false,
    }
}
