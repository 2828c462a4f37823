//! Decompression of the downloaded snapshot with an external `xz`.

use crate::error::SyncError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

/// Standard locations searched for the `xz` binary, in order.
pub const XZ_LOCATIONS: [&str; 3] = ["/bin/xz", "/usr/bin/xz", "/usr/local/bin/xz"];

fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Returns the first candidate that exists and is a regular file.
///
/// The fixed `locations` are checked before the user override.
pub fn locate_in<P: AsRef<Path>>(locations: &[P], override_path: Option<&Path>) -> Option<PathBuf> {
    locations
        .iter()
        .map(|p| p.as_ref())
        .chain(override_path)
        .find(|p| is_regular_file(p))
        .map(Path::to_path_buf)
}

/// Error for a missing decompressor, listing what was searched.
pub(crate) fn capability_unavailable<P: AsRef<Path>>(
    locations: &[P],
    override_path: Option<&Path>,
) -> SyncError {
    let searched: Vec<String> = locations
        .iter()
        .map(|p| p.as_ref())
        .chain(override_path)
        .map(|p| p.display().to_string())
        .collect();
    SyncError::CapabilityUnavailable(searched.join(", "))
}

/// Expected output path of `xz -d` for `artifact`: the name without its extension.
pub fn decompressed_path(artifact: &Path) -> PathBuf {
    artifact.with_extension("")
}

/// Decompresses `artifact` in place with `xz -d`.
///
/// The process is awaited without a timeout. Success requires a zero exit
/// status and the decompressed file to exist afterwards.
///
/// # Arguments
///
/// * `xz` - Path to the decompressor
/// * `artifact` - Compressed file, replaced by its decompressed version
///
/// # Returns
///
/// Path of the decompressed file, or [`SyncError::DecompressionFailed`].
pub async fn decompress(xz: &Path, artifact: &Path) -> Result<PathBuf, SyncError> {
    info!("Trying to decompress {}...", artifact.display());

    let status = Command::new(xz)
        .arg("-d")
        .arg(artifact)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| {
            SyncError::DecompressionFailed(format!("failed to run {}: {}", xz.display(), e))
        })?;
    info!("Return {}", status.code().unwrap_or(-1));

    let output = decompressed_path(artifact);
    if !status.success() {
        return Err(SyncError::DecompressionFailed(format!(
            "{} exited with {}",
            xz.display(),
            status
        )));
    }
    if !is_regular_file(&output) {
        return Err(SyncError::DecompressionFailed(format!(
            "{} did not produce {}",
            xz.display(),
            output.display()
        )));
    }

    Ok(output)
}
