use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use nanogen_contracts::format::DetectedFormat;

/// Replaces (or adds) the extension so it matches the real format.
pub fn output_path_for(requested: &Path, format: DetectedFormat) -> PathBuf {
    requested.with_extension(format.extension.trim_start_matches('.'))
}

/// Writes the image next to `requested`, creating parent directories.
pub fn write_image(requested: &Path, format: DetectedFormat, bytes: &[u8]) -> Result<PathBuf> {
    let path = output_path_for(requested, format);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
