use std::{fs::remove_dir_all, io::ErrorKind, path::Path};

use anyhow::{Context, Result};

/// Removes the directory and everything below it.
///
/// A directory that does not exist counts as reclaimed. Returns whether anything was removed.
pub fn reclaim_directory(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    match remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Reclaimed directory");
            Ok(true)
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error)
            .with_context(|| format!("Failed to remove directory: {}", path.display())),
    }
}
