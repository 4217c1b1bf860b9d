use std::path::Path;

use anyhow::{Context, Result};
use log::debug;
use tokio::fs;

/// Creates the directory that will hold `file_path`, if it has one.
/// A bare file name lives in the working directory and needs nothing.
pub async fn ensure_parent_dir(file_path: &Path) -> Result<()> {
    let Some(parent) = file_path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };
    if fs::try_exists(parent).await.unwrap_or(false) {
        return Ok(());
    }

    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    debug!("Created directory {}", parent.display());
    Ok(())
}
