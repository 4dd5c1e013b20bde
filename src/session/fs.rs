//! Filesystem commands. Each one resolves its path through the sandbox
//! before any I/O and works on the resolved path only.
//!
//! All I/O uses `tokio::fs` so a large read or write does not stall the
//! runtime other sessions share.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{info, warn};

use crate::error::{CoderError, Result};
use crate::sandbox::Sandbox;

use super::result::Output;
use super::state::SessionState;

pub async fn ls(sandbox: &Sandbox, state: &SessionState, path: &str) -> Result<Output> {
    let dir = sandbox.resolve(path, state.cwd())?;
    require_dir(&dir, path).await?;

    let mut entries = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| CoderError::io(&dir, e))?;
    let mut items = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CoderError::io(&dir, e))?
    {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        // Follows symlinks, like `ls -F` on the link target
        if tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            name.push('/');
        }
        items.push(name);
    }
    items.sort();

    Ok(Output::Listing { items })
}

pub async fn cd(sandbox: &Sandbox, state: &mut SessionState, path: &str) -> Result<Output> {
    let dir = sandbox.resolve(path, state.cwd())?;
    require_dir(&dir, path).await?;

    let relative = sandbox.display_relative(&dir);
    info!("Working directory is now {relative}");
    state.set_cwd(dir);

    Ok(Output::Directory {
        message: format!("Current directory is now: {relative}"),
        cwd: relative,
    })
}

pub async fn read(sandbox: &Sandbox, state: &SessionState, path: &str) -> Result<Output> {
    let file = sandbox.resolve(path, state.cwd())?;
    require_file(&file, path).await?;

    let content = tokio::fs::read_to_string(&file)
        .await
        .map_err(|e| CoderError::io(&file, e))?;
    Ok(Output::Content { content })
}

pub async fn write(
    sandbox: &Sandbox,
    state: &SessionState,
    path: &str,
    content: &str,
) -> Result<Output> {
    let file = sandbox.resolve(path, state.cwd())?;
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoderError::io(parent, e))?;
    }
    tokio::fs::write(&file, content)
        .await
        .map_err(|e| CoderError::io(&file, e))?;

    Ok(Output::message(format!(
        "File written successfully: {} ({} bytes)",
        sandbox.display_relative(&file),
        content.len()
    )))
}

pub async fn mkdir(sandbox: &Sandbox, state: &SessionState, path: &str) -> Result<Output> {
    let dir = sandbox.resolve(path, state.cwd())?;
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| CoderError::io(&dir, e))?;

    Ok(Output::message(format!(
        "Directory created/ensured at {}",
        sandbox.display_relative(&dir)
    )))
}

/// Deletes a single regular file. Refused outright unless autonomous mode is on.
///
/// The path is resolved like any other, so `rm` on a symlink inside the
/// sandbox deletes the file it points to and leaves the link dangling.
pub async fn rm(sandbox: &Sandbox, state: &SessionState, path: &str) -> Result<Output> {
    if !state.autonomous_mode() {
        warn!("Blocked rm '{path}': autonomous mode is disabled");
        return Err(CoderError::DestructiveOperationBlocked);
    }

    let file = sandbox.resolve(path, state.cwd())?;
    require_file(&file, path).await?;
    tokio::fs::remove_file(&file)
        .await
        .map_err(|e| CoderError::io(&file, e))?;

    info!("Deleted {}", sandbox.display_relative(&file));
    Ok(Output::message(format!(
        "File deleted successfully: {}",
        sandbox.display_relative(&file)
    )))
}

async fn require_dir(path: &Path, raw: &str) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CoderError::NotADirectory(raw.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(CoderError::NotFound(raw.to_string())),
        Err(e) => Err(CoderError::io(path, e)),
    }
}

async fn require_file(path: &Path, raw: &str) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(CoderError::NotAFile(raw.to_string())),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(CoderError::NotFound(raw.to_string())),
        Err(e) => Err(CoderError::io(path, e)),
    }
}
