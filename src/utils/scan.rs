//! Turns local paths into upload selections.
//!
//! A directory becomes a folder selection whose relative paths start with the
//! directory name, the same shape a browser folder picker produces.

use std::path::{Path, PathBuf};
use tracing::warn;
use crate::core::{FileHandle, Result, UploadError};

/// Files found under one directory, ready for `enqueue_folder`.
#[derive(Debug, Clone)]
pub struct FolderSelection {
    pub name: String,
    pub files: Vec<FileHandle>,
    /// Relative paths left out because they are empty
    pub skipped: Vec<String>,
}

/// Read every file below `root`, skipping zero-length ones.
pub async fn scan_folder(root: &Path) -> Result<FolderSelection> {
    let name = root
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| UploadError::InvalidInput(format!("Invalid folder name: {}", root.display())))?
        .to_string();

    let mut entries = Vec::new();
    walk_dir(root, root, &mut entries)?;
    entries.sort_by(|a, b| a.1.cmp(&b.1));

    let mut selection = FolderSelection {
        name: name.clone(),
        files: Vec::new(),
        skipped: Vec::new(),
    };

    for (path, relative) in entries {
        let relative = format!("{}/{}", name, relative);
        let file = FileHandle::from_path(&path).await?;

        if file.size() == 0 {
            warn!(file = %relative, "Skipping empty file");
            selection.skipped.push(relative);
            continue;
        }

        selection.files.push(file.with_relative_path(relative));
    }

    Ok(selection)
}

/// Read loose files, skipping zero-length ones with a warning.
pub async fn read_files(paths: &[PathBuf]) -> Result<Vec<FileHandle>> {
    let mut files = Vec::with_capacity(paths.len());

    for path in paths {
        let file = FileHandle::from_path(path).await?;
        if file.size() == 0 {
            warn!(file = %path.display(), "Skipping empty file");
            continue;
        }
        files.push(file);
    }

    Ok(files)
}

fn walk_dir(root: &Path, current: &Path, files: &mut Vec<(PathBuf, String)>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;

        if metadata.is_dir() {
            walk_dir(root, &path, files)?;
        } else if metadata.is_file() {
            let relative = path.strip_prefix(root).map_err(std::io::Error::other)?;
            // Forward slashes regardless of platform
            let relative = relative.to_string_lossy().replace('\\', "/");
            files.push((path, relative));
        }
    }

    Ok(())
}
