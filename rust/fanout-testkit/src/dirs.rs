//! Scratch directories for file-system tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Creates a temporary directory containing empty `files` and empty
/// subdirectories `dirs` (names relative to the root).
pub fn temp_dir_with(files: &[&str], dirs: &[&str]) -> anyhow::Result<TempDir> {
    let root = tempfile::tempdir()?;
    for dir in dirs {
        std::fs::create_dir_all(root.path().join(dir))?;
    }
    for file in files {
        let path = root.path().join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"")?;
    }
    Ok(root)
}

/// File names (not paths) of `paths`, sorted.
pub fn sorted_names(paths: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Path of a POSIX shell suitable for spawning test processes.
pub fn shell_path() -> anyhow::Result<PathBuf> {
    let path = Path::new("/bin/sh");
    if !path.is_file() {
        anyhow::bail!("{} not found", path.display());
    }
    Ok(path.to_path_buf())
}
