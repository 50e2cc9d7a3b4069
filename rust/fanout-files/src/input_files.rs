//! Directory listing with a shell-style name filter.

use std::path::{Path, PathBuf};

use fanout_common::{Result, error::Error};
use globset::{GlobBuilder, GlobMatcher};

/// Which kinds of directory entries [`list_entries`] returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryKind {
    #[default]
    Files,
    Directories,
    FilesAndDirectories,
}

impl EntryKind {
    fn accepts(self, is_dir: bool) -> bool {
        match self {
            EntryKind::Files => !is_dir,
            EntryKind::Directories => is_dir,
            EntryKind::FilesAndDirectories => true,
        }
    }
}

/// Lists the entries directly inside `dir`, sorted by name.
///
/// `filter` is matched against the entry name only; `*` matches any run of
/// characters and `?` exactly one. With no filter every entry of the requested
/// `kind` is returned. Symbolic links are classified by what they point to.
///
/// Fails with `NotFound` if `dir` does not exist, `NotADirectory` if it is
/// not a directory and `InvalidPattern` if `filter` does not parse.
pub fn list_entries(
    dir: impl AsRef<Path>,
    filter: Option<&str>,
    kind: EntryKind,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(Error::not_found(dir));
    }
    if !dir.is_dir() {
        return Err(Error::not_a_directory(dir));
    }
    let matcher = filter.map(compile_filter).transpose()?;

    let read_dir =
        std::fs::read_dir(dir).map_err(|e| Error::io(dir.display().to_string(), e))?;
    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| Error::io(dir.display().to_string(), e))?;
        let path = entry.path();
        if !kind.accepts(path.is_dir()) {
            continue;
        }
        if let Some(matcher) = &matcher {
            if !matcher.is_match(entry.file_name()) {
                continue;
            }
        }
        entries.push(path);
    }
    entries.sort();
    log::trace!(
        "listed {} entries from {} (filter {:?})",
        entries.len(),
        dir.display(),
        filter
    );
    Ok(entries)
}

fn compile_filter(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| Error::invalid_pattern(pattern, e))
}
