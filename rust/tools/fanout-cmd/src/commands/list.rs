//! List command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use fanout_files::list_entries;

use super::KindArg;

pub fn run(dir: PathBuf, filter: Option<String>, kind: KindArg) -> Result<()> {
    let entries = list_entries(&dir, filter.as_deref(), kind.into())
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        println!("{}", entry.display());
    }
    Ok(())
}
