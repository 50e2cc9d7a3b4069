//! Command implementations for fanout-cmd

use clap::ValueEnum;
use fanout_files::EntryKind;

pub mod list;
pub mod run;

/// Entry kinds accepted on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Files,
    Dirs,
    All,
}

impl From<KindArg> for EntryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Files => EntryKind::Files,
            KindArg::Dirs => EntryKind::Directories,
            KindArg::All => EntryKind::FilesAndDirectories,
        }
    }
}
