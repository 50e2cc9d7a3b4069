//! File-system helpers for batch jobs: picking inputs, naming outputs, and
//! writing line-oriented text reports.

pub mod input_files;
pub mod output_files;
pub mod text_writer;

pub use input_files::{EntryKind, list_entries};
pub use output_files::OutputFiles;
pub use text_writer::TextFileWriter;
