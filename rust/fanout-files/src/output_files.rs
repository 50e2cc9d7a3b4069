//! Successive output paths with an auto-incrementing index.

use std::path::{Path, PathBuf};

/// Generates `dir/<name><index><ext>`-style paths, one per call.
///
/// The base name selects one of three modes:
///
/// - **append**: no token in the name; the index is appended
///   (`"result_"` → `result_0.dat`, `result_1.dat`, ...).
/// - **index token**: every [`OutputFiles::INDEX_TOKEN`] (`${index}`) is
///   replaced by the index (`"run-${index}-out"` → `run-0-out.dat`).
/// - **zero-padded token**: every `${index:zerosN}` is replaced by the index
///   padded to N digits (`"result_${index:zeros3}"` → `result_000.dat`).
///   Use [`OutputFiles::padded_token`] to build the token.
///
/// The extension gets a leading dot if it lacks one; an empty extension adds
/// nothing.
#[derive(Clone, Debug)]
pub struct OutputFiles {
    dir: PathBuf,
    template: NameTemplate,
    extension: String,
    index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum NameTemplate {
    Append(String),
    Index(String),
    Padded {
        name: String,
        token: String,
        width: usize,
    },
}

impl NameTemplate {
    fn parse(name: &str) -> Self {
        if name.contains(OutputFiles::INDEX_TOKEN) {
            return NameTemplate::Index(name.to_string());
        }
        const PADDED_PREFIX: &str = "${index:zeros";
        if let Some(start) = name.find(PADDED_PREFIX) {
            let rest = &name[start + PADDED_PREFIX.len()..];
            let digits = rest.chars().take_while(char::is_ascii_digit).count();
            if digits > 0 && rest[digits..].starts_with('}') {
                if let Ok(width) = rest[..digits].parse() {
                    let token = name[start..start + PADDED_PREFIX.len() + digits + 1].to_string();
                    return NameTemplate::Padded {
                        name: name.to_string(),
                        token,
                        width,
                    };
                }
            }
        }
        NameTemplate::Append(name.to_string())
    }

    fn render(&self, index: u64) -> String {
        match self {
            NameTemplate::Append(name) => format!("{name}{index}"),
            NameTemplate::Index(name) => name.replace(OutputFiles::INDEX_TOKEN, &index.to_string()),
            NameTemplate::Padded { name, token, width } => {
                let width = *width;
                name.replace(token.as_str(), &format!("{index:0width$}"))
            }
        }
    }
}

impl OutputFiles {
    /// Placeholder replaced by the plain index.
    pub const INDEX_TOKEN: &'static str = "${index}";

    /// Placeholder replaced by the index zero-padded to `width` digits.
    pub fn padded_token(width: usize) -> String {
        format!("${{index:zeros{width}}}")
    }

    pub fn new(dir: impl AsRef<Path>, name: &str, extension: &str) -> Self {
        let extension = if extension.is_empty() || extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{extension}")
        };
        OutputFiles {
            dir: dir.as_ref().to_path_buf(),
            template: NameTemplate::parse(name),
            extension,
            index: 0,
        }
    }

    /// Starts numbering at `index` instead of 0.
    pub fn with_start(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    /// The index the next generated path will use.
    pub fn current_index(&self) -> u64 {
        self.index
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path [`next_path`](Self::next_path) would return, without advancing.
    pub fn peek(&self) -> PathBuf {
        self.path_for(self.index)
    }

    /// Returns the path for the current index and advances it.
    pub fn next_path(&mut self) -> PathBuf {
        let path = self.path_for(self.index);
        self.index += 1;
        path
    }

    fn path_for(&self, index: u64) -> PathBuf {
        let mut file_name = self.template.render(index);
        file_name.push_str(&self.extension);
        self.dir.join(file_name)
    }
}

impl Iterator for OutputFiles {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        Some(self.next_path())
    }
}
