//! Buffered, line-oriented text output.

use std::{
    fmt::{self, Display},
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use fanout_common::{Result, error::Error};

/// Writes text files one line at a time through a buffer.
///
/// Lines end with `\n`. Output is buffered until [`flush`](Self::flush),
/// [`close`](Self::close) or drop; dropping without `close` flushes too but
/// swallows any error, so call `close` when the result matters.
pub struct TextFileWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TextFileWriter {
    /// Creates `path`, truncating an existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::io(path.display().to_string(), e))?;
        Ok(Self::from_file(path, file))
    }

    /// Opens `path` for appending, creating it if needed.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        Ok(Self::from_file(path, file))
    }

    fn from_file(path: &Path, file: File) -> Self {
        TextFileWriter {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `line` followed by a newline.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}").map_err(|e| self.io_error(e))
    }

    /// Writes the values separated by single spaces, then a newline.
    ///
    /// ```no_run
    /// # fn main() -> fanout_common::Result<()> {
    /// let mut w = fanout_files::TextFileWriter::create("points.txt")?;
    /// w.write_values([1.5, 2.0, 3.25])?; // "1.5 2 3.25"
    /// w.close()
    /// # }
    /// ```
    pub fn write_values<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Display,
    {
        let line = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.write_line(&line)
    }

    /// Writes formatted text followed by a newline; pair with `format_args!`.
    ///
    /// ```no_run
    /// # fn main() -> fanout_common::Result<()> {
    /// let mut w = fanout_files::TextFileWriter::create("report.txt")?;
    /// w.write_fmt_line(format_args!("{:>4} {:.3}", 7, 0.5))?;
    /// w.close()
    /// # }
    /// ```
    pub fn write_fmt_line(&mut self, args: fmt::Arguments<'_>) -> Result<()> {
        self.out
            .write_fmt(args)
            .and_then(|()| self.out.write_all(b"\n"))
            .map_err(|e| self.io_error(e))
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| self.io_error(e))
    }

    /// Flushes and closes the file.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.out
            .get_ref()
            .sync_all()
            .map_err(|e| self.io_error(e))
    }

    fn io_error(&self, e: std::io::Error) -> Error {
        Error::io(self.path.display().to_string(), e)
    }
}

impl fmt::Debug for TextFileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextFileWriter")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let mut w = TextFileWriter::create(&path).unwrap();
        assert_eq!(w.path(), path);
        w.write_values([1, 2, 3]).unwrap();
        w.write_values([0.5f64, 2.0]).unwrap();
        w.write_fmt_line(format_args!("{}={:03}", "x", 7)).unwrap();
        w.write_line("literal % {} text").unwrap();
        w.write_values(Vec::<i32>::new()).unwrap();
        w.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "1 2 3\n0.5 2\nx=007\nliteral % {} text\n\n");
    }

    #[test]
    fn test_flush_makes_output_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut w = TextFileWriter::create(&path).unwrap();
        w.write_line("first").unwrap();
        w.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");
        drop(w);
    }

    #[test]
    fn test_create_truncates_and_append_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "old\n").unwrap();

        let mut w = TextFileWriter::create(&path).unwrap();
        w.write_line("new").unwrap();
        w.close().unwrap();

        let mut w = TextFileWriter::append(&path).unwrap();
        w.write_line("more").unwrap();
        w.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\nmore\n");
    }

    #[test]
    fn test_create_in_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = TextFileWriter::create(dir.path().join("no/such/dir/out.txt")).unwrap_err();
        assert!(matches!(
            err.kind(),
            fanout_common::error::ErrorKind::Io { .. }
        ));
    }
}
