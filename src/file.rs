use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// How the log file is opened the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// Keep existing content and append (`a`).
    #[default]
    #[serde(alias = "a")]
    Append,
    /// Discard existing content (`w`).
    #[serde(alias = "w")]
    Truncate,
    /// Fail if the file already exists (`x`).
    #[serde(alias = "x")]
    CreateNew,
}

/// When written lines reach the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Flush after every record.
    #[default]
    Immediate,
    /// Flush on `flush`, `close` and rotation.
    Buffered,
}

/// An append-only log file with lazy open and a running byte count.
///
/// Not synchronized; the owning handler keeps it behind its lock.
#[derive(Debug)]
pub(crate) struct LogFile {
    path: PathBuf,
    mode: FileMode,
    flush: FlushPolicy,
    writer: Option<BufWriter<File>>,
    size: u64,
    opened_once: bool,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, mode: FileMode, flush: FlushPolicy) -> Self {
        LogFile {
            path: path.into(),
            mode,
            flush,
            writer: None,
            size: 0,
            opened_once: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open the file if it is not open yet.
    pub fn open(&mut self) -> io::Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // The configured mode only applies to the first open; files opened
        // after a rotation always start empty at a freed path.
        let mode = if self.opened_once { FileMode::Append } else { self.mode };
        let mut options = OpenOptions::new();
        match mode {
            FileMode::Append => options.create(true).append(true),
            FileMode::Truncate => options.create(true).write(true).truncate(true),
            FileMode::CreateNew => options.create_new(true).write(true),
        };

        let file = options.open(&self.path)?;
        self.size = file.metadata()?.len();
        self.writer = Some(BufWriter::new(file));
        self.opened_once = true;
        Ok(())
    }

    /// Append `line` and a newline terminator.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.open()?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::Other, "log file is not open"));
        };
        match write_terminated(writer, line, self.flush) {
            Ok(()) => {
                self.size += line.len() as u64 + 1;
                Ok(())
            }
            Err(e) => {
                // Drop the handle so the next record reopens the file.
                self.writer = None;
                Err(e)
            }
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and release the handle. The byte count resets.
    pub fn close(&mut self) -> io::Result<()> {
        let result = self.flush();
        self.writer = None;
        self.size = 0;
        result
    }

    /// Open a fresh handle after the previous file was moved away.
    pub fn reopen(&mut self) -> io::Result<()> {
        self.writer = None;
        self.opened_once = true;
        self.open()
    }
}

fn write_terminated(writer: &mut BufWriter<File>, line: &str, flush: FlushPolicy) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    if flush == FlushPolicy::Immediate {
        writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_mode_counts_existing_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "0123456789").unwrap();

        let mut file = LogFile::new(&path, FileMode::Append, FlushPolicy::Immediate);
        file.write_line("abc").unwrap();
        assert_eq!(file.size(), 14);
        assert_eq!(fs::read_to_string(&path).unwrap(), "0123456789abc\n");
    }

    #[test]
    fn truncate_mode_only_applies_to_first_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "old\n").unwrap();

        let mut file = LogFile::new(&path, FileMode::Truncate, FlushPolicy::Immediate);
        file.write_line("new").unwrap();
        file.close().unwrap();
        file.write_line("newer").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\nnewer\n");
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "x").unwrap();

        let mut file = LogFile::new(&path, FileMode::CreateNew, FlushPolicy::Immediate);
        assert!(file.write_line("y").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "x");
    }

    #[test]
    fn buffered_policy_defers_until_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/app.jsonl");

        let mut file = LogFile::new(&path, FileMode::Append, FlushPolicy::Buffered);
        file.write_line("{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
        file.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}\n");
    }
}
