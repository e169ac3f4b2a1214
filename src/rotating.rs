use crate::diagnostics;
use crate::error::{ConfigError, HandlerError};
use crate::file::{FileMode, FlushPolicy, LogFile};
use crate::formatter::{Formatter, TextFormatter};
use crate::handler::Handler;
use crate::record::Record;
use crate::rotation::{BackupNaming, RotationPolicy, Rotator, Schedule, When};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Options recognized by [`DualRotatingHandler`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotatingFileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: FileMode,
    /// Size ceiling in bytes; `0` disables size-based rotation.
    #[serde(default)]
    pub max_bytes: u64,
    #[serde(default)]
    pub backup_count: usize,
    /// Time anchor; `null` disables time-based rotation.
    #[serde(default = "default_when")]
    pub when: Option<When>,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub at_time: Option<NaiveTime>,
    /// Create the file on the first record instead of at construction.
    #[serde(default)]
    pub delay: bool,
    #[serde(default)]
    pub backup_naming: BackupNaming,
}

fn default_when() -> Option<When> {
    Some(When::Midnight)
}

fn default_interval() -> u32 {
    1
}

impl RotatingFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RotatingFileConfig {
            path: path.into(),
            mode: FileMode::default(),
            max_bytes: 0,
            backup_count: 0,
            when: default_when(),
            interval: default_interval(),
            at_time: None,
            delay: false,
            backup_naming: BackupNaming::default(),
        }
    }

    pub fn policy(&self) -> Result<RotationPolicy, ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingOption("path"));
        }
        let schedule = self
            .when
            .map(|when| Schedule::new(when, self.interval, self.at_time))
            .transpose()?;
        Ok(RotationPolicy {
            max_bytes: self.max_bytes,
            schedule,
            backup_count: self.backup_count,
            naming: self.backup_naming,
        })
    }
}

/// A log file plus its optional rotation state, guarded by the owning
/// handler's lock so that a write and the rotation it triggers form one
/// critical section.
#[derive(Debug)]
pub(crate) struct RotatingFile {
    file: LogFile,
    rotator: Option<Rotator>,
}

impl RotatingFile {
    pub fn new(file: LogFile, policy: Option<RotationPolicy>, now: DateTime<Utc>) -> Self {
        RotatingFile {
            file,
            rotator: policy.map(|p| Rotator::new(p, now)),
        }
    }

    pub fn open(&mut self) -> Result<(), HandlerError> {
        self.file.open().map_err(|source| HandlerError::Open {
            path: self.file.path().to_path_buf(),
            source,
        })
    }

    /// Write one line, then rotate at most once if a trigger fired.
    pub fn append(&mut self, line: &str, at: DateTime<Utc>) -> Result<(), HandlerError> {
        self.open()?;
        self.file.write_line(line).map_err(|source| HandlerError::Write {
            path: self.file.path().to_path_buf(),
            source,
        })?;

        if let Some(rotator) = self.rotator.as_mut() {
            if let Some(trigger) = rotator.check(self.file.size(), at) {
                tracing::debug!(
                    target: diagnostics::DIAGNOSTICS_TARGET,
                    path = %self.file.path().display(),
                    ?trigger,
                    "rotating log file"
                );
                rotator
                    .rotate(&mut self.file, at)
                    .map_err(|source| HandlerError::Rotate {
                        path: self.file.path().to_path_buf(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), HandlerError> {
        self.file.flush().map_err(|source| HandlerError::Write {
            path: self.file.path().to_path_buf(),
            source,
        })
    }

    pub fn close(&mut self) -> Result<(), HandlerError> {
        self.file.close().map_err(|source| HandlerError::Write {
            path: self.file.path().to_path_buf(),
            source,
        })
    }

    pub fn next_rollover(&self) -> Option<DateTime<Utc>> {
        self.rotator.as_ref().and_then(Rotator::next_rollover)
    }
}

#[derive(Debug)]
pub(crate) struct FileState {
    pub file: RotatingFile,
    pub closed: bool,
}

impl FileState {
    pub fn new(file: RotatingFile) -> Self {
        FileState {
            file,
            closed: false,
        }
    }
}

/// Text file handler that rotates on size or on a time boundary, whichever
/// comes first, keeping a bounded number of backups.
pub struct DualRotatingHandler {
    name: String,
    formatter: Arc<dyn Formatter>,
    state: Mutex<FileState>,
}

impl DualRotatingHandler {
    pub fn new(
        name: impl Into<String>,
        config: RotatingFileConfig,
        formatter: Arc<dyn Formatter>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let policy = config.policy()?;
        let mut file = RotatingFile::new(
            LogFile::new(&config.path, config.mode, FlushPolicy::Immediate),
            Some(policy),
            Utc::now(),
        );
        if !config.delay {
            if let Err(e) = file.open() {
                diagnostics::report(&name, &e);
            }
        }

        Ok(DualRotatingHandler {
            name,
            formatter,
            state: Mutex::new(FileState::new(file)),
        })
    }

    /// Handler with the default text formatter.
    pub fn with_default_format(
        name: impl Into<String>,
        config: RotatingFileConfig,
    ) -> Result<Self, ConfigError> {
        Self::new(name, config, Arc::new(TextFormatter::default()))
    }

    /// Next scheduled time-based rotation, if time rotation is enabled.
    pub fn next_rollover(&self) -> Option<DateTime<Utc>> {
        self.lock().file.next_rollover()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Handler for DualRotatingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, record: &Record) {
        let line = self.formatter.format(record);
        let mut state = self.lock();
        if state.closed {
            drop(state);
            diagnostics::report(&self.name, &HandlerError::Closed);
            return;
        }
        if let Err(e) = state.file.append(&line, record.timestamp) {
            drop(state);
            diagnostics::report(&self.name, &e);
        }
    }

    fn flush(&self) {
        if let Err(e) = self.lock().file.flush() {
            diagnostics::report(&self.name, &e);
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Err(e) = state.file.close() {
            drop(state);
            diagnostics::report(&self.name, &e);
        }
    }
}
