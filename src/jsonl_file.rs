use crate::diagnostics;
use crate::error::{ConfigError, HandlerError};
use crate::file::{FileMode, FlushPolicy, LogFile};
use crate::formatter::Formatter;
use crate::handler::Handler;
use crate::jsonl::JsonlFormatter;
use crate::record::Record;
use crate::rotating::{FileState, RotatingFile};
use crate::rotation::{BackupNaming, RotationPolicy, Schedule, When};
use chrono::{NaiveTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const JSONL_EXTENSION: &str = ".jsonl";

/// Options recognized by [`JsonlFileHandler`]. Rotation is off unless
/// `max_bytes` or `when` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonlFileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub mode: FileMode,
    #[serde(default)]
    pub flush: FlushPolicy,
    #[serde(default)]
    pub delay: bool,
    #[serde(default)]
    pub max_bytes: u64,
    #[serde(default)]
    pub when: Option<When>,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub at_time: Option<NaiveTime>,
    #[serde(default)]
    pub backup_count: usize,
    #[serde(default)]
    pub backup_naming: BackupNaming,
}

fn default_interval() -> u32 {
    1
}

impl JsonlFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlFileConfig {
            path: path.into(),
            mode: FileMode::default(),
            flush: FlushPolicy::default(),
            delay: false,
            max_bytes: 0,
            when: None,
            interval: default_interval(),
            at_time: None,
            backup_count: 0,
            backup_naming: BackupNaming::default(),
        }
    }

    fn validate(&self) -> Result<Option<RotationPolicy>, ConfigError> {
        let has_extension = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.len() > JSONL_EXTENSION.len() && name.ends_with(JSONL_EXTENSION));
        if !has_extension {
            return Err(ConfigError::InvalidExtension {
                path: self.path.clone(),
                expected: JSONL_EXTENSION,
            });
        }

        let schedule = self
            .when
            .map(|when| Schedule::new(when, self.interval, self.at_time))
            .transpose()?;
        if self.max_bytes == 0 && schedule.is_none() {
            return Ok(None);
        }
        Ok(Some(RotationPolicy {
            max_bytes: self.max_bytes,
            schedule,
            backup_count: self.backup_count,
            naming: self.backup_naming,
        }))
    }
}

/// Appends one structured JSON object per record to a `.jsonl` file.
pub struct JsonlFileHandler {
    name: String,
    formatter: Arc<JsonlFormatter>,
    state: Mutex<FileState>,
}

impl JsonlFileHandler {
    pub fn new(
        name: impl Into<String>,
        config: JsonlFileConfig,
        formatter: Arc<JsonlFormatter>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let policy = config.validate()?;
        let mut file = RotatingFile::new(
            LogFile::new(&config.path, config.mode, config.flush),
            policy,
            Utc::now(),
        );
        if !config.delay {
            if let Err(e) = file.open() {
                diagnostics::report(&name, &e);
            }
        }

        Ok(JsonlFileHandler {
            name,
            formatter,
            state: Mutex::new(FileState::new(file)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Handler for JsonlFileHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, record: &Record) {
        let line = self.formatter.format(record);
        let mut state = self.lock();
        let result = if state.closed {
            Err(HandlerError::Closed)
        } else {
            state.file.append(&line, record.timestamp)
        };
        drop(state);
        if let Err(e) = result {
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
        let result = state.file.close();
        drop(state);
        if let Err(e) = result {
            diagnostics::report(&self.name, &e);
        }
    }
}
