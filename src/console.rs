use crate::diagnostics;
use crate::error::HandlerError;
use crate::formatter::{Formatter, TextFormatter};
use crate::handler::Handler;
use crate::record::Record;
use serde::Deserialize;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleStream {
    #[default]
    Stderr,
    Stdout,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub stream: ConsoleStream,
}

/// Writes one formatted line per record to a terminal stream, flushing
/// after each line.
pub struct ConsoleHandler {
    name: String,
    formatter: Arc<dyn Formatter>,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleHandler {
    pub fn new(name: impl Into<String>, config: ConsoleConfig, formatter: Arc<dyn Formatter>) -> Self {
        let writer: Box<dyn Write + Send> = match config.stream {
            ConsoleStream::Stderr => Box::new(io::stderr()),
            ConsoleStream::Stdout => Box::new(io::stdout()),
        };
        Self::with_writer(name, writer, formatter)
    }

    /// Console handler writing to an arbitrary sink, e.g. a buffer in tests.
    pub fn with_writer(
        name: impl Into<String>,
        writer: Box<dyn Write + Send>,
        formatter: Arc<dyn Formatter>,
    ) -> Self {
        ConsoleHandler {
            name: name.into(),
            formatter,
            writer: Mutex::new(writer),
        }
    }

    pub fn stderr(name: impl Into<String>) -> Self {
        Self::new(name, ConsoleConfig::default(), Arc::new(TextFormatter::default()))
    }
}

impl Handler for ConsoleHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, record: &Record) {
        let mut line = self.formatter.format(record);
        line.push('\n');
        let result = {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writer.write_all(line.as_bytes()).and_then(|()| writer.flush())
        };
        if let Err(e) = result {
            diagnostics::report(&self.name, &HandlerError::Console(e));
        }
    }

    fn flush(&self) {
        let result = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush();
        if let Err(e) = result {
            diagnostics::report(&self.name, &HandlerError::Console(e));
        }
    }
}
