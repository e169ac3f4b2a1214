use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Severity of a [`Record`]. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub const ALL: [Level; 5] = [
        Level::Debug,
        Level::Info,
        Level::Warning,
        Level::Error,
        Level::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }

    /// Numeric value compatible with the conventional 10..50 scale.
    pub fn value(&self) -> u8 {
        match self {
            Level::Debug => 10,
            Level::Info => 20,
            Level::Warning => 30,
            Level::Error => 40,
            Level::Critical => 50,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown level `{0}` (expected DEBUG, INFO, WARNING, ERROR or CRITICAL)")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" | "FATAL" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = ParseLevelError;

    fn try_from(value: String) -> Result<Self, ParseLevelError> {
        value.parse()
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}

/// Message template plus substitution values, rendered on demand.
///
/// `{}` consumes the next positional argument, `{name}` looks up a keyword
/// argument and `{{` / `}}` produce literal braces. Placeholders without a
/// matching value are kept as written. A message without values is plain
/// text and renders verbatim, braces included.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub template: String,
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl Message {
    pub fn new(template: impl Into<String>) -> Self {
        Message {
            template: template.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn render(&self) -> Cow<'_, str> {
        if self.args.is_empty() && self.kwargs.is_empty() {
            return Cow::Borrowed(&self.template);
        }

        let mut out = String::with_capacity(self.template.len());
        let mut positional = self.args.iter();
        let mut chars = self.template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        out.push('{');
                        out.push_str(&name);
                        break;
                    }
                    let value = if name.is_empty() {
                        positional.next()
                    } else {
                        self.kwargs.get(&name)
                    };
                    match value {
                        Some(v) => out.push_str(&value_to_text(v)),
                        None => {
                            out.push('{');
                            out.push_str(&name);
                            out.push('}');
                        }
                    }
                }
                other => out.push(other),
            }
        }

        Cow::Owned(out)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::new(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::new(s)
    }
}

/// Text form of a JSON value as it should appear inside human-readable output.
pub fn value_to_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

/// Where in the program a record was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub module: Option<String>,
}

/// Identity of the thread that created a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: String,
    pub name: Option<String>,
}

impl ThreadInfo {
    pub fn current() -> Self {
        let thread = std::thread::current();
        ThreadInfo {
            id: format!("{:?}", thread.id()),
            name: thread.name().map(str::to_string),
        }
    }
}

/// Attribute names every record can resolve, besides its extra fields.
pub const BUILTIN_ATTRIBUTES: &[&str] = &[
    "logger",
    "level",
    "level_no",
    "message",
    "timestamp",
    "file",
    "file_name",
    "line",
    "function",
    "module",
    "thread_id",
    "thread_name",
    "process_id",
    "exc_info",
    "stack_info",
];

/// Prefix that addresses an extra field explicitly, e.g. `extra.request_id`.
pub const EXTRA_PREFIX: &str = "extra.";

/// Returns true when `name` can be resolved by [`Record::attribute`] without
/// depending on the extra fields of a particular record.
pub fn is_known_attribute(name: &str) -> bool {
    BUILTIN_ATTRIBUTES.contains(&name) || name.starts_with(EXTRA_PREFIX)
}

/// One log event. Handlers receive it by reference and never mutate it.
#[derive(Debug, Clone)]
pub struct Record {
    pub level: Level,
    pub logger: String,
    pub message: Message,
    pub timestamp: DateTime<Utc>,
    pub location: SourceLocation,
    pub thread: ThreadInfo,
    pub process_id: u32,
    pub exc_info: Option<String>,
    pub stack_info: Option<String>,
    pub extra: BTreeMap<String, Value>,
    /// Asks buffering handlers to deliver as soon as their rate limit allows.
    pub urgent: bool,
}

impl Record {
    /// Capture a record on the current thread at the current instant.
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<Message>) -> Self {
        Record {
            level,
            logger: logger.into(),
            message: message.into(),
            timestamp: Utc::now(),
            location: SourceLocation::default(),
            thread: ThreadInfo::current(),
            process_id: std::process::id(),
            exc_info: None,
            stack_info: None,
            extra: BTreeMap::new(),
            urgent: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.location.file = Some(file.into());
        self.location.line = Some(line);
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.location.function = Some(function.into());
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.location.module = Some(module.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_exc_info(mut self, text: impl Into<String>) -> Self {
        self.exc_info = Some(text.into());
        self
    }

    pub fn with_stack_info(mut self, text: impl Into<String>) -> Self {
        self.stack_info = Some(text.into());
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub fn rendered_message(&self) -> Cow<'_, str> {
        self.message.render()
    }

    /// Resolve a named attribute to text. `None` means the record has no
    /// value for it; callers decide on the substitute.
    pub fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            "logger" => Some(Cow::Borrowed(self.logger.as_str())),
            "level" => Some(Cow::Borrowed(self.level.as_str())),
            "level_no" => Some(Cow::Owned(self.level.value().to_string())),
            "message" => Some(self.rendered_message()),
            "timestamp" => Some(Cow::Owned(self.timestamp.to_rfc3339())),
            "file" => self.location.file.as_deref().map(Cow::Borrowed),
            "file_name" => self.location.file.as_deref().map(|f| {
                let base = f.rsplit(['/', '\\']).next().unwrap_or(f);
                Cow::Borrowed(base)
            }),
            "line" => self.location.line.map(|l| Cow::Owned(l.to_string())),
            "function" => self.location.function.as_deref().map(Cow::Borrowed),
            "module" => self.location.module.as_deref().map(Cow::Borrowed),
            "thread_id" => Some(Cow::Borrowed(self.thread.id.as_str())),
            "thread_name" => self.thread.name.as_deref().map(Cow::Borrowed),
            "process_id" => Some(Cow::Owned(self.process_id.to_string())),
            "exc_info" => self.exc_info.as_deref().map(Cow::Borrowed),
            "stack_info" => self.stack_info.as_deref().map(Cow::Borrowed),
            other => {
                let key = other.strip_prefix(EXTRA_PREFIX).unwrap_or(other);
                self.extra.get(key).map(value_to_text)
            }
        }
    }
}
