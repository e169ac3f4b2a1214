use crate::error::ConfigError;
use crate::record::Record;
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt::Write as _;

/// Turns a [`Record`] into one line of text. Implementations are pure:
/// the same record always yields the same output.
pub trait Formatter: Send + Sync {
    fn format(&self, record: &Record) -> String;
}

pub const DEFAULT_TEMPLATE: &str = "{timestamp} | {level} | {logger} | {message}";
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed `{attribute}` template.
///
/// Parsing happens once at construction so that a malformed template is a
/// configuration error rather than a per-record surprise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
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
                        return Err(ConfigError::BadTemplate(source.to_string()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.trim().to_string()));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template { segments })
    }

    pub(crate) fn single_field(name: &str) -> Self {
        Template {
            segments: vec![Segment::Field(name.to_string())],
        }
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Render with missing attributes replaced by an empty string.
    pub fn render(&self, record: &Record, date_format: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(&field_value(record, name, date_format)),
            }
        }
        out
    }
}

/// Value for a template field; `timestamp` honours the configured date format.
pub(crate) fn field_value<'a>(record: &'a Record, name: &str, date_format: &str) -> Cow<'a, str> {
    if name == "timestamp" {
        let mut out = String::new();
        if write!(out, "{}", record.timestamp.format(date_format)).is_err() {
            out = record.timestamp.to_rfc3339();
        }
        return Cow::Owned(out);
    }
    record.attribute(name).unwrap_or(Cow::Borrowed(""))
}

/// Reject strftime patterns chrono cannot render.
pub(crate) fn check_date_format(pattern: &str) -> Result<(), ConfigError> {
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::InvalidOption {
            option: "date_format",
            reason: format!("`{pattern}` is not a valid strftime pattern"),
        });
    }
    Ok(())
}

/// Append exception and stack text the way a plain text log expects it.
pub(crate) fn append_traces(line: &mut String, record: &Record) {
    if let Some(exc) = &record.exc_info {
        line.push('\n');
        line.push_str(exc.trim_end());
    }
    if let Some(stack) = &record.stack_info {
        line.push('\n');
        line.push_str(stack.trim_end());
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextFormatterConfig {
    #[serde(default = "default_template")]
    pub format: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

impl Default for TextFormatterConfig {
    fn default() -> Self {
        TextFormatterConfig {
            format: default_template(),
            date_format: default_date_format(),
        }
    }
}

/// Plain human-readable formatter.
#[derive(Debug, Clone)]
pub struct TextFormatter {
    template: Template,
    date_format: String,
}

impl TextFormatter {
    pub fn new(config: TextFormatterConfig) -> Result<Self, ConfigError> {
        check_date_format(&config.date_format)?;
        Ok(TextFormatter {
            template: Template::parse(&config.format)?,
            date_format: config.date_format,
        })
    }

    pub fn with_template(template: &str) -> Result<Self, ConfigError> {
        Self::new(TextFormatterConfig {
            format: template.to_string(),
            ..Default::default()
        })
    }
}

impl Default for TextFormatter {
    fn default() -> Self {
        TextFormatter {
            template: Template {
                segments: vec![
                    Segment::Field("timestamp".into()),
                    Segment::Literal(" | ".into()),
                    Segment::Field("level".into()),
                    Segment::Literal(" | ".into()),
                    Segment::Field("logger".into()),
                    Segment::Literal(" | ".into()),
                    Segment::Field("message".into()),
                ],
            },
            date_format: default_date_format(),
        }
    }
}

impl Formatter for TextFormatter {
    fn format(&self, record: &Record) -> String {
        let mut line = self.template.render(record, &self.date_format);
        append_traces(&mut line, record);
        line
    }
}
