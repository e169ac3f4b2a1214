use crate::error::ConfigError;
use crate::formatter::Formatter;
use crate::record::{is_known_attribute, Record};
use chrono::SecondsFormat;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Keys every structured line carries. Extra fields never replace them.
pub const REQUIRED_KEYS: &[&str] = &["timestamp", "level", "logger", "message", "location"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonlConfig {
    /// Additional output keys mapped to record attributes,
    /// e.g. `"thread": "thread_name"`.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// One JSON object per record, suitable for line-delimited archives.
#[derive(Debug, Clone, Default)]
pub struct JsonlFormatter {
    fields: BTreeMap<String, String>,
}

impl JsonlFormatter {
    pub fn new(config: JsonlConfig) -> Result<Self, ConfigError> {
        for attribute in config.fields.values() {
            if !is_known_attribute(attribute) {
                return Err(ConfigError::UnknownAttribute(attribute.clone()));
            }
        }
        Ok(JsonlFormatter {
            fields: config.fields,
        })
    }

    /// Build the structured object for `record`.
    pub fn to_value(&self, record: &Record) -> Map<String, Value> {
        let mut object = Map::new();
        object.insert(
            "timestamp".into(),
            Value::String(record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        object.insert("level".into(), Value::String(record.level.to_string()));
        object.insert("logger".into(), Value::String(record.logger.clone()));
        object.insert(
            "message".into(),
            Value::String(record.rendered_message().into_owned()),
        );
        object.insert(
            "location".into(),
            json!({
                "file": record.location.file,
                "line": record.location.line,
                "function": record.location.function,
                "module": record.location.module,
            }),
        );
        if let Some(exc) = &record.exc_info {
            object.insert("exc_info".into(), Value::String(exc.clone()));
        }
        if let Some(stack) = &record.stack_info {
            object.insert("stack_info".into(), Value::String(stack.clone()));
        }

        for (key, attribute) in &self.fields {
            if object.contains_key(key) {
                continue;
            }
            let value = record
                .attribute(attribute)
                .map(|v| Value::String(v.into_owned()))
                .unwrap_or(Value::Null);
            object.insert(key.clone(), value);
        }

        for (key, value) in &record.extra {
            if !object.contains_key(key) {
                object.insert(key.clone(), value.clone());
            }
        }

        object
    }
}

impl Formatter for JsonlFormatter {
    fn format(&self, record: &Record) -> String {
        // serde_json escapes control characters, so the output never
        // contains a raw newline.
        Value::Object(self.to_value(record)).to_string()
    }
}
