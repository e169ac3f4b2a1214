use crate::error::ConfigError;
use crate::formatter::{
    append_traces, check_date_format, field_value, Formatter, Segment, Template,
    DEFAULT_DATE_FORMAT, DEFAULT_TEMPLATE,
};
use crate::record::{Level, Record};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const RESET: &str = "\x1b[0m";

/// Named ANSI foreground colors understood by [`ColorizedFormatter`].
pub const COLORS: &[(&str, &str)] = &[
    ("black", "\x1b[30m"),
    ("red", "\x1b[31m"),
    ("green", "\x1b[32m"),
    ("yellow", "\x1b[33m"),
    ("blue", "\x1b[34m"),
    ("magenta", "\x1b[35m"),
    ("cyan", "\x1b[36m"),
    ("white", "\x1b[37m"),
];

fn color_code(name: &str) -> Option<&'static str> {
    COLORS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}

fn default_level_colors() -> BTreeMap<Level, String> {
    BTreeMap::from([
        (Level::Debug, "blue".to_string()),
        (Level::Info, "cyan".to_string()),
        (Level::Warning, "yellow".to_string()),
        (Level::Error, "red".to_string()),
        (Level::Critical, "magenta".to_string()),
    ])
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorizedConfig {
    #[serde(default = "default_template")]
    pub format: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Color per level. Levels left out are printed unstyled.
    #[serde(default = "default_level_colors")]
    pub level_colors: BTreeMap<Level, String>,
    /// Extra color per template attribute, e.g. `"logger": "green"`.
    #[serde(default)]
    pub field_colors: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub use_ansi: bool,
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ColorizedConfig {
    fn default() -> Self {
        ColorizedConfig {
            format: default_template(),
            date_format: default_date_format(),
            level_colors: default_level_colors(),
            field_colors: BTreeMap::new(),
            use_ansi: true,
        }
    }
}

/// Terminal formatter: the whole line takes the level's color, individual
/// attributes may override it, and the style is reset at the end of the line.
#[derive(Debug, Clone)]
pub struct ColorizedFormatter {
    template: Template,
    date_format: String,
    level_colors: BTreeMap<Level, &'static str>,
    field_colors: BTreeMap<String, &'static str>,
    use_ansi: bool,
}

impl ColorizedFormatter {
    pub fn new(config: ColorizedConfig) -> Result<Self, ConfigError> {
        check_date_format(&config.date_format)?;
        let resolve = |name: &str| {
            color_code(name).ok_or_else(|| ConfigError::UnknownColor {
                color: name.to_string(),
                available: COLORS.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(", "),
            })
        };

        let mut level_colors = BTreeMap::new();
        for (level, name) in &config.level_colors {
            level_colors.insert(*level, resolve(name)?);
        }
        let mut field_colors = BTreeMap::new();
        for (field, name) in &config.field_colors {
            field_colors.insert(field.clone(), resolve(name)?);
        }

        Ok(ColorizedFormatter {
            template: Template::parse(&config.format)?,
            date_format: config.date_format,
            level_colors,
            field_colors,
            use_ansi: config.use_ansi,
        })
    }
}

impl Formatter for ColorizedFormatter {
    fn format(&self, record: &Record) -> String {
        if !self.use_ansi {
            let mut line = self.template.render(record, &self.date_format);
            append_traces(&mut line, record);
            return line;
        }

        let line_style = self.level_colors.get(&record.level).copied().unwrap_or("");
        let mut out = String::from(line_style);

        for segment in self.template.segments() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = field_value(record, name, &self.date_format);
                    match self.field_colors.get(name) {
                        Some(color) => {
                            out.push_str(color);
                            out.push_str(&value);
                            out.push_str(RESET);
                            out.push_str(line_style);
                        }
                        None => out.push_str(&value),
                    }
                }
            }
        }

        append_traces(&mut out, record);
        out.push_str(RESET);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter(config: ColorizedConfig) -> ColorizedFormatter {
        ColorizedFormatter::new(config).unwrap()
    }

    #[test]
    fn wraps_line_in_level_color() {
        let fmt = formatter(ColorizedConfig {
            format: "{level}: {message}".into(),
            ..Default::default()
        });
        let record = Record::new(Level::Error, "app", "disk full");
        assert_eq!(fmt.format(&record), "\x1b[31mERROR: disk full\x1b[0m");
    }

    #[test]
    fn field_color_restores_line_style() {
        let fmt = formatter(ColorizedConfig {
            format: "{logger} {message}".into(),
            field_colors: BTreeMap::from([("logger".to_string(), "green".to_string())]),
            ..Default::default()
        });
        let record = Record::new(Level::Warning, "db", "slow");
        assert_eq!(
            fmt.format(&record),
            "\x1b[33m\x1b[32mdb\x1b[0m\x1b[33m slow\x1b[0m"
        );
    }

    #[test]
    fn missing_fields_are_empty_not_errors() {
        let fmt = formatter(ColorizedConfig {
            format: "{function}{message}".into(),
            use_ansi: false,
            ..Default::default()
        });
        assert_eq!(fmt.format(&Record::new(Level::Info, "a", "hi")), "hi");
    }

    #[test]
    fn unstyled_level_has_no_prefix() {
        let fmt = formatter(ColorizedConfig {
            format: "{message}".into(),
            level_colors: BTreeMap::new(),
            ..Default::default()
        });
        assert_eq!(fmt.format(&Record::new(Level::Info, "a", "hi")), "hi\x1b[0m");
    }

    #[test]
    fn bad_date_format_is_rejected() {
        let err = ColorizedFormatter::new(ColorizedConfig {
            date_format: "%Y-%Q".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { option: "date_format", .. }));
    }

    #[test]
    fn unknown_color_is_a_config_error() {
        let err = ColorizedFormatter::new(ColorizedConfig {
            field_colors: BTreeMap::from([("logger".to_string(), "chartreuse".to_string())]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownColor { ref color, .. } if color == "chartreuse"));
    }
}
