//! Configuration-driven construction of formatters, filters, handlers and
//! the dispatcher that ties them to loggers.
//!
//! Every component is selected by a `class` string and built by a factory
//! registered under that name. The remaining keys of the component's entry
//! are its options and are deserialized into the component's typed config,
//! so misspelled or missing options fail at startup with the option named.

use crate::colorized::{ColorizedConfig, ColorizedFormatter};
use crate::console::{ConsoleConfig, ConsoleHandler};
use crate::dispatch::{Dispatcher, HandlerBinding, Logger};
use crate::embed::{EmbedConfig, EmbedFormatter};
use crate::error::ConfigError;
use crate::filter::{Filter, IgnoreLevels, IgnoreLevelsConfig};
use crate::formatter::{Formatter, TextFormatter, TextFormatterConfig};
use crate::handler::{Handler, NullHandler};
use crate::jsonl::{JsonlConfig, JsonlFormatter};
use crate::jsonl_file::{JsonlFileConfig, JsonlFileHandler};
use crate::record::Level;
use crate::rotating::{DualRotatingHandler, RotatingFileConfig};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Whole logging setup as produced by an external loader.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub formatters: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub filters: BTreeMap<String, ComponentSpec>,
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerSpec>,
    #[serde(default)]
    pub loggers: BTreeMap<String, LoggerSpec>,
    #[serde(default)]
    pub root: Option<LoggerSpec>,
}

/// A formatter or filter entry: its class plus class-specific options.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSpec {
    pub class: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandlerSpec {
    pub class: String,
    #[serde(default)]
    pub level: Option<Level>,
    /// Name of an entry in [`LoggingConfig::formatters`].
    #[serde(default)]
    pub formatter: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerSpec {
    #[serde(default)]
    pub level: Option<Level>,
    #[serde(default)]
    pub handlers: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "default_propagate")]
    pub propagate: bool,
}

fn default_propagate() -> bool {
    true
}

/// A built formatter, by output kind.
#[derive(Clone)]
pub enum FormatterRef {
    /// One line of text per record.
    Text(Arc<dyn Formatter>),
    /// One JSON object per record.
    Structured(Arc<JsonlFormatter>),
    /// A chat embed per record.
    Embed(Arc<EmbedFormatter>),
}

impl FormatterRef {
    /// Line formatter for text-based handlers.
    pub fn text(&self, handler: &str, formatter: &str) -> Result<Arc<dyn Formatter>, ConfigError> {
        match self {
            FormatterRef::Text(f) => Ok(Arc::clone(f)),
            FormatterRef::Structured(f) => Ok(Arc::clone(f) as Arc<dyn Formatter>),
            FormatterRef::Embed(_) => Err(ConfigError::IncompatibleFormatter {
                handler: handler.to_string(),
                formatter: formatter.to_string(),
                reason: "embed formatters only apply to webhook handlers",
            }),
        }
    }
}

/// Formatter resolved for a handler, with the name it was configured under.
pub struct FormatterChoice<'a> {
    pub name: &'a str,
    pub formatter: &'a FormatterRef,
}

pub type HandlerFactory = Box<
    dyn Fn(&str, &Map<String, Value>, Option<FormatterChoice<'_>>) -> Result<Arc<dyn Handler>, ConfigError>
        + Send
        + Sync,
>;
pub type FormatterFactory =
    Box<dyn Fn(&str, &Map<String, Value>) -> Result<FormatterRef, ConfigError> + Send + Sync>;
pub type FilterFactory =
    Box<dyn Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Filter>, ConfigError> + Send + Sync>;

/// Deserialize a component's options into its typed config.
pub fn options<T: DeserializeOwned>(name: &str, options: &Map<String, Value>) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|source| ConfigError::Options {
        name: name.to_string(),
        source,
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

/// Class name → constructor tables.
pub struct Registry {
    handlers: HashMap<String, HandlerFactory>,
    formatters: HashMap<String, FormatterFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl Registry {
    /// A registry with no classes at all.
    pub fn empty() -> Self {
        Registry {
            handlers: HashMap::new(),
            formatters: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        registry.register_formatter("text", |name, opts| {
            let config: TextFormatterConfig = options(name, opts)?;
            Ok(FormatterRef::Text(Arc::new(TextFormatter::new(config)?)))
        });
        registry.register_formatter("colorized", |name, opts| {
            let config: ColorizedConfig = options(name, opts)?;
            Ok(FormatterRef::Text(Arc::new(ColorizedFormatter::new(config)?)))
        });
        registry.register_formatter("jsonl", |name, opts| {
            let config: JsonlConfig = options(name, opts)?;
            Ok(FormatterRef::Structured(Arc::new(JsonlFormatter::new(config)?)))
        });
        registry.register_formatter("discord_embed", |name, opts| {
            let config: EmbedConfig = options(name, opts)?;
            Ok(FormatterRef::Embed(Arc::new(EmbedFormatter::new(config)?)))
        });

        registry.register_filter("ignore_levels", |name, opts| {
            let config: IgnoreLevelsConfig = options(name, opts)?;
            Ok(Arc::new(IgnoreLevels::from(config)))
        });

        registry.register_handler("null", |name, opts, _| {
            let _: NoOptions = options(name, opts)?;
            Ok(Arc::new(NullHandler::new(name)))
        });
        registry.register_handler("console", |name, opts, formatter| {
            let config: ConsoleConfig = options(name, opts)?;
            let formatter = text_formatter(name, formatter)?;
            Ok(Arc::new(ConsoleHandler::new(name, config, formatter)))
        });
        registry.register_handler("rotating_file", |name, opts, formatter| {
            let config: RotatingFileConfig = options(name, opts)?;
            let formatter = text_formatter(name, formatter)?;
            Ok(Arc::new(DualRotatingHandler::new(name, config, formatter)?))
        });
        registry.register_handler("jsonl_file", |name, opts, formatter| {
            let config: JsonlFileConfig = options(name, opts)?;
            let formatter = match formatter {
                None => Arc::new(JsonlFormatter::default()),
                Some(FormatterChoice {
                    formatter: FormatterRef::Structured(f),
                    ..
                }) => Arc::clone(f),
                Some(choice) => {
                    return Err(ConfigError::IncompatibleFormatter {
                        handler: name.to_string(),
                        formatter: choice.name.to_string(),
                        reason: "the JSON-lines handler needs a jsonl formatter",
                    })
                }
            };
            Ok(Arc::new(JsonlFileHandler::new(name, config, formatter)?))
        });
        #[cfg(feature = "discord")]
        registry.register_handler("discord_webhook", |name, opts, formatter| {
            let config: crate::webhook::WebhookConfig = options(name, opts)?;
            let format = entry_format(formatter);
            Ok(Arc::new(crate::webhook::WebhookHandler::discord(name, config, format)?))
        });

        registry
    }

    pub fn register_handler<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(&str, &Map<String, Value>, Option<FormatterChoice<'_>>) -> Result<Arc<dyn Handler>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(class.into(), Box::new(factory));
    }

    pub fn register_formatter<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(&str, &Map<String, Value>) -> Result<FormatterRef, ConfigError> + Send + Sync + 'static,
    {
        self.formatters.insert(class.into(), Box::new(factory));
    }

    pub fn register_filter<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(&str, &Map<String, Value>) -> Result<Arc<dyn Filter>, ConfigError> + Send + Sync + 'static,
    {
        self.filters.insert(class.into(), Box::new(factory));
    }

    /// Build every configured component and wire handlers to loggers.
    pub fn build(&self, config: &LoggingConfig) -> Result<Dispatcher, ConfigError> {
        let mut formatters = HashMap::new();
        for (name, spec) in &config.formatters {
            let factory = self
                .formatters
                .get(&spec.class)
                .ok_or_else(|| ConfigError::UnknownFormatterClass(spec.class.clone()))?;
            formatters.insert(name.as_str(), factory(name, &spec.options)?);
        }

        let mut filters = HashMap::new();
        for (name, spec) in &config.filters {
            let factory = self
                .filters
                .get(&spec.class)
                .ok_or_else(|| ConfigError::UnknownFilterClass(spec.class.clone()))?;
            filters.insert(name.as_str(), factory(name, &spec.options)?);
        }

        let mut bindings = HashMap::new();
        for (name, spec) in &config.handlers {
            let factory = self
                .handlers
                .get(&spec.class)
                .ok_or_else(|| ConfigError::UnknownHandlerClass(spec.class.clone()))?;
            let formatter = match &spec.formatter {
                Some(formatter_name) => {
                    let formatter = formatters.get(formatter_name.as_str()).ok_or_else(|| {
                        ConfigError::UnknownFormatter {
                            handler: name.clone(),
                            formatter: formatter_name.clone(),
                        }
                    })?;
                    Some(FormatterChoice {
                        name: formatter_name,
                        formatter,
                    })
                }
                None => None,
            };

            let mut binding = HandlerBinding::new(factory(name, &spec.options, formatter)?)
                .level(spec.level.unwrap_or(Level::Debug));
            for filter in resolve_filters(name, &spec.filters, &filters)? {
                binding = binding.filter(filter);
            }
            bindings.insert(name.as_str(), binding);
        }

        let mut builder = Dispatcher::builder();
        for (name, spec) in &config.loggers {
            builder = builder.logger(name.clone(), build_logger(name, spec, &bindings, &filters)?);
        }
        if let Some(root) = &config.root {
            builder = builder.root(build_logger("root", root, &bindings, &filters)?);
        }
        Ok(builder.build())
    }
}

/// Build a dispatcher with the built-in classes.
pub fn build_dispatcher(config: &LoggingConfig) -> Result<Dispatcher, ConfigError> {
    Registry::with_builtins().build(config)
}

fn text_formatter(handler: &str, choice: Option<FormatterChoice<'_>>) -> Result<Arc<dyn Formatter>, ConfigError> {
    match choice {
        Some(choice) => choice.formatter.text(handler, choice.name),
        None => Ok(Arc::new(TextFormatter::default())),
    }
}

#[cfg(feature = "discord")]
fn entry_format(choice: Option<FormatterChoice<'_>>) -> crate::embed::EntryFormat {
    use crate::embed::EntryFormat;

    match choice.map(|c| c.formatter) {
        Some(FormatterRef::Embed(f)) => EntryFormat::Embed(Arc::clone(f)),
        Some(FormatterRef::Text(f)) => EntryFormat::Text(Arc::clone(f)),
        Some(FormatterRef::Structured(f)) => EntryFormat::Text(Arc::clone(f) as Arc<dyn Formatter>),
        None => EntryFormat::default(),
    }
}

fn resolve_filters(
    owner: &str,
    names: &[String],
    filters: &HashMap<&str, Arc<dyn Filter>>,
) -> Result<Vec<Arc<dyn Filter>>, ConfigError> {
    names
        .iter()
        .map(|filter| {
            filters
                .get(filter.as_str())
                .cloned()
                .ok_or_else(|| ConfigError::UnknownFilter {
                    owner: owner.to_string(),
                    filter: filter.clone(),
                })
        })
        .collect()
}

fn build_logger(
    name: &str,
    spec: &LoggerSpec,
    bindings: &HashMap<&str, HandlerBinding>,
    filters: &HashMap<&str, Arc<dyn Filter>>,
) -> Result<Logger, ConfigError> {
    let mut logger = Logger::new().propagate(spec.propagate);
    if let Some(level) = spec.level {
        logger = logger.level(level);
    }
    for handler in &spec.handlers {
        let binding = bindings
            .get(handler.as_str())
            .ok_or_else(|| ConfigError::UnknownHandler {
                logger: name.to_string(),
                handler: handler.clone(),
            })?;
        logger = logger.handler(binding.clone());
    }
    for filter in resolve_filters(name, &spec.filters, filters)? {
        logger = logger.filter(filter);
    }
    Ok(logger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> LoggingConfig {
        serde_json::from_value(value).unwrap()
    }

    fn build_err(value: Value) -> ConfigError {
        build_dispatcher(&config(value)).err().unwrap()
    }

    #[test]
    fn unknown_classes_are_rejected() {
        assert!(matches!(
            build_err(json!({ "handlers": { "h": { "class": "smtp" } } })),
            ConfigError::UnknownHandlerClass(c) if c == "smtp"
        ));
        assert!(matches!(
            build_err(json!({ "formatters": { "f": { "class": "xml" } } })),
            ConfigError::UnknownFormatterClass(_)
        ));
        assert!(matches!(
            build_err(json!({ "filters": { "f": { "class": "regex" } } })),
            ConfigError::UnknownFilterClass(_)
        ));
    }

    #[test]
    fn dangling_references_are_rejected() {
        assert!(matches!(
            build_err(json!({ "handlers": { "h": { "class": "null", "formatter": "missing" } } })),
            ConfigError::UnknownFormatter { .. }
        ));
        assert!(matches!(
            build_err(json!({ "handlers": { "h": { "class": "null", "filters": ["missing"] } } })),
            ConfigError::UnknownFilter { .. }
        ));
        assert!(matches!(
            build_err(json!({ "loggers": { "app": { "handlers": ["missing"] } } })),
            ConfigError::UnknownHandler { logger, .. } if logger == "app"
        ));
    }

    #[test]
    fn misspelled_option_names_the_component() {
        let err = build_err(json!({
            "formatters": { "plain": { "class": "text", "fromat": "{message}" } }
        }));
        match err {
            ConfigError::Options { name, source } => {
                assert_eq!(name, "plain");
                assert!(source.to_string().contains("fromat"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn embed_formatter_cannot_drive_a_text_handler() {
        assert!(matches!(
            build_err(json!({
                "formatters": { "embed": { "class": "discord_embed" } },
                "handlers": { "out": { "class": "console", "formatter": "embed" } }
            })),
            ConfigError::IncompatibleFormatter { .. }
        ));
    }

    #[test]
    fn custom_classes_can_be_registered() {
        let mut registry = Registry::empty();
        registry.register_handler("quiet", |name, _, _| Ok(Arc::new(NullHandler::new(name))));
        let dispatcher = registry
            .build(&config(json!({
                "handlers": { "q": { "class": "quiet" } },
                "root": { "handlers": ["q"], "level": "warning" }
            })))
            .unwrap();
        assert_eq!(dispatcher.handlers().len(), 1);
        assert_eq!(dispatcher.effective_level("any"), Level::Warning);
    }
}
