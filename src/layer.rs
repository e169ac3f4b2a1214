use crate::diagnostics::DIAGNOSTICS_TARGET;
use crate::dispatch::Dispatcher;
use crate::record::{Level, Record};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that turns events into [`Record`]s and hands
/// them to a [`Dispatcher`].
///
/// The event target becomes the logger name (`app::db` → `app.db`), the
/// `message` field the message and every other field an extra field.
/// Events emitted by the handlers themselves on [`DIAGNOSTICS_TARGET`] are
/// never forwarded.
pub struct DispatchLayer {
    dispatcher: Arc<Dispatcher>,
    /// Total events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Events handed to the dispatcher.
    pub forwarded_events: Arc<AtomicU64>,
}

impl DispatchLayer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        DispatchLayer {
            dispatcher,
            total_events: Arc::new(AtomicU64::new(0)),
            forwarded_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Map a `tracing` level onto the record severity scale.
pub fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::ERROR => Level::Error,
        tracing::Level::WARN => Level::Warning,
        tracing::Level::INFO => Level::Info,
        _ => Level::Debug,
    }
}

/// Dotted logger name for a `tracing` target.
pub fn logger_name(target: &str) -> String {
    target.replace("::", ".")
}

impl<S> Layer<S> for DispatchLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if meta.target().starts_with(DIAGNOSTICS_TARGET) {
            return;
        }

        let level = map_level(meta.level());
        let logger = logger_name(meta.target());
        if !self.dispatcher.is_enabled_for(&logger, level) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
        };
        event.record(&mut visitor);

        let mut record = Record::new(level, logger, message.unwrap_or_default());
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            record = record.with_location(file, line);
        }
        if let Some(module) = meta.module_path() {
            record = record.with_module(module);
        }
        record.extra = fields;

        self.dispatcher.dispatch(&record);
        self.forwarded_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Collects event fields into JSON values, keeping `message` apart.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), Value::String(format!("{:?}", value)));
        }
    }
}
