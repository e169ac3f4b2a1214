//! Named loggers and the fan-out of records to their handlers.
//!
//! Logger names form a dotted hierarchy. A record logged to `app.db.pool` is
//! offered to the handlers of `app.db.pool`, `app.db`, `app` and finally the
//! root logger, stopping early at a logger configured with
//! `propagate = false`.

use crate::filter::Filter;
use crate::handler::Handler;
use crate::record::{Level, Record};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Name under which the root logger can be addressed.
pub const ROOT_LOGGER: &str = "root";

/// A handler attached to a logger, with its own threshold and filters.
#[derive(Clone)]
pub struct HandlerBinding {
    handler: Arc<dyn Handler>,
    level: Level,
    filters: Vec<Arc<dyn Filter>>,
}

impl HandlerBinding {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        HandlerBinding {
            handler,
            level: Level::Debug,
            filters: Vec::new(),
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    fn accepts(&self, record: &Record) -> bool {
        record.level >= self.level && self.filters.iter().all(|f| f.allows(record))
    }
}

/// Settings of one named logger.
#[derive(Clone)]
pub struct Logger {
    level: Option<Level>,
    propagate: bool,
    handlers: Vec<HandlerBinding>,
    filters: Vec<Arc<dyn Filter>>,
}

impl Default for Logger {
    fn default() -> Self {
        Logger {
            level: None,
            propagate: true,
            handlers: Vec::new(),
            filters: Vec::new(),
        }
    }
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    pub fn handler(mut self, binding: HandlerBinding) -> Self {
        self.handlers.push(binding);
        self
    }

    /// Filters applied to records logged directly to this logger.
    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    root: Logger,
    loggers: HashMap<String, Logger>,
}

impl DispatcherBuilder {
    pub fn root(mut self, root: Logger) -> Self {
        self.root = root;
        self
    }

    /// Configure a named logger. `"root"` or `""` replaces the root logger.
    pub fn logger(mut self, name: impl Into<String>, logger: Logger) -> Self {
        let name = name.into();
        if name.is_empty() || name == ROOT_LOGGER {
            self.root = logger;
        } else {
            self.loggers.insert(name, logger);
        }
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut root = self.root;
        root.level.get_or_insert(Level::Debug);
        Dispatcher {
            root,
            loggers: self.loggers,
            closed: AtomicBool::new(false),
        }
    }
}

/// Routes records to the handlers of their logger and its ancestors.
pub struct Dispatcher {
    root: Logger,
    loggers: HashMap<String, Logger>,
    closed: AtomicBool,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Configured loggers from `name` up to the root, most specific first.
    fn lineage<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a str, &'a Logger)> + 'a {
        let mut next = (!name.is_empty() && name != ROOT_LOGGER).then_some(name);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.rfind('.').map(|i| &current[..i]);
            Some(current)
        })
        .filter_map(move |n| self.loggers.get(n).map(|logger| (n, logger)))
        .chain(std::iter::once((ROOT_LOGGER, &self.root)))
    }

    /// Level of the nearest logger in the hierarchy that sets one.
    pub fn effective_level(&self, name: &str) -> Level {
        self.lineage(name)
            .find_map(|(_, logger)| logger.level)
            .unwrap_or(Level::Debug)
    }

    pub fn is_enabled_for(&self, name: &str, level: Level) -> bool {
        !self.closed.load(Ordering::Acquire) && level >= self.effective_level(name)
    }

    /// Offer `record` to every handler along its logger's lineage.
    pub fn dispatch(&self, record: &Record) {
        if !self.is_enabled_for(&record.logger, record.level) {
            return;
        }

        let origin = match record.logger.as_str() {
            "" => ROOT_LOGGER,
            name => name,
        };
        for (name, logger) in self.lineage(&record.logger) {
            // Logger filters only see records logged directly to them.
            if name == origin && !logger.filters.iter().all(|f| f.allows(record)) {
                return;
            }
            for binding in &logger.handlers {
                if binding.accepts(record) {
                    binding.handler.emit(record);
                }
            }
            if !logger.propagate {
                break;
            }
        }
    }

    /// Every attached handler, each listed once even if bound to several
    /// loggers.
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        let mut seen: Vec<Arc<dyn Handler>> = Vec::new();
        let bindings = std::iter::once(&self.root)
            .chain(self.loggers.values())
            .flat_map(|logger| logger.handlers.iter());
        for binding in bindings {
            if !seen.iter().any(|h| Arc::ptr_eq(h, &binding.handler)) {
                seen.push(Arc::clone(&binding.handler));
            }
        }
        seen
    }

    pub fn flush(&self) {
        for handler in self.handlers() {
            handler.flush();
        }
    }

    /// Flush and close every handler once. Later records are ignored.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handler in self.handlers() {
            handler.flush();
            handler.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("a global log dispatcher is already installed")]
pub struct AlreadyInstalled;

static GLOBAL: OnceLock<Arc<Dispatcher>> = OnceLock::new();

/// Install the process-wide dispatcher. Only the first call succeeds.
pub fn install(dispatcher: Arc<Dispatcher>) -> Result<(), AlreadyInstalled> {
    GLOBAL.set(dispatcher).map_err(|_| AlreadyInstalled)
}

pub fn global() -> Option<&'static Arc<Dispatcher>> {
    GLOBAL.get()
}

/// Submit a record to the global dispatcher. A no-op before `install` and
/// after `shutdown`.
pub fn log(record: Record) {
    if let Some(dispatcher) = GLOBAL.get() {
        dispatcher.dispatch(&record);
    }
}

/// Flush and close all handlers of the global dispatcher.
pub fn shutdown() {
    if let Some(dispatcher) = GLOBAL.get() {
        dispatcher.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::IgnoreLevels;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        name: String,
        seen: Mutex<Vec<String>>,
        closes: Mutex<u32>,
    }

    impl Capture {
        fn named(name: &str) -> Arc<Self> {
            Arc::new(Capture {
                name: name.into(),
                ..Default::default()
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Handler for Capture {
        fn name(&self) -> &str {
            &self.name
        }

        fn emit(&self, record: &Record) {
            self.seen
                .lock()
                .unwrap()
                .push(record.rendered_message().into_owned());
        }

        fn close(&self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    fn record(logger: &str, level: Level, message: &str) -> Record {
        Record::new(level, logger, message)
    }

    #[test]
    fn records_propagate_to_ancestors() {
        let app = Capture::named("app");
        let root = Capture::named("root");
        let dispatcher = Dispatcher::builder()
            .logger("app", Logger::new().handler(HandlerBinding::new(app.clone())))
            .root(Logger::new().handler(HandlerBinding::new(root.clone())))
            .build();

        dispatcher.dispatch(&record("app.db.pool", Level::Info, "connected"));
        dispatcher.dispatch(&record("other", Level::Info, "hello"));

        assert_eq!(app.seen(), vec!["connected"]);
        assert_eq!(root.seen(), vec!["connected", "hello"]);
    }

    #[test]
    fn propagate_false_stops_the_walk() {
        let app = Capture::named("app");
        let root = Capture::named("root");
        let dispatcher = Dispatcher::builder()
            .logger(
                "app",
                Logger::new()
                    .propagate(false)
                    .handler(HandlerBinding::new(app.clone())),
            )
            .root(Logger::new().handler(HandlerBinding::new(root.clone())))
            .build();

        dispatcher.dispatch(&record("app.web", Level::Warning, "slow"));
        assert_eq!(app.seen(), vec!["slow"]);
        assert!(root.seen().is_empty());
    }

    #[test]
    fn effective_level_is_nearest_configured() {
        let dispatcher = Dispatcher::builder()
            .logger("app", Logger::new().level(Level::Warning))
            .logger("app.debugged", Logger::new().level(Level::Debug))
            .logger("app.quiet", Logger::new())
            .build();

        assert_eq!(dispatcher.effective_level("app.quiet.x"), Level::Warning);
        assert_eq!(dispatcher.effective_level("app.debugged.x"), Level::Debug);
        assert_eq!(dispatcher.effective_level("unrelated"), Level::Debug);
    }

    #[test]
    fn handler_level_and_filters_apply_per_binding() {
        let errors = Capture::named("errors");
        let no_info = Capture::named("no-info");
        let dispatcher = Dispatcher::builder()
            .root(
                Logger::new()
                    .handler(HandlerBinding::new(errors.clone()).level(Level::Error))
                    .handler(
                        HandlerBinding::new(no_info.clone())
                            .filter(Arc::new(IgnoreLevels::new([Level::Info]))),
                    ),
            )
            .build();

        for level in Level::ALL {
            dispatcher.dispatch(&record("x", level, level.as_str()));
        }
        assert_eq!(errors.seen(), vec!["ERROR", "CRITICAL"]);
        assert_eq!(no_info.seen(), vec!["DEBUG", "WARNING", "ERROR", "CRITICAL"]);
    }

    #[test]
    fn logger_filters_only_apply_at_origin() {
        let root = Capture::named("root");
        let dispatcher = Dispatcher::builder()
            .logger(
                "app",
                Logger::new().filter(Arc::new(IgnoreLevels::new([Level::Debug]))),
            )
            .root(Logger::new().handler(HandlerBinding::new(root.clone())))
            .build();

        dispatcher.dispatch(&record("app", Level::Debug, "filtered"));
        dispatcher.dispatch(&record("app.child", Level::Debug, "passes"));
        assert_eq!(root.seen(), vec!["passes"]);
    }

    #[test]
    fn close_reaches_shared_handlers_once() {
        let shared = Capture::named("shared");
        let dispatcher = Dispatcher::builder()
            .logger("a", Logger::new().handler(HandlerBinding::new(shared.clone())))
            .logger("b", Logger::new().handler(HandlerBinding::new(shared.clone())))
            .root(Logger::new().handler(HandlerBinding::new(shared.clone())))
            .build();

        assert_eq!(dispatcher.handlers().len(), 1);
        dispatcher.close();
        dispatcher.close();
        assert_eq!(*shared.closes.lock().unwrap(), 1);

        dispatcher.dispatch(&record("a", Level::Critical, "late"));
        assert!(shared.seen().is_empty());
    }
}
