use crate::diagnostics::DIAGNOSTICS_TARGET;
use crate::dispatch::Dispatcher;
use crate::layer::DispatchLayer;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

pub use tracing::subscriber::SetGlobalDefaultError;

/// Options for [`init_tracing_with_config`].
///
/// **Fields**
/// - `diagnostics`: print handler failures reported under
///   [`DIAGNOSTICS_TARGET`] to stderr.
/// - `diagnostics_level`: lowest diagnostic level printed.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    pub diagnostics: bool,
    pub diagnostics_level: LevelFilter,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            diagnostics: true,
            diagnostics_level: LevelFilter::WARN,
        }
    }
}

fn diagnostics_layer<S>(level: LevelFilter) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(Targets::new().with_target(DIAGNOSTICS_TARGET, level))
}

/// Install a global subscriber that only prints this crate's diagnostics
/// to stderr. Use it when records are submitted through
/// [`crate::dispatch::log`] rather than through `tracing`.
pub fn init_diagnostics() -> Result<(), SetGlobalDefaultError> {
    let subscriber = Registry::default().with(diagnostics_layer(TracingConfig::default().diagnostics_level));
    tracing::subscriber::set_global_default(subscriber)
}

/// Install a [`Registry`] with a [`DispatchLayer`] feeding `dispatcher` as the
/// global default subscriber, so every `tracing` event in the process is
/// offered to the configured handlers.
pub fn init_tracing_with_config(
    dispatcher: Arc<Dispatcher>,
    config: TracingConfig,
) -> Result<(), SetGlobalDefaultError> {
    let layer = DispatchLayer::new(dispatcher);

    // Two subscriber shapes, one per branch, to keep the layer types concrete.
    if config.diagnostics {
        let subscriber = Registry::default()
            .with(layer)
            .with(diagnostics_layer(config.diagnostics_level));
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default().with(layer);
        tracing::subscriber::set_global_default(subscriber)
    }
}

/// Equivalent to [`init_tracing_with_config`] with [`TracingConfig::default`].
pub fn init_tracing(dispatcher: Arc<Dispatcher>) -> Result<(), SetGlobalDefaultError> {
    init_tracing_with_config(dispatcher, TracingConfig::default())
}
