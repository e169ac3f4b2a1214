use crate::record::Record;

/// Destination for [`Record`]s fanned out by the dispatcher.
///
/// Implementations are responsible for formatting and persisting or
/// transmitting records (rotating files, JSON-lines archives, console,
/// chat webhook). Each instance owns its own state and serializes access to
/// it internally, so `emit` may be called from many threads at once.
pub trait Handler: Send + Sync {
    /// Name used to identify this handler in diagnostics.
    fn name(&self) -> &str;

    /// Handle a single record.
    ///
    /// Never fails from the caller's point of view: I/O and delivery errors
    /// are reported through [`crate::diagnostics`] and retried on the next
    /// natural trigger. Must not block on anything slower than local disk.
    fn emit(&self, record: &Record);

    /// Push out anything held in local buffers.
    ///
    /// Default implementation is a no-op.
    fn flush(&self) {}

    /// Release resources. Records emitted afterwards are discarded.
    ///
    /// Default implementation is a no-op.
    fn close(&self) {}
}

/// A handler that simply drops all records.
///
/// Useful for silencing a logger from configuration and for measuring the
/// overhead of dispatch itself.
#[derive(Debug, Clone)]
pub struct NullHandler {
    name: String,
}

impl NullHandler {
    pub fn new(name: impl Into<String>) -> Self {
        NullHandler { name: name.into() }
    }
}

impl Handler for NullHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, _record: &Record) {}
}
