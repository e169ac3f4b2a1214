//! Internal error channel for handlers.
//!
//! Handler failures never propagate into application code. They are emitted
//! as `tracing` events under [`DIAGNOSTICS_TARGET`] so operators can route them
//! to a low-noise stream (see [`crate::init::init_diagnostics`]) and so the
//! dispatch bridge can refuse to feed them back into the handlers.

use crate::error::HandlerError;

/// `tracing` target used for every diagnostic emitted by this crate.
pub const DIAGNOSTICS_TARGET: &str = "log_relay::diagnostics";

/// Report a recoverable handler failure.
pub fn report(handler: &str, error: &HandlerError) {
    match error {
        HandlerError::Closed | HandlerError::QueueFull => {
            tracing::warn!(target: DIAGNOSTICS_TARGET, handler, error = %error, "log record not accepted");
        }
        _ => {
            tracing::error!(target: DIAGNOSTICS_TARGET, handler, error = %error, "log handler failure");
        }
    }
}

/// Report that `count` buffered records were evicted since the last notice.
pub fn report_dropped(handler: &str, count: u64) {
    tracing::warn!(
        target: DIAGNOSTICS_TARGET,
        handler,
        dropped = count,
        "log handler dropped oldest buffered records"
    );
}
