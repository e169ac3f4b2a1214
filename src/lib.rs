pub mod record;
pub mod error;
pub mod diagnostics;

pub mod formatter;
pub mod colorized;
pub mod jsonl;
pub mod embed;

pub mod handler;
pub mod filter;
mod file;
pub mod rotation;
pub mod rotating;
pub mod jsonl_file;
pub mod console;

pub mod transport;
mod webhook_buffer;
pub mod webhook;

#[cfg(feature = "discord")]
pub mod discord;

pub mod dispatch;
pub mod registry;
pub mod layer;
pub mod init;

pub use dispatch::{Dispatcher, HandlerBinding, Logger};
pub use error::{ConfigError, DeliveryError, HandlerError};
pub use file::{FileMode, FlushPolicy};
pub use handler::Handler;
pub use record::{Level, Message, Record};
pub use registry::{build_dispatcher, LoggingConfig, Registry};
