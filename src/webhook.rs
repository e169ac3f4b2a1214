//! Buffered, rate-limited delivery of log records to a chat webhook.
//!
//! `emit` formats the record on the calling thread and hands the entry to a
//! dedicated worker thread through a bounded channel. The worker owns the
//! [`DeliveryBuffer`], decides when to flush, packs entries into as few
//! requests as the platform limits allow and spaces requests by the
//! throttle limit. A failed request leaves its entries queued for the next
//! trigger.

use crate::diagnostics;
use crate::embed::{pack_payload, EntryFormat, WebhookEntry};
use crate::error::{ConfigError, DeliveryError, HandlerError};
use crate::handler::Handler;
use crate::record::Record;
use crate::transport::WebhookTransport;
use crate::webhook_buffer::DeliveryBuffer;
use serde::{de, Deserialize, Deserializer};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_BASE_URL: &str = "https://discord.com";

const PROXY_SCHEMES: &[&str] = &["http://", "https://", "socks5://"];

/// Options recognized by [`WebhookHandler`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub webhook_id: String,
    pub webhook_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `http://`, `https://` or `socks5://` proxy URL.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Buffered entries that trigger a flush.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_flush_interval", deserialize_with = "seconds")]
    pub flush_interval: Duration,
    /// Minimum spacing between outbound requests.
    #[serde(default = "default_throttle_limit", deserialize_with = "seconds")]
    pub throttle_limit: Duration,
    #[serde(default)]
    pub flush_on_close: bool,
    #[serde(default = "default_request_timeout", deserialize_with = "seconds")]
    pub request_timeout: Duration,
    /// Retention bound while deliveries fail; defaults to ten times
    /// `capacity`.
    #[serde(default)]
    pub max_pending: Option<usize>,
    /// Records accepted from `emit` but not yet seen by the worker.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_capacity() -> usize {
    100
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_throttle_limit() -> Duration {
    Duration::from_secs(1)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_queue_size() -> usize {
    1024
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(value).map_err(|_| {
        de::Error::custom(format!(
            "expected a non-negative number of seconds, got {value}"
        ))
    })
}

impl WebhookConfig {
    pub fn new(webhook_id: impl Into<String>, webhook_token: impl Into<String>) -> Self {
        WebhookConfig {
            webhook_id: webhook_id.into(),
            webhook_token: webhook_token.into(),
            base_url: default_base_url(),
            proxy: None,
            capacity: default_capacity(),
            flush_interval: default_flush_interval(),
            throttle_limit: default_throttle_limit(),
            flush_on_close: false,
            request_timeout: default_request_timeout(),
            max_pending: None,
            queue_size: default_queue_size(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_id.trim().is_empty() {
            return Err(ConfigError::MissingOption("webhook_id"));
        }
        if self.webhook_token.trim().is_empty() {
            return Err(ConfigError::MissingOption("webhook_token"));
        }
        if self.capacity == 0 {
            return Err(invalid("capacity", "must be a positive integer"));
        }
        if self.flush_interval.is_zero() {
            return Err(invalid("flush_interval", "must be a positive number of seconds"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout", "must be a positive number of seconds"));
        }
        if self.queue_size == 0 {
            return Err(invalid("queue_size", "must be a positive integer"));
        }
        if let Some(max) = self.max_pending {
            if max < self.capacity {
                return Err(invalid("max_pending", "must not be smaller than capacity"));
            }
        }
        if let Some(proxy) = &self.proxy {
            if !PROXY_SCHEMES.iter().any(|scheme| proxy.starts_with(scheme)) {
                return Err(invalid(
                    "proxy",
                    &format!("must start with one of {}", PROXY_SCHEMES.join(", ")),
                ));
            }
        }
        Ok(())
    }

    pub fn effective_max_pending(&self) -> usize {
        self.max_pending
            .unwrap_or_else(|| self.capacity.saturating_mul(10))
    }
}

fn invalid(option: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidOption {
        option,
        reason: reason.to_string(),
    }
}

/// Lifecycle of a [`WebhookHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookState {
    /// Accepting records.
    Open,
    /// A request is in flight.
    Flushing,
    /// Terminal; records are rejected.
    Closed,
}

impl WebhookState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WebhookState::Open,
            1 => WebhookState::Flushing,
            _ => WebhookState::Closed,
        }
    }
}

/// Counters since the handler was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WebhookStats {
    /// Outbound requests attempted.
    pub requests: u64,
    /// Requests that failed or timed out.
    pub failed: u64,
    /// Entries the remote side accepted.
    pub delivered: u64,
    /// Buffered entries evicted by the retention bound.
    pub dropped: u64,
    /// Records refused by `emit` (full queue or closed handler).
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: AtomicU8,
    requests: AtomicU64,
    failed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: WebhookState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

enum Command {
    Entry { entry: WebhookEntry, urgent: bool },
    Flush(std_mpsc::SyncSender<()>),
}

/// Handler that batches records into chat webhook messages.
pub struct WebhookHandler {
    name: String,
    format: EntryFormat,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
    shared: Arc<Shared>,
    flush_wait: Duration,
}

impl WebhookHandler {
    /// Create the handler and start its delivery worker.
    ///
    /// **Returns**
    /// - `Err(ConfigError)` if an option is invalid or the worker thread
    ///   could not be started.
    pub fn new(
        name: impl Into<String>,
        config: WebhookConfig,
        format: EntryFormat,
        transport: Arc<dyn WebhookTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let name = name.into();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConfigError::Worker)?;
        let (tx, rx) = mpsc::channel::<Command>(config.queue_size);
        let shared = Arc::new(Shared::default());

        let worker = Worker {
            name: name.clone(),
            buffer: DeliveryBuffer::new(
                config.capacity,
                config.effective_max_pending(),
                config.flush_interval,
                config.throttle_limit,
                Instant::now(),
            ),
            transport,
            request_timeout: config.request_timeout,
            flush_on_close: config.flush_on_close,
            shared: Arc::clone(&shared),
        };
        let handle = std::thread::Builder::new()
            .name(format!("log-relay-{name}"))
            .spawn(move || runtime.block_on(worker.run(rx)))
            .map_err(ConfigError::Worker)?;

        Ok(WebhookHandler {
            name,
            format,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            closing: AtomicBool::new(false),
            shared,
            flush_wait: config.request_timeout.saturating_add(config.throttle_limit),
        })
    }

    /// Handler posting to a Discord webhook.
    #[cfg(feature = "discord")]
    pub fn discord(
        name: impl Into<String>,
        config: WebhookConfig,
        format: EntryFormat,
    ) -> Result<Self, ConfigError> {
        let transport = crate::discord::DiscordTransport::new(&config)?;
        Self::new(name, config, format, Arc::new(transport))
    }

    pub fn state(&self) -> WebhookState {
        WebhookState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> WebhookStats {
        WebhookStats {
            requests: self.shared.requests.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }

    fn reject(&self, error: HandlerError) {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        diagnostics::report(&self.name, &error);
    }

    fn sender(&self) -> Option<mpsc::Sender<Command>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Handler for WebhookHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, record: &Record) {
        if self.closing.load(Ordering::Acquire) {
            return self.reject(HandlerError::Closed);
        }
        let Some(sender) = self.sender() else {
            return self.reject(HandlerError::Closed);
        };

        let command = Command::Entry {
            entry: self.format.entry(record),
            urgent: record.urgent,
        };
        match sender.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.reject(HandlerError::QueueFull),
            Err(TrySendError::Closed(_)) => self.reject(HandlerError::Closed),
        }
    }

    /// Ask the worker to deliver everything buffered, subject to the
    /// throttle, and wait a bounded time for it to finish.
    fn flush(&self) {
        let Some(sender) = self.sender() else {
            return;
        };
        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        if sender.try_send(Command::Flush(ack_tx)).is_err() {
            return;
        }
        if ack_rx.recv_timeout(self.flush_wait).is_err() {
            tracing::warn!(
                target: diagnostics::DIAGNOSTICS_TARGET,
                handler = %self.name,
                "timed out waiting for webhook flush"
            );
        }
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        // Dropping the last sender ends the worker loop after it has
        // processed everything already queued.
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(
                    target: diagnostics::DIAGNOSTICS_TARGET,
                    handler = %self.name,
                    "webhook worker panicked"
                );
            }
        }
        self.shared.set_state(WebhookState::Closed);
    }
}

impl Drop for WebhookHandler {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    name: String,
    buffer: DeliveryBuffer,
    transport: Arc<dyn WebhookTransport>,
    request_timeout: Duration,
    flush_on_close: bool,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        loop {
            let wakeup = self.buffer.next_wakeup(Instant::now());
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Entry { entry, urgent }) => self.accept(entry, urgent).await,
                    Some(Command::Flush(ack)) => {
                        self.flush(false).await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                _ = wait_until(wakeup) => {
                    if self.buffer.flush_due(Instant::now()) {
                        self.flush(false).await;
                    }
                }
            }
        }

        if self.flush_on_close {
            self.flush(true).await;
        }
        if !self.buffer.is_empty() {
            tracing::warn!(
                target: diagnostics::DIAGNOSTICS_TARGET,
                handler = %self.name,
                undelivered = self.buffer.len(),
                "webhook handler closed with undelivered records"
            );
        }
    }

    async fn accept(&mut self, entry: WebhookEntry, urgent: bool) {
        if self.buffer.push(entry, urgent) {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(count) = self.buffer.take_drop_notice() {
            diagnostics::report_dropped(&self.name, count);
        }
        if self.buffer.flush_due(Instant::now()) {
            self.flush(false).await;
        }
    }

    /// Deliver buffered entries in as many requests as the payload limits
    /// require. A throttled first request is deferred unless `forced`;
    /// follow-up requests wait out the spacing. Stops at the first failure.
    async fn flush(&mut self, forced: bool) {
        let mut first = true;
        while !self.buffer.is_empty() {
            let wait = self.buffer.throttle_remaining(Instant::now());
            if !wait.is_zero() {
                if !first {
                    tokio::time::sleep(wait).await;
                } else if !forced {
                    self.buffer.defer();
                    return;
                }
            }
            first = false;

            let (taken, payload) = pack_payload(self.buffer.pending());
            self.shared.set_state(WebhookState::Flushing);
            self.shared.requests.fetch_add(1, Ordering::Relaxed);
            let result =
                match tokio::time::timeout(self.request_timeout, self.transport.post(&payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(DeliveryError::Timeout(self.request_timeout)),
                };
            self.shared.set_state(WebhookState::Open);

            let now = Instant::now();
            match result {
                Ok(()) => {
                    self.buffer.record_success(taken, now);
                    self.shared
                        .delivered
                        .fetch_add(taken as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.shared.failed.fetch_add(1, Ordering::Relaxed);
                    self.buffer.record_failure(now, e.retry_after());
                    diagnostics::report(&self.name, &HandlerError::Delivery(e));
                    return;
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
