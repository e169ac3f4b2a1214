use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log_relay::embed::{EntryFormat, WebhookPayload};
use log_relay::error::DeliveryError;
use log_relay::formatter::TextFormatter;
use log_relay::handler::Handler;
use log_relay::transport::WebhookTransport;
use log_relay::webhook::{WebhookConfig, WebhookHandler, WebhookState};
use log_relay::{Level, Record};

/// Records every delivered payload; can fail a number of requests first,
/// answer those failures with a rate limit, or take a while to answer.
#[derive(Default)]
struct RecordingTransport {
    delivered: Mutex<Vec<WebhookPayload>>,
    sent_at: Mutex<Vec<Instant>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    retry_after: Option<Duration>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    fn failing(times: usize) -> Arc<Self> {
        Arc::new(RecordingTransport {
            failures_left: AtomicUsize::new(times),
            ..Default::default()
        })
    }

    fn rate_limited(times: usize, retry_after: Duration) -> Arc<Self> {
        Arc::new(RecordingTransport {
            failures_left: AtomicUsize::new(times),
            retry_after: Some(retry_after),
            ..Default::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(RecordingTransport {
            delay: Some(delay),
            ..Default::default()
        })
    }

    fn payloads(&self) -> Vec<WebhookPayload> {
        self.delivered.lock().unwrap().clone()
    }

    fn send_times(&self) -> Vec<Instant> {
        self.sent_at.lock().unwrap().clone()
    }

    fn contents(&self) -> Vec<String> {
        self.payloads()
            .into_iter()
            .map(|p| p.content.unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.sent_at.lock().unwrap().push(Instant::now());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            if let Some(retry_after) = self.retry_after {
                return Err(DeliveryError::RateLimited {
                    retry_after: Some(retry_after),
                });
            }
            return Err(DeliveryError::Status {
                status: 500,
                body: "upstream exploded".into(),
            });
        }
        self.delivered.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

fn config(capacity: usize, throttle: Duration) -> WebhookConfig {
    let mut config = WebhookConfig::new("123", "token");
    config.capacity = capacity;
    config.throttle_limit = throttle;
    config.flush_interval = Duration::from_secs(60);
    config
}

fn text_handler(config: WebhookConfig, transport: Arc<RecordingTransport>) -> WebhookHandler {
    let format = EntryFormat::Text(Arc::new(TextFormatter::with_template("{message}").unwrap()));
    WebhookHandler::new("webhook", config, format, transport).unwrap()
}

fn record(message: &str) -> Record {
    Record::new(Level::Error, "app", message)
}

#[test]
fn capacity_records_produce_one_request() {
    let transport = Arc::new(RecordingTransport::default());
    let handler = text_handler(config(3, Duration::ZERO), transport.clone());

    for message in ["a", "b", "c"] {
        handler.emit(&record(message));
    }
    handler.flush();

    assert_eq!(transport.contents(), vec!["a\nb\nc"]);
    let stats = handler.stats();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.delivered, 3);
}

#[test]
fn below_capacity_nothing_is_sent_until_flush() {
    let transport = Arc::new(RecordingTransport::default());
    let handler = text_handler(config(3, Duration::ZERO), transport.clone());

    handler.emit(&record("a"));
    handler.emit(&record("b"));
    handler.close();

    assert!(transport.payloads().is_empty());
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 0);
}

#[test]
fn throttled_flush_is_deferred_then_sent_on_close() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = config(1, Duration::from_secs(60));
    config.flush_on_close = true;
    let handler = text_handler(config, transport.clone());

    handler.emit(&record("first"));
    handler.emit(&record("second"));
    handler.flush();
    assert_eq!(transport.contents(), vec!["first"]);

    handler.close();
    assert_eq!(transport.contents(), vec!["first", "second"]);
}

#[test]
fn failed_delivery_keeps_records_for_the_next_flush() {
    let transport = RecordingTransport::failing(1);
    let handler = text_handler(config(2, Duration::ZERO), transport.clone());

    handler.emit(&record("a"));
    handler.emit(&record("b"));
    handler.emit(&record("c"));
    handler.flush();

    assert_eq!(transport.contents(), vec!["a\nb\nc"]);
    let stats = handler.stats();
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 3);
}

#[test]
fn flush_on_close_delivers_remaining_records_once() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = config(10, Duration::from_secs(1));
    config.flush_on_close = true;
    let handler = text_handler(config, transport.clone());

    handler.emit(&record("x"));
    handler.emit(&record("y"));
    handler.close();
    handler.close();

    assert_eq!(transport.contents(), vec!["x\ny"]);
    assert_eq!(handler.state(), WebhookState::Closed);
}

#[test]
fn records_after_close_are_rejected() {
    let transport = Arc::new(RecordingTransport::default());
    let handler = text_handler(config(1, Duration::ZERO), transport.clone());

    handler.close();
    handler.emit(&record("late"));

    assert!(transport.payloads().is_empty());
    assert_eq!(handler.stats().rejected, 1);
}

#[test]
fn urgent_record_triggers_a_flush() {
    let transport = Arc::new(RecordingTransport::default());
    let handler = text_handler(config(10, Duration::ZERO), transport.clone());

    handler.emit(&record("routine"));
    handler.emit(&record("disk full").urgent());
    handler.close();

    assert_eq!(transport.contents(), vec!["routine\ndisk full"]);
}

#[test]
fn flush_interval_fires_without_new_records() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = config(10, Duration::ZERO);
    config.flush_interval = Duration::from_millis(100);
    let handler = text_handler(config, transport.clone());

    handler.emit(&record("lonely"));
    thread::sleep(Duration::from_millis(800));

    assert_eq!(transport.contents(), vec!["lonely"]);
}

#[test]
fn full_queue_rejects_instead_of_blocking() {
    let transport = RecordingTransport::slow(Duration::from_millis(300));
    let mut config = config(1, Duration::ZERO);
    config.queue_size = 1;
    let handler = text_handler(config, transport.clone());

    for i in 0..20 {
        handler.emit(&record(&format!("r{i}")));
    }

    assert!(handler.stats().rejected >= 18);
}

#[test]
fn retention_bound_drops_oldest_records() {
    let transport = RecordingTransport::failing(usize::MAX);
    let mut config = config(1, Duration::ZERO);
    config.max_pending = Some(2);
    config.flush_on_close = true;
    let handler = text_handler(config, transport.clone());

    for message in ["a", "b", "c", "d"] {
        handler.emit(&record(message));
    }
    handler.flush();

    let stats = handler.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.delivered, 0);
}

#[test]
fn large_batches_are_split_into_several_requests() {
    let transport = Arc::new(RecordingTransport::default());
    let handler = WebhookHandler::new(
        "webhook",
        config(15, Duration::ZERO),
        EntryFormat::default(),
        transport.clone(),
    )
    .unwrap();

    for i in 0..15 {
        handler.emit(&record(&format!("event {i}")));
    }
    handler.flush();

    let sizes: Vec<usize> = transport.payloads().iter().map(|p| p.embeds.len()).collect();
    assert_eq!(sizes, vec![10, 5]);
    assert_eq!(handler.stats().requests, 2);
}

#[test]
fn split_requests_keep_the_throttle_spacing() {
    let transport = Arc::new(RecordingTransport::default());
    let handler = WebhookHandler::new(
        "webhook",
        config(15, Duration::from_millis(300)),
        EntryFormat::default(),
        transport.clone(),
    )
    .unwrap();

    for i in 0..15 {
        handler.emit(&record(&format!("event {i}")));
    }
    handler.flush();

    let times = transport.send_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_millis(300));
    assert_eq!(handler.stats().delivered, 15);
}

#[test]
fn rate_limit_blocks_sends_until_it_expires() {
    let transport = RecordingTransport::rate_limited(1, Duration::from_millis(500));
    let handler = text_handler(config(1, Duration::ZERO), transport.clone());

    handler.emit(&record("a"));
    handler.emit(&record("b"));
    handler.flush();
    assert_eq!(transport.attempts.load(Ordering::SeqCst), 1);
    assert!(transport.payloads().is_empty());

    thread::sleep(Duration::from_millis(1500));

    assert_eq!(transport.contents(), vec!["a\nb"]);
    let times = transport.send_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_millis(500));
    assert_eq!(handler.stats().failed, 1);
}

#[test]
fn invalid_options_fail_at_construction() {
    let transport = Arc::new(RecordingTransport::default());
    let mut config = config(1, Duration::ZERO);
    config.webhook_token = String::new();
    let format = EntryFormat::default();
    assert!(WebhookHandler::new("webhook", config, format, transport).is_err());
}
