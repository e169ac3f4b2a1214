use std::sync::Arc;

use async_trait::async_trait;
use log_relay::embed::{EntryFormat, WebhookPayload};
use log_relay::error::DeliveryError;
use log_relay::formatter::TextFormatter;
use log_relay::handler::Handler;
use log_relay::transport::WebhookTransport;
use log_relay::webhook::{WebhookConfig, WebhookHandler};
use log_relay::{Level, Record};

/// Example of delivering webhook batches somewhere other than Discord by
/// implementing the `WebhookTransport` trait directly. Imagine this posts
/// to an internal chat relay; here it just prints the JSON body.
struct StdoutTransport;

#[async_trait]
impl WebhookTransport for StdoutTransport {
    async fn post(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        println!("[chat-relay] {}", serde_json::to_string(payload)?);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = WebhookConfig::new("relay", "unused");
    config.capacity = 3;
    config.throttle_limit = std::time::Duration::ZERO;
    config.flush_on_close = true;

    let handler = WebhookHandler::new(
        "relay",
        config,
        EntryFormat::Text(Arc::new(TextFormatter::with_template("[{level}] {logger}: {message}")?)),
        Arc::new(StdoutTransport),
    )?;

    for i in 0..7 {
        handler.emit(&Record::new(Level::Error, "example.relay", format!("failure #{i}")));
    }
    handler.close();

    println!("custom transport: {:?}", handler.stats());
    Ok(())
}
