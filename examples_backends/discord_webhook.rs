use std::sync::Arc;

use log_relay::dispatch::{self, Dispatcher, HandlerBinding, Logger};
use log_relay::embed::{EmbedConfig, EmbedFormatter, EntryFormat};
use log_relay::init::init_diagnostics;
use log_relay::webhook::{WebhookConfig, WebhookHandler};
use log_relay::{Level, Record};

/// Usage: `cargo run --example discord_webhook -- <webhook id> <webhook token>`
fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_diagnostics()?;

    let mut args = std::env::args().skip(1);
    let (Some(id), Some(token)) = (args.next(), args.next()) else {
        eprintln!("usage: discord_webhook <webhook id> <webhook token>");
        std::process::exit(2);
    };

    let mut config = WebhookConfig::new(id, token);
    config.capacity = 5;
    config.flush_interval = std::time::Duration::from_secs(10);
    config.flush_on_close = true;

    let formatter = EmbedFormatter::with_ordered_fields(
        EmbedConfig::default(),
        vec![
            ("Logger".to_string(), "logger".to_string()),
            ("Line".to_string(), "line".to_string()),
            ("Thread".to_string(), "thread_name".to_string()),
        ],
    )?;
    let handler = Arc::new(WebhookHandler::discord(
        "discord",
        config,
        EntryFormat::Embed(Arc::new(formatter)),
    )?);

    let dispatcher = Dispatcher::builder()
        .root(
            Logger::new()
                .level(Level::Info)
                .handler(HandlerBinding::new(handler.clone()).level(Level::Warning)),
        )
        .build();
    dispatch::install(Arc::new(dispatcher))?;

    dispatch::log(Record::new(Level::Info, "example", "not sent: below handler level"));
    dispatch::log(Record::new(Level::Warning, "example.jobs", "job queue above 80%").with_location(file!(), line!()));
    dispatch::log(
        Record::new(Level::Critical, "example.db", "primary database unreachable")
            .with_location(file!(), line!())
            .urgent(),
    );

    dispatch::shutdown();
    println!("discord webhook: {:?}", handler.stats());
    Ok(())
}
