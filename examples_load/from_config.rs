use std::sync::Arc;
use std::time::Instant;

use log_relay::init::init_tracing;
use log_relay::{build_dispatcher, LoggingConfig};
use tracing::{error, info, warn};

const CONFIG: &str = r#"{
    "formatters": {
        "console": { "class": "colorized", "format": "{timestamp} {level} {logger}: {message}" },
        "json": { "class": "jsonl", "fields": { "thread": "thread_name" } }
    },
    "filters": {
        "no_info": { "class": "ignore_levels", "levels": ["INFO"] }
    },
    "handlers": {
        "stderr": { "class": "console", "formatter": "console", "level": "WARNING" },
        "archive": {
            "class": "jsonl_file",
            "formatter": "json",
            "path": "/tmp/log-relay-from-config/archive.jsonl",
            "flush": "buffered",
            "max_bytes": 1048576,
            "backup_count": 3
        },
        "app_file": {
            "class": "rotating_file",
            "path": "/tmp/log-relay-from-config/app.log",
            "when": "MIDNIGHT",
            "backup_count": 7,
            "filters": ["no_info"]
        }
    },
    "loggers": {
        "from_config": { "level": "DEBUG", "handlers": ["app_file"] }
    },
    "root": { "level": "INFO", "handlers": ["stderr", "archive"] }
}"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config: LoggingConfig = serde_json::from_str(CONFIG)?;
    let dispatcher = Arc::new(build_dispatcher(&config)?);
    init_tracing(Arc::clone(&dispatcher))?;

    let n: u64 = 10_000;
    let start = Instant::now();
    for i in 0..n {
        info!(iteration = i, "config load test record");
    }
    warn!(queue = "billing", "queue is backing up");
    error!(code = 503, "upstream unavailable");

    let elapsed = start.elapsed();
    println!(
        "from config: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    dispatcher.close();
    Ok(())
}
