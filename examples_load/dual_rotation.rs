use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log_relay::handler::Handler;
use log_relay::init::init_diagnostics;
use log_relay::rotating::{DualRotatingHandler, RotatingFileConfig};
use log_relay::rotation::BackupNaming;
use log_relay::{Level, Message, Record};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_diagnostics()?;

    let dir = std::env::temp_dir().join("log-relay-dual-rotation");
    let mut config = RotatingFileConfig::new(dir.join("load.log"));
    config.max_bytes = 256 * 1024;
    config.backup_count = 5;
    config.backup_naming = BackupNaming::Timestamped;

    let handler = Arc::new(DualRotatingHandler::with_default_format("load", config)?);

    let threads: u64 = 8;
    let per_thread: u64 = 25_000;
    let start = Instant::now();

    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let message = Message::new("worker {} wrote line {}").arg(t).arg(i);
                    handler.emit(&Record::new(Level::Info, "load.rotation", message));
                }
            })
        })
        .collect();
    for worker in workers {
        let _ = worker.join();
    }
    handler.close();

    let n = threads * per_thread;
    let elapsed = start.elapsed();
    println!(
        "dual rotation: wrote {} records in {:?} (~{:.0} rec/s) into {}",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64(),
        dir.display()
    );
    Ok(())
}
