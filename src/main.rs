//! dirpush - push a local folder to a dirpush receiver
//!
//! Only files whose checksums differ from the receiver's copy are sent.
//! Nothing is ever deleted on the receiving side.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;

use dirpush::cli::PushOpts;
use dirpush::config::PushConfig;
use dirpush::logger::{init_tracing, NoopLogger, PushLogger, TextLogger};
use dirpush::net_async::client;
use dirpush::progress::{CancelFlag, ProgressEvent, PushProgress};

fn main() -> Result<()> {
    let opts = PushOpts::parse();
    // Progress goes through the spinner; tracing only surfaces warnings
    init_tracing("warn")?;
    let config = opts.resolve()?;

    // First Ctrl-C stops after the current file, a second one exits at once
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_flag.is_cancelled() {
            eprintln!("\nInterrupted again. Exiting (Ctrl-C)...");
            std::process::exit(130);
        }
        eprintln!("\nInterrupted by user. Finishing current file (Ctrl-C again to abort)...");
        handler_flag.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    let logger: Arc<dyn PushLogger> = match opts.log_file {
        Some(ref p) => match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("warning: cannot open log file {}: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        },
        None => Arc::new(NoopLogger),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let code = rt.block_on(run(config, cancel, opts.verbose, logger));
    std::process::exit(code);
}

async fn run(
    config: PushConfig,
    cancel: CancelFlag,
    verbose: bool,
    logger: Arc<dyn PushLogger>,
) -> i32 {
    let start = Instant::now();
    let progress = PushProgress::new(verbose);
    let mut handle = client::spawn_push(config, cancel);
    let mut code = 1;
    while let Some(event) = handle.events.recv().await {
        progress.handle(&event);
        logger.record(&event, start.elapsed().as_secs_f64());
        code = match event {
            ProgressEvent::Completed(_) => 0,
            ProgressEvent::Cancelled(_) => 130,
            ProgressEvent::Failed { .. } => 1,
            _ => code,
        };
    }
    if let Err(e) = handle.task.await {
        eprintln!("push task failed: {}", e);
        return 1;
    }
    code
}
