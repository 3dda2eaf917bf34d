use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use dirpush::cli::DaemonOpts;
use dirpush::logger::init_tracing;
use dirpush::net_async::server;

fn main() {
    let opts = DaemonOpts::parse();
    if let Err(e) = init_tracing("info") {
        eprintln!("failed to install logging: {:#}", e);
    }
    std::process::exit(exit_code(run(opts)));
}

// 0 on Ctrl-C, 1 on anything unrecoverable (bind failure, accept error)
fn exit_code(res: Result<()>) -> i32 {
    match res {
        Ok(()) => 0,
        Err(e) => {
            error!("Error: {:#}", e);
            1
        }
    }
}

fn run(opts: DaemonOpts) -> Result<()> {
    let config = opts.resolve()?;

    if let Some(ref root) = config.root {
        if !root.is_dir() {
            anyhow::bail!("Root path is not a directory: {}", root.display());
        }
    }

    if config.bind.starts_with("0.0.0.0") {
        warn!("Binding to 0.0.0.0 exposes the receiver to all network interfaces");
        warn!("This protocol is UNENCRYPTED and UNAUTHENTICATED - only use on trusted networks");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let listener = server::bind(&config).await?;
        server::serve_until(listener, config, interrupted()).await
    })
}

async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Listener interrupted by user"),
        Err(e) => {
            warn!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await
        }
    }
}
