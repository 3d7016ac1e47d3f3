use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use ndnfile::cli::DaemonOpts;
use ndnfile::config::Config;
use ndnfile::name::Operation;
use ndnfile::{make_logger, net_async, Producer};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let mut cfg = Config::load_or_default(opts.common.config.as_deref())?.producer;
    if let Some(bind) = opts.bind {
        cfg.bind = bind;
    }
    if let Some(prefix) = opts.common.prefix {
        cfg.prefix = prefix;
    }
    if let Some(size) = opts.common.segment_size {
        cfg.segment_size = size;
    }

    println!("Starting ndnfile producer:");
    println!("  Prefix: {}", cfg.prefix);
    println!("  Bind: {}", cfg.bind);
    println!("  Segment size: {} bytes", cfg.segment_size);

    if cfg.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes every readable file to all network interfaces");
        eprintln!("   This protocol is UNENCRYPTED and UNAUTHENTICATED; only use on trusted networks");
    }

    let logger = make_logger(opts.common.log_file.as_deref(), opts.common.verbose);
    let bind = cfg.bind.clone();
    let producer = Arc::new(Producer::new(cfg, logger)?);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let res = rt.block_on(async {
        tokio::select! {
            res = net_async::server::serve(&bind, Arc::clone(&producer)) => res,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nInterrupted. Shutting down...");
                Ok(())
            }
        }
    });

    let closed = producer.shutdown();
    println!(
        "Served open={} close={} stat={} read={}; closed {} file(s) left open",
        producer.served(Operation::Open),
        producer.served(Operation::Close),
        producer.served(Operation::Stat),
        producer.served(Operation::Read),
        closed
    );
    res
}
