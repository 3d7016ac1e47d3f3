//! ndnfile copy driver
//!
//! Fetches one remote file, or every regular file in a directory, through a
//! producer: open, stat, read in `--bsize` chunks, close. Prints a transfer
//! summary at the end.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use ndnfile::cli::CopyOpts;
use ndnfile::config::{Config, ConsumerConfig};
use ndnfile::logger::Logger;
use ndnfile::net_async::client::TcpFace;
use ndnfile::{make_logger, Consumer};

fn main() -> Result<()> {
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // 128 + SIGINT
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = CopyOpts::parse();

    let mut cfg = Config::load_or_default(opts.common.config.as_deref())?.consumer;
    if let Some(addr) = &opts.addr {
        cfg.addr = addr.clone();
    }
    if let Some(prefix) = &opts.common.prefix {
        cfg.prefix = prefix.clone();
    }
    if let Some(size) = opts.common.segment_size {
        cfg.segment_size = size;
    }

    let files = match (&opts.file, &opts.dir) {
        (Some(f), _) => vec![f.clone()],
        (None, Some(d)) => list_dir(d)?,
        (None, None) => bail!("one of --file or --dir is required"),
    };
    if files.is_empty() {
        println!("Nothing to fetch");
        return Ok(());
    }
    if let Some(out) = &opts.output {
        std::fs::create_dir_all(out)
            .with_context(|| format!("create output directory {}", out.display()))?;
    }

    let logger = make_logger(opts.common.log_file.as_deref(), opts.common.verbose);
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(cfg, files, &opts, logger))
}

/// Regular files directly inside `dir`, as absolute path strings.
fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let root = std::fs::canonicalize(dir).with_context(|| format!("resolve {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in WalkDir::new(&root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("list {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_string_lossy().to_string());
        }
    }
    Ok(files)
}

async fn run(cfg: ConsumerConfig, files: Vec<String>, opts: &CopyOpts, logger: Arc<dyn Logger>) -> Result<()> {
    let face = TcpFace::connect(&cfg.addr).await?;
    let consumer = Consumer::new(face, cfg, Arc::clone(&logger))?;

    let start = Instant::now();
    let mut failed = 0usize;
    for path in &files {
        match copy_one(&consumer, path, opts.bsize as usize, opts.output.as_deref()).await {
            Ok(n) => {
                if opts.common.verbose {
                    println!("{}: {} bytes", path, n);
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("{}: {:#}", path, e);
            }
        }
    }

    let secs = start.elapsed().as_secs_f64();
    let segments = consumer.segments_received();
    let bytes = consumer.bytes_received();
    logger.done(segments, bytes, secs);

    let mb = bytes as f64 / 1_048_576.0;
    println!("Files: {} ({} failed)", files.len(), failed);
    println!("Segments received: {}", segments);
    println!("Data received: {:.2} MB", mb);
    println!("Elapsed: {:.3} s", secs);
    if secs > 0.0 {
        println!("Throughput: {:.2} MB/s", mb / secs);
    }

    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, files.len());
    }
    Ok(())
}

async fn copy_one(c: &Consumer<TcpFace>, path: &str, bsize: usize, output: Option<&Path>) -> Result<u64> {
    c.open(path).await.with_context(|| format!("open {}", path))?;
    let res = fetch(c, path, bsize, output).await;
    // close even when the transfer failed
    let closed = c.close(path).await;
    let n = res?;
    closed.with_context(|| format!("close {}", path))?;
    Ok(n)
}

async fn fetch(c: &Consumer<TcpFace>, path: &str, bsize: usize, output: Option<&Path>) -> Result<u64> {
    let st = c.stat(path).await.with_context(|| format!("stat {}", path))?;
    if st.is_dir() {
        bail!("is a directory");
    }

    let mut out = match output {
        Some(dir) => {
            let name = Path::new(path)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ndnfile.out"));
            let dest = dir.join(name);
            let f = tokio::fs::File::create(&dest)
                .await
                .with_context(|| format!("create {}", dest.display()))?;
            Some(f)
        }
        None => None,
    };

    let mut buf = vec![0u8; bsize];
    let mut offset = 0u64;
    loop {
        let n = c
            .read(path, offset, &mut buf)
            .await
            .with_context(|| format!("read {} at offset {}", path, offset))?;
        if let Some(f) = out.as_mut() {
            f.write_all(&buf[..n]).await?;
        }
        offset += n as u64;
        if n < buf.len() {
            break;
        }
    }
    if let Some(mut f) = out {
        f.flush().await?;
    }

    if offset != st.size {
        eprintln!("{}: fetched {} bytes but stat reported {}", path, offset, st.size);
    }
    Ok(offset)
}
