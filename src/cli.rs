//! Shared CLI options for the ndnfile binaries

use clap::{ArgAction, Args, Parser};
use std::path::PathBuf;

use crate::protocol::buffer;

/// Logging and config flags common to both binaries
#[derive(Clone, Debug, Args)]
pub struct CommonOpts {
    /// TOML config file ([producer] / [consumer] tables)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append timestamped event lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Log every request and response to stderr
    #[arg(short, long, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Name prefix (overrides config)
    #[arg(long)]
    pub prefix: Option<String>,

    /// Segment size in bytes (overrides config; both sides must agree)
    #[arg(long = "segment-size")]
    pub segment_size: Option<usize>,
}

/// Producer daemon options used by ndnfiled
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "ndnfile producer daemon: serves open/close/stat/read for local files")]
pub struct DaemonOpts {
    /// Bind address (host:port), overrides config
    #[arg(long)]
    pub bind: Option<String>,

    #[command(flatten)]
    pub common: CommonOpts,
}

/// Copy driver options used by ndnfile
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Fetch files from an ndnfile producer")]
pub struct CopyOpts {
    /// Producer address (host:port), overrides config
    #[arg(long)]
    pub addr: Option<String>,

    /// Remote file to fetch
    #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
    pub file: Option<String>,

    /// Remote directory; every regular file directly inside it is fetched
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Bytes requested per read call
    #[arg(long, default_value_t = buffer::DEFAULT, value_parser = parse_bsize)]
    pub bsize: u64,

    /// Write fetched files into this local directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub common: CommonOpts,
}

fn parse_bsize(s: &str) -> Result<u64, String> {
    let n: u64 = s.parse().map_err(|e| format!("invalid buffer size {s:?}: {e}"))?;
    if !(buffer::MIN..=buffer::MAX).contains(&n) {
        return Err(format!(
            "buffer size must be between {} and {} bytes",
            buffer::MIN,
            buffer::MAX
        ));
    }
    Ok(n)
}
