//! ndnfile library
//!
//! Remote file open/close/stat/read over a name-based request/response
//! transport: a producer serving local files and a consumer that reads them
//! back in fixed-size segments.

pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod handles;
pub mod logger;
pub mod name;
pub mod net_async;
pub mod packet;
pub mod producer;
pub mod protocol;
pub mod protocol_core;
pub mod stat;
pub mod transport;

pub use consumer::Consumer;
pub use error::{FileError, FileResult};
pub use producer::Producer;

use std::sync::Arc;

use crate::logger::{Logger, StderrLogger, TextLogger};

/// Pick the binaries' logger: a log file if one was given, stderr otherwise.
pub fn make_logger(log_file: Option<&std::path::Path>, verbose: bool) -> Arc<dyn Logger> {
    if let Some(p) = log_file {
        match TextLogger::new(p) {
            Ok(l) => return Arc::new(l),
            Err(e) => eprintln!("ndnfile: cannot open log file {}: {:#}", p.display(), e),
        }
    }
    Arc::new(StderrLogger { verbose })
}
