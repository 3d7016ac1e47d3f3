use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::name::Name;

/// Event sink shared by the producer, consumer and binaries.
pub trait Logger: Send + Sync {
    fn request(&self, _name: &Name) {}
    fn response(&self, _name: &Name, _outcome: &str) {}
    fn retry(&self, _name: &Name, _attempt: u32, _reason: &str) {}
    fn error(&self, _context: &str, _path: &str, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn done(&self, _segments: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

fn format_request(name: &Name) -> String {
    format!("REQUEST name={name}")
}

fn format_response(name: &Name, outcome: &str) -> String {
    format!("RESPONSE name={name} outcome={outcome}")
}

fn format_retry(name: &Name, attempt: u32, reason: &str) -> String {
    format!("RETRY name={name} attempt={attempt} reason={reason}")
}

fn format_error(context: &str, path: &str, msg: &str) -> String {
    format!("ERROR ctx={context} path={path} msg={msg}")
}

fn format_done(segments: u64, bytes: u64, seconds: f64) -> String {
    format!("DONE segments={segments} bytes={bytes} seconds={seconds:.3}")
}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn request(&self, name: &Name) {
        self.line(&format_request(name));
    }
    fn response(&self, name: &Name, outcome: &str) {
        self.line(&format_response(name, outcome));
    }
    fn retry(&self, name: &Name, attempt: u32, reason: &str) {
        self.line(&format_retry(name, attempt, reason));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format_error(context, path, msg));
    }
    fn info(&self, msg: &str) {
        self.line(&format!("INFO {msg}"));
    }
    fn done(&self, segments: u64, bytes: u64, seconds: f64) {
        self.line(&format_done(segments, bytes, seconds));
    }
}

/// Warnings and summaries to stderr; per-packet events only when verbose.
pub struct StderrLogger {
    pub verbose: bool,
}

impl StderrLogger {
    fn line(&self, s: &str) {
        eprintln!("[{}] {}", Utc::now().format("%H:%M:%S%.3f"), s);
    }
}

impl Logger for StderrLogger {
    fn request(&self, name: &Name) {
        if self.verbose {
            self.line(&format_request(name));
        }
    }
    fn response(&self, name: &Name, outcome: &str) {
        if self.verbose {
            self.line(&format_response(name, outcome));
        }
    }
    fn retry(&self, name: &Name, attempt: u32, reason: &str) {
        self.line(&format_retry(name, attempt, reason));
    }
    fn error(&self, context: &str, path: &str, msg: &str) {
        self.line(&format_error(context, path, msg));
    }
    fn info(&self, msg: &str) {
        self.line(msg);
    }
    fn done(&self, segments: u64, bytes: u64, seconds: f64) {
        self.line(&format_done(segments, bytes, seconds));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/ndnfile.log");
        let logger = TextLogger::new(&path).unwrap();
        let name: Name = "/ndn/xrootd/read/f/seg=2".parse().unwrap();
        logger.request(&name);
        logger.retry(&name, 2, "timeout");
        logger.done(3, 1024, 0.5);
        drop(logger);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("REQUEST name=/ndn/xrootd/read/f/seg=2"));
        assert!(lines[1].contains("attempt=2 reason=timeout"));
        assert!(lines[2].ends_with("DONE segments=3 bytes=1024 seconds=0.500"));
    }
}
