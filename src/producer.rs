//! Producer: answers open/close/stat/read requests against local files.
//!
//! Every request under a registered prefix gets exactly one response, named
//! as the request plus a fresh version component. Local failures are encoded
//! as negative integers, never dropped.

use anyhow::Result;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ProducerConfig;
use crate::error::{FileError, FileResult, SUCCESS};
use crate::handles::{FileHandleTable, OpenOutcome};
use crate::logger::Logger;
use crate::name::{self, Name, Operation};
use crate::packet::{Nack, NackReason, Packet, Request, Response};
use crate::stat::FileStat;

pub struct Producer {
    config: ProducerConfig,
    prefix: Name,
    table: Arc<FileHandleTable>,
    logger: Arc<dyn Logger>,
    last_version: AtomicU64,
    served: [AtomicU64; 4],
}

fn op_index(op: Operation) -> usize {
    match op {
        Operation::Open => 0,
        Operation::Close => 1,
        Operation::Stat => 2,
        Operation::Read => 3,
    }
}

impl Producer {
    pub fn new(config: ProducerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        let prefix = config.prefix_name()?;
        for op in Operation::ALL {
            logger.info(&format!("registered prefix {}", name::filter_prefix(&prefix, op)));
        }
        Ok(Self {
            config,
            prefix,
            table: Arc::new(FileHandleTable::new()),
            logger,
            last_version: AtomicU64::new(0),
            served: Default::default(),
        })
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn prefix(&self) -> &Name {
        &self.prefix
    }

    pub fn table(&self) -> &FileHandleTable {
        &self.table
    }

    /// Requests answered so far for `op`.
    pub fn served(&self, op: Operation) -> u64 {
        self.served[op_index(op)].load(Ordering::Relaxed)
    }

    fn route(&self, name: &Name) -> Option<Operation> {
        name::operation_of(name, &self.prefix)
    }

    /// Strictly increasing version stamp, millisecond clock based.
    fn next_version(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let prev = self
            .last_version
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        now.max(prev + 1)
    }

    /// Dispatch one request. Names outside the registered prefixes get a nack.
    pub async fn handle(&self, req: Request) -> Packet {
        let op = match self.route(&req.name) {
            Some(op) => op,
            None => {
                self.logger.error("route", &req.name.to_string(), "no handler for name");
                return Packet::Nack(Nack {
                    name: req.name,
                    reason: NackReason::NoRoute,
                });
            }
        };
        self.logger.request(&req.name);

        let decoded = name::decode(&req.name, self.prefix.len() + 1);
        let reply_name = req.name.clone().append_version(self.next_version());
        let path = decoded.path.clone();

        let resp = match op {
            Operation::Open => Response::integer(reply_name, outcome(self.on_open(&path).await)),
            Operation::Close => Response::integer(reply_name, outcome(self.on_close(&path).await)),
            Operation::Stat => match self.on_stat(&path).await {
                Ok(bytes) => Response::blob(reply_name, bytes),
                Err(e) => Response::integer(reply_name, e.code()),
            },
            Operation::Read => match self.on_read(&path, decoded.segment_no()).await {
                Ok(bytes) => Response::blob(reply_name, bytes),
                Err(e) => Response::integer(reply_name, e.code()),
            },
        }
        .with_freshness(self.config.freshness_ms);

        self.served[op_index(op)].fetch_add(1, Ordering::Relaxed);
        self.log_response(&resp, &path);
        Packet::Response(resp)
    }

    fn log_response(&self, resp: &Response, path: &str) {
        match resp.as_integer() {
            Ok(code) if code < 0 => {
                let err = FileError::from_code(code, path);
                self.logger.error("respond", path, &err.to_string());
                self.logger.response(&resp.name, &format!("code={code}"));
            }
            Ok(code) => self.logger.response(&resp.name, &format!("code={code}")),
            Err(_) => self
                .logger
                .response(&resp.name, &format!("bytes={}", resp.content.len())),
        }
    }

    async fn blocking<R, F>(&self, path: &str, f: F) -> FileResult<R>
    where
        F: FnOnce(&FileHandleTable) -> FileResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let table = Arc::clone(&self.table);
        tokio::task::spawn_blocking(move || f(&table))
            .await
            .unwrap_or_else(|e| {
                Err(FileError::Io {
                    path: path.to_string(),
                    reason: e.to_string(),
                })
            })
    }

    async fn on_open(&self, path: &str) -> FileResult<()> {
        let p = path.to_string();
        let res = self.blocking(path, move |t| t.open(&p)).await;
        match &res {
            Ok(OpenOutcome::Opened) => self.logger.info(&format!("opened {path}")),
            Ok(OpenOutcome::AlreadyOpen) => self.logger.info(&format!("{path} already open, reusing handle")),
            Err(e) => self.logger.error("open", path, &e.to_string()),
        }
        res.map(|_| ())
    }

    async fn on_close(&self, path: &str) -> FileResult<()> {
        let p = path.to_string();
        let res = self.blocking(path, move |t| t.close(&p)).await;
        if let Err(e) = &res {
            self.logger.error("close", path, &e.to_string());
        }
        res
    }

    async fn on_stat(&self, path: &str) -> FileResult<Vec<u8>> {
        let p = path.to_string();
        self.blocking(path, move |t| {
            // must be open, but the answer comes from the filesystem
            if !t.contains(&p) {
                return Err(FileError::NotFound { path: p });
            }
            FileStat::of(Path::new(&p))
                .map_err(|e| FileError::Io {
                    path: p.clone(),
                    reason: e.to_string(),
                })?
                .to_bytes(&p)
        })
        .await
    }

    async fn on_read(&self, path: &str, segment: u64) -> FileResult<Vec<u8>> {
        let p = path.to_string();
        let size = self.config.segment_size;
        let offset = segment.saturating_mul(size as u64);
        self.blocking(path, move |t| t.read_at(&p, offset, size)).await
    }

    /// Close every open file. Returns how many were still open.
    pub fn shutdown(&self) -> usize {
        for path in self.table.paths() {
            self.logger.info(&format!("force-closing {path}"));
        }
        let n = self.table.close_all();
        self.logger.info(&format!("closed {n} open file(s) at shutdown"));
        n
    }
}

fn outcome(res: FileResult<()>) -> i64 {
    match res {
        Ok(()) => SUCCESS,
        Err(e) => e.code(),
    }
}
