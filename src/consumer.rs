//! Consumer: remote open/close/stat and segmented reads.
//!
//! Control calls are single round trips. A read fans out one request per
//! segment (bounded by the pipeline window), accepts responses in any order
//! and copies them into the caller's buffer strictly in segment order.

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::ConsumerConfig;
use crate::error::{FileError, FileResult};
use crate::logger::Logger;
use crate::name::{self, Name, Operation};
use crate::packet::{ContentType, Request, Response};
use crate::stat::FileStat;
use crate::transport::{Delivery, Face};

/// Issues one request and retries it on timeout, nack or a response that
/// answers some other name.
struct Fetcher<F> {
    face: Arc<F>,
    logger: Arc<dyn Logger>,
    lifetime_ms: u64,
    max_attempts: u32,
}

impl<F> Clone for Fetcher<F> {
    fn clone(&self) -> Self {
        Self {
            face: Arc::clone(&self.face),
            logger: Arc::clone(&self.logger),
            lifetime_ms: self.lifetime_ms,
            max_attempts: self.max_attempts,
        }
    }
}

impl<F: Face> Fetcher<F> {
    async fn fetch(&self, name: Name) -> FileResult<Response> {
        let mut misnamed = None;
        for attempt in 1..=self.max_attempts {
            self.logger.request(&name);
            let reason = match self
                .face
                .express(Request::new(name.clone(), self.lifetime_ms))
                .await
            {
                Delivery::Data(resp) if resp.name.without_version() == name => return Ok(resp),
                Delivery::Data(resp) => {
                    let err = resp.malformed(&format!("answers a different request than {name}"));
                    let reason = err.to_string();
                    misnamed = Some(err);
                    reason
                }
                Delivery::Timeout => {
                    misnamed = None;
                    "timeout".to_string()
                }
                Delivery::Nack(r) => {
                    misnamed = None;
                    format!("nack {:?}", r)
                }
            };
            if attempt < self.max_attempts {
                self.logger.retry(&name, attempt, &reason);
            } else {
                self.logger.error("fetch", &name.to_string(), &reason);
            }
        }
        // the last attempt decides which failure is reported
        Err(misnamed.unwrap_or_else(|| FileError::TransientDelivery {
            name: name.to_string(),
            attempts: self.max_attempts,
        }))
    }
}

/// Per-call reassembly: out-of-order arrivals wait in `pending` until the
/// cursor reaches them.
struct Reassembly {
    pending: BTreeMap<u64, FileResult<Vec<u8>>>,
    next_to_deliver: u64,
    /// First segment known to be short; nothing after it exists.
    eof: Option<u64>,
    copied: usize,
    last_delivered: Option<(u64, Vec<u8>)>,
}

impl Reassembly {
    fn new(first: u64) -> Self {
        Self {
            pending: BTreeMap::new(),
            next_to_deliver: first,
            eof: None,
            copied: 0,
            last_delivered: None,
        }
    }

    fn past_eof(&self, idx: u64) -> bool {
        self.eof.is_some_and(|e| idx > e)
    }

    fn insert(&mut self, idx: u64, seg: FileResult<Vec<u8>>, segment_size: usize) {
        if idx < self.next_to_deliver || self.past_eof(idx) {
            return;
        }
        if let Ok(data) = &seg {
            if data.len() < segment_size {
                self.eof = Some(idx);
                self.pending.retain(|&i, _| i <= idx);
            }
        }
        self.pending.insert(idx, seg);
    }
}

pub struct Consumer<F: Face> {
    fetcher: Fetcher<F>,
    config: ConsumerConfig,
    prefix: Name,
    logger: Arc<dyn Logger>,
    /// Last partially consumed segment per path, reused by the next read.
    /// A read served entirely from here never reaches the producer, so it
    /// succeeds even if the producer has since dropped its handle; the entry
    /// goes away on `close` and on any failed read of the path.
    tail: Mutex<HashMap<String, (u64, Vec<u8>)>>,
    segments_received: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
}

impl<F: Face> Consumer<F> {
    pub fn new(face: F, config: ConsumerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        Self::with_shared_face(Arc::new(face), config, logger)
    }

    pub fn with_shared_face(face: Arc<F>, config: ConsumerConfig, logger: Arc<dyn Logger>) -> Result<Self> {
        config.validate()?;
        let prefix = config.prefix_name()?;
        Ok(Self {
            fetcher: Fetcher {
                face,
                logger: Arc::clone(&logger),
                lifetime_ms: config.interest_lifetime_ms,
                max_attempts: config.max_attempts,
            },
            config,
            prefix,
            logger,
            tail: Mutex::new(HashMap::new()),
            segments_received: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn face(&self) -> &Arc<F> {
        &self.fetcher.face
    }

    pub fn segments_received(&self) -> u64 {
        self.segments_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    fn name_for(&self, op: Operation, path: &str, segment: u64) -> Name {
        name::encode(&self.prefix, op, path, segment)
    }

    /// Integer outcome of a control call: negative codes become errors.
    fn control_result(resp: &Response, path: &str) -> FileResult<()> {
        let code = resp.as_integer()?;
        if code < 0 {
            return Err(FileError::from_code(code, path));
        }
        Ok(())
    }

    pub async fn open(&self, path: &str) -> FileResult<()> {
        let res = async {
            let resp = self.fetcher.fetch(self.name_for(Operation::Open, path, 0)).await?;
            Self::control_result(&resp, path)
        }
        .await;
        if let Err(e) = &res {
            self.logger.error("open", path, &e.to_string());
        }
        res
    }

    pub async fn close(&self, path: &str) -> FileResult<()> {
        self.tail.lock().remove(path);
        let res = async {
            let resp = self.fetcher.fetch(self.name_for(Operation::Close, path, 0)).await?;
            Self::control_result(&resp, path)
        }
        .await;
        if let Err(e) = &res {
            self.logger.error("close", path, &e.to_string());
        }
        res
    }

    pub async fn stat(&self, path: &str) -> FileResult<FileStat> {
        let res = async {
            let resp = self.fetcher.fetch(self.name_for(Operation::Stat, path, 0)).await?;
            match resp.content_type {
                ContentType::Blob => FileStat::from_bytes(&resp.name.to_string(), &resp.content),
                ContentType::NegativeInteger => Err(FileError::from_code(resp.as_integer()?, path)),
                ContentType::NonNegativeInteger => Err(resp.malformed("expected stat bytes")),
            }
        }
        .await;
        if let Err(e) = &res {
            self.logger.error("stat", path, &e.to_string());
        }
        res
    }

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the count
    /// copied, which is short only at end of file.
    pub async fn read(&self, path: &str, offset: u64, buf: &mut [u8]) -> FileResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let res = match timeout(self.config.read_timeout(), self.read_segments(path, offset, buf)).await {
            Ok(res) => res,
            Err(_) => Err(FileError::DeadlineExceeded {
                path: path.to_string(),
                timeout_ms: self.config.read_timeout_ms,
            }),
        };
        if let Err(e) = &res {
            // nothing buffered for this path survives a failed call
            self.tail.lock().remove(path);
            self.logger.error("read", path, &e.to_string());
        }
        res
    }

    async fn read_segments(&self, path: &str, offset: u64, buf: &mut [u8]) -> FileResult<usize> {
        let segment_size = self.config.segment_size;
        let seg = segment_size as u64;
        let len = buf.len() as u64;
        let end = offset.saturating_add(len);
        let first = offset / seg;
        let last = (end - 1) / seg;

        let mut state = Reassembly::new(first);
        if let Some((idx, data)) = self.tail.lock().remove(path) {
            if idx >= first && idx <= last {
                state.insert(idx, Ok(data), segment_size);
            }
        }

        let mut inflight: JoinSet<(u64, FileResult<Response>)> = JoinSet::new();
        let mut next_to_issue = first;

        loop {
            while inflight.len() < self.config.pipeline_window
                && next_to_issue <= last
                && !state.past_eof(next_to_issue)
            {
                let idx = next_to_issue;
                next_to_issue += 1;
                if state.pending.contains_key(&idx) {
                    continue;
                }
                let fetcher = self.fetcher.clone();
                let name = self.name_for(Operation::Read, path, idx);
                inflight.spawn(async move { (idx, fetcher.fetch(name).await) });
            }

            // copy everything that is now contiguous
            while let Some(seg_res) = state.pending.remove(&state.next_to_deliver) {
                let idx = state.next_to_deliver;
                let data = match seg_res {
                    Ok(data) => data,
                    Err(e) => return Err(self.segment_failure(path, idx, state.copied, e)),
                };
                let seg_start = idx * seg;
                let src_start = offset.saturating_sub(seg_start) as usize;
                if data.len() > src_start {
                    let dst_start = (seg_start + src_start as u64 - offset) as usize;
                    let n = (data.len() - src_start).min(buf.len() - dst_start);
                    buf[dst_start..dst_start + n].copy_from_slice(&data[src_start..src_start + n]);
                    state.copied += n;
                }
                state.next_to_deliver += 1;
                state.last_delivered = Some((idx, data));
            }

            if state.next_to_deliver > last || state.past_eof(state.next_to_deliver) {
                break;
            }

            let (idx, res) = match inflight.join_next().await {
                Some(Ok(done)) => done,
                Some(Err(e)) => {
                    return Err(FileError::Io {
                        path: path.to_string(),
                        reason: format!("segment task failed: {e}"),
                    })
                }
                None => {
                    return Err(FileError::Io {
                        path: path.to_string(),
                        reason: format!("reassembly stalled at segment {}", state.next_to_deliver),
                    })
                }
            };
            let seg_res = res.and_then(|resp| self.segment_payload(path, idx, resp));
            state.insert(idx, seg_res, segment_size);
        }
        // dropping the JoinSet aborts requests for segments past end of file
        inflight.abort_all();

        if let Some((idx, data)) = state.last_delivered.take() {
            let seg_end = idx * seg + data.len() as u64;
            if end < seg_end {
                self.tail.lock().insert(path.to_string(), (idx, data));
            }
        }
        Ok(state.copied)
    }

    /// Interpret one read response for segment `idx`.
    fn segment_payload(&self, path: &str, idx: u64, resp: Response) -> FileResult<Vec<u8>> {
        if name::segment_of(&resp.name) != Some(idx) {
            return Err(resp.malformed(&format!("expected segment {idx}")));
        }
        match resp.content_type {
            ContentType::Blob => {
                if resp.content.len() > self.config.segment_size {
                    return Err(resp.malformed(&format!(
                        "segment of {} bytes exceeds {}",
                        resp.content.len(),
                        self.config.segment_size
                    )));
                }
                self.segments_received.fetch_add(1, Ordering::Relaxed);
                self.bytes_received
                    .fetch_add(resp.content.len() as u64, Ordering::Relaxed);
                Ok(resp.content)
            }
            ContentType::NegativeInteger => Err(FileError::from_code(resp.as_integer()?, path)),
            ContentType::NonNegativeInteger => Err(resp.malformed("expected segment bytes")),
        }
    }

    fn segment_failure(&self, path: &str, idx: u64, delivered: usize, e: FileError) -> FileError {
        match e {
            FileError::TransientDelivery { .. }
            | FileError::DeadlineExceeded { .. }
            | FileError::MalformedPeerResponse { .. } => e,
            _ if delivered > 0 => FileError::PartialSegmentFailure {
                path: path.to_string(),
                segment: idx,
                delivered,
                code: e.code(),
            },
            _ => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProducerConfig;
    use crate::logger::NoopLogger;
    use crate::packet::NackReason;
    use crate::producer::Producer;
    use crate::transport::LocalFace;
    use std::path::Path;
    use tokio::time::{sleep, Duration};

    /// Local face with fault injection: per-segment timeouts, nacks, forced
    /// negative answers and delays, misnamed responses, and an optional delay
    /// that makes later segments arrive first.
    struct FlakyFace {
        inner: LocalFace,
        timeouts: Mutex<HashMap<u64, u32>>,
        nacks: Mutex<HashMap<u64, u32>>,
        negatives: Mutex<HashMap<u64, i64>>,
        delays: Mutex<HashMap<u64, Duration>>,
        misnamed: Mutex<u32>,
        reverse_order: bool,
        seen: Mutex<Vec<Name>>,
    }

    impl FlakyFace {
        fn new(producer: Arc<Producer>) -> Self {
            Self {
                inner: LocalFace::new(producer),
                timeouts: Mutex::new(HashMap::new()),
                nacks: Mutex::new(HashMap::new()),
                negatives: Mutex::new(HashMap::new()),
                delays: Mutex::new(HashMap::new()),
                misnamed: Mutex::new(0),
                reverse_order: false,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn read_segments_requested(&self) -> Vec<u64> {
            self.seen.lock().iter().filter_map(name::segment_of).collect()
        }

        fn take(map: &Mutex<HashMap<u64, u32>>, seg: u64) -> bool {
            let mut map = map.lock();
            match map.get_mut(&seg) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        }
    }

    impl Face for FlakyFace {
        async fn express(&self, req: Request) -> Delivery {
            self.seen.lock().push(req.name.clone());
            {
                let mut misnamed = self.misnamed.lock();
                if *misnamed > 0 {
                    *misnamed -= 1;
                    let wrong = "/ndn/xrootd/read/elsewhere/seg=0/v=1".parse().unwrap();
                    return Delivery::Data(Response::blob(wrong, Vec::new()));
                }
            }
            let seg = name::segment_of(&req.name);
            if let Some(s) = seg {
                let delay = self.delays.lock().get(&s).copied();
                if let Some(d) = delay {
                    sleep(d).await;
                }
                let code = self.negatives.lock().get(&s).copied();
                if let Some(code) = code {
                    return Delivery::Data(Response::integer(req.name.append_version(1), code));
                }
                if Self::take(&self.timeouts, s) {
                    return Delivery::Timeout;
                }
                if Self::take(&self.nacks, s) {
                    return Delivery::Nack(NackReason::Congestion);
                }
            }
            let d = self.inner.express(req).await;
            if self.reverse_order {
                if let Some(s) = seg {
                    sleep(Duration::from_millis(40u64.saturating_sub(s * 4))).await;
                }
            }
            d
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        producer: Arc<Producer>,
    }

    impl Fixture {
        fn new(segment_size: usize) -> Self {
            let cfg = ProducerConfig {
                segment_size,
                ..Default::default()
            };
            Self {
                dir: tempfile::tempdir().unwrap(),
                producer: Arc::new(Producer::new(cfg, Arc::new(NoopLogger)).unwrap()),
            }
        }

        fn file(&self, name: &str, data: &[u8]) -> String {
            let p = self.dir.path().join(name);
            std::fs::write(&p, data).unwrap();
            p.to_string_lossy().to_string()
        }

        fn config(&self, window: usize) -> ConsumerConfig {
            ConsumerConfig {
                segment_size: self.producer.config().segment_size,
                interest_lifetime_ms: 1_000,
                pipeline_window: window,
                ..Default::default()
            }
        }

        fn consumer(&self, face: FlakyFace, window: usize) -> Consumer<FlakyFace> {
            Consumer::new(face, self.config(window), Arc::new(NoopLogger)).unwrap()
        }

        fn face(&self) -> FlakyFace {
            FlakyFace::new(Arc::clone(&self.producer))
        }
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn five_byte_file_in_two_segments() {
        let fx = Fixture::new(4);
        let path = fx.file("a.bin", b"12345");
        let c = fx.consumer(fx.face(), 16);
        c.open(&path).await.unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 5);
        assert_eq!(&buf, b"12345");
        let mut segs = c.face().read_segments_requested();
        segs.sort();
        assert_eq!(segs, vec![0, 1]);
        assert_eq!(c.segments_received(), 2);
        assert_eq!(c.bytes_received(), 5);
    }

    #[tokio::test]
    async fn open_close_leaves_no_entry() {
        let fx = Fixture::new(4);
        let path = fx.file("a", b"abc");
        let c = fx.consumer(fx.face(), 4);
        c.open(&path).await.unwrap();
        assert!(fx.producer.table().contains(&path));
        c.close(&path).await.unwrap();
        assert!(!fx.producer.table().contains(&path));
        assert!(matches!(c.close(&path).await, Err(FileError::NotOpen { .. })));
    }

    #[tokio::test]
    async fn duplicate_open_succeeds_once_in_table() {
        let fx = Fixture::new(4);
        let path = fx.file("a", b"abc");
        let c = fx.consumer(fx.face(), 4);
        c.open(&path).await.unwrap();
        c.open(&path).await.unwrap();
        assert_eq!(fx.producer.table().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_fails_everywhere() {
        let fx = Fixture::new(4);
        let c = fx.consumer(fx.face(), 4);
        let err = c.open("/missing").await.unwrap_err();
        assert!(err.code() < 0);
        let mut buf = [0u8; 10];
        let err = c.read("/missing", 0, &mut buf).await.unwrap_err();
        assert!(matches!(err, FileError::NotFound { .. }));
        assert!(err.code() < 0);
        assert!(c.stat("/missing").await.is_err());
    }

    #[tokio::test]
    async fn eof_boundaries() {
        let fx = Fixture::new(4);
        let data = pattern(10);
        let path = fx.file("f", &data);
        let c = fx.consumer(fx.face(), 4);
        c.open(&path).await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(c.read(&path, 10, &mut buf).await.unwrap(), 0);
        assert_eq!(c.read(&path, 40, &mut buf).await.unwrap(), 0);
        assert_eq!(c.read(&path, 6, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], &data[6..10]);
        // file size is an exact multiple of the segment size
        let even = fx.file("even", &pattern(8));
        c.open(&even).await.unwrap();
        let mut big = [0u8; 32];
        assert_eq!(c.read(&even, 0, &mut big).await.unwrap(), 8);
        assert_eq!(&big[..8], &pattern(8)[..]);
    }

    #[tokio::test]
    async fn stops_requesting_past_eof() {
        let fx = Fixture::new(4);
        let path = fx.file("a", b"12345");
        let c = fx.consumer(fx.face(), 1);
        c.open(&path).await.unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 5);
        assert_eq!(c.face().read_segments_requested(), vec![0, 1]);
    }

    #[tokio::test]
    async fn every_range_matches_source() {
        let fx = Fixture::new(16);
        let data = pattern(200);
        let path = fx.file("f", &data);
        let c = fx.consumer(fx.face(), 3);
        c.open(&path).await.unwrap();
        for (o, n) in [(0usize, 200usize), (1, 15), (15, 2), (16, 16), (17, 100), (190, 50), (199, 1), (0, 1)] {
            let mut buf = vec![0u8; n];
            let got = c.read(&path, o as u64, &mut buf).await.unwrap();
            let want = n.min(data.len() - o);
            assert_eq!(got, want, "range ({o}, {n})");
            assert_eq!(&buf[..got], &data[o..o + want], "range ({o}, {n})");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reordered_arrival_gives_identical_bytes() {
        let fx = Fixture::new(8);
        let data = pattern(8 * 9 + 3);
        let path = fx.file("f", &data);

        let in_order = fx.consumer(fx.face(), 16);
        let mut reversed_face = fx.face();
        reversed_face.reverse_order = true;
        let reversed = fx.consumer(reversed_face, 16);
        in_order.open(&path).await.unwrap();

        for (o, n) in [(0u64, data.len()), (5, 60), (9, 7)] {
            let mut a = vec![0u8; n];
            let mut b = vec![0u8; n];
            let na = in_order.read(&path, o, &mut a).await.unwrap();
            let nb = reversed.read(&path, o, &mut b).await.unwrap();
            assert_eq!(na, nb);
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn retries_timeouts_then_delivers() {
        let fx = Fixture::new(4);
        let data = pattern(20);
        let path = fx.file("f", &data);
        let face = fx.face();
        face.timeouts.lock().insert(3, 2);
        face.nacks.lock().insert(1, 1);
        let c = fx.consumer(face, 8);
        c.open(&path).await.unwrap();

        let mut buf = vec![0u8; 20];
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 20);
        assert_eq!(buf, data);
        let seg3 = c.face().read_segments_requested().into_iter().filter(|&s| s == 3).count();
        assert_eq!(seg3, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_are_transient() {
        let fx = Fixture::new(4);
        let path = fx.file("f", &pattern(20));
        let face = fx.face();
        face.timeouts.lock().insert(2, 100);
        let c = fx.consumer(face, 8);
        c.open(&path).await.unwrap();

        let mut buf = vec![0u8; 20];
        let err = c.read(&path, 0, &mut buf).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(c.tail.lock().is_empty());
    }

    #[tokio::test]
    async fn sequential_reads_reuse_trailing_segment() {
        let fx = Fixture::new(4);
        let data = pattern(10);
        let path = fx.file("f", &data);
        let c = fx.consumer(fx.face(), 8);
        c.open(&path).await.unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 5);
        let before = c.face().read_segments_requested().len();
        let mut next = [0u8; 3];
        assert_eq!(c.read(&path, 5, &mut next).await.unwrap(), 3);
        assert_eq!(&next, &data[5..8]);
        assert_eq!(c.face().read_segments_requested().len(), before);

        c.close(&path).await.unwrap();
        assert!(c.tail.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_on_two_paths() {
        let fx = Fixture::new(8);
        let a_data = pattern(300);
        let b_data: Vec<u8> = pattern(257).into_iter().rev().collect();
        let a = fx.file("a", &a_data);
        let b = fx.file("b", &b_data);
        let c = fx.consumer(fx.face(), 4);
        c.open(&a).await.unwrap();
        c.open(&b).await.unwrap();

        let mut buf_a = vec![0u8; 300];
        let mut buf_b = vec![0u8; 300];
        let (ra, rb) = tokio::join!(c.read(&a, 0, &mut buf_a), c.read(&b, 0, &mut buf_b));
        assert_eq!(ra.unwrap(), 300);
        assert_eq!(rb.unwrap(), 257);
        assert_eq!(buf_a, a_data);
        assert_eq!(&buf_b[..257], &b_data[..]);
    }

    #[tokio::test]
    async fn stat_is_idempotent() {
        let fx = Fixture::new(4);
        let path = fx.file("s", b"stat me");
        let c = fx.consumer(fx.face(), 4);
        c.open(&path).await.unwrap();
        let a = c.stat(&path).await.unwrap();
        let b = c.stat(&path).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.size, 7);
        assert_eq!(a.ino, FileStat::of(Path::new(&path)).unwrap().ino);
    }

    #[tokio::test]
    async fn read_after_producer_side_close_fails() {
        let fx = Fixture::new(4);
        let path = fx.file("f", &pattern(12));
        let c = fx.consumer(fx.face(), 4);
        c.open(&path).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 4);
        fx.producer.table().close(&path).unwrap();
        let err = c.read(&path, 4, &mut buf).await.unwrap_err();
        assert!(matches!(err, FileError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failures_past_eof_do_not_fail_the_read() {
        let fx = Fixture::new(4);
        let path = fx.file("a", b"12345");
        let face = fx.face();
        for seg in 2..25 {
            face.timeouts.lock().insert(seg, 100);
        }
        let c = fx.consumer(face, 16);
        c.open(&path).await.unwrap();
        let mut buf = [0u8; 100];
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..5], b"12345");

        let face = fx.face();
        for seg in 2..25 {
            face.negatives.lock().insert(seg, -5);
        }
        let c = fx.consumer(face, 16);
        assert_eq!(c.read(&path, 0, &mut buf).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn retries_exhausted_mid_range_name_the_segment() {
        let fx = Fixture::new(4);
        let path = fx.file("f", &pattern(20));
        let face = fx.face();
        face.timeouts.lock().insert(2, 100);
        let c = fx.consumer(face, 16);
        c.open(&path).await.unwrap();
        let mut buf = [0u8; 20];
        match c.read(&path, 0, &mut buf).await.unwrap_err() {
            FileError::TransientDelivery { name, attempts } => {
                assert!(name.ends_with("/seg=2"), "{name}");
                assert_eq!(attempts, c.config().max_attempts);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn producer_failure_after_delivered_bytes_is_partial() {
        let fx = Fixture::new(4);
        let path = fx.file("f", &pattern(20));
        let face = fx.face();
        face.negatives.lock().insert(2, -5);
        let c = fx.consumer(face, 16);
        c.open(&path).await.unwrap();

        let mut buf = [0u8; 20];
        let err = c.read(&path, 0, &mut buf).await.unwrap_err();
        assert_eq!(
            err,
            FileError::PartialSegmentFailure {
                path: path.clone(),
                segment: 2,
                delivered: 8,
                code: -5,
            }
        );
        assert!(err.code() < 0);
        assert_eq!(&buf[..8], &pattern(20)[..8]);

        // nothing delivered yet: the producer's own error comes through
        let err = c.read(&path, 8, &mut buf[..4]).await.unwrap_err();
        assert!(matches!(err, FileError::Io { .. }), "{err}");
    }

    #[tokio::test]
    async fn read_deadline_bounds_the_call() {
        let fx = Fixture::new(4);
        let path = fx.file("f", &pattern(20));
        let face = fx.face();
        face.delays.lock().insert(1, Duration::from_secs(5));
        let cfg = ConsumerConfig {
            read_timeout_ms: 100,
            interest_lifetime_ms: 10_000,
            ..fx.config(16)
        };
        let c = Consumer::new(face, cfg, Arc::new(NoopLogger)).unwrap();
        c.open(&path).await.unwrap();

        let mut buf = [0u8; 20];
        let started = std::time::Instant::now();
        let err = c.read(&path, 0, &mut buf).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(
            err,
            FileError::DeadlineExceeded {
                path: path.clone(),
                timeout_ms: 100,
            }
        );
        assert!(err.is_transient());
        assert!(c.tail.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_on_one_path() {
        let fx = Fixture::new(8);
        let data = pattern(400);
        let path = fx.file("shared", &data);
        let face = fx.face();
        // first range is slowed so both calls overlap
        face.delays.lock().insert(3, Duration::from_millis(30));
        let c = fx.consumer(face, 4);
        c.open(&path).await.unwrap();

        let mut low = vec![0u8; 203];
        let mut high = vec![0u8; 197];
        let (rl, rh) = tokio::join!(c.read(&path, 0, &mut low), c.read(&path, 203, &mut high));
        assert_eq!(rl.unwrap(), 203);
        assert_eq!(rh.unwrap(), 197);
        assert_eq!(&low[..], &data[..203]);
        assert_eq!(&high[..], &data[203..]);
    }

    #[tokio::test]
    async fn misnamed_responses_are_retried() {
        let fx = Fixture::new(4);
        let path = fx.file("f", b"abc");
        let face = fx.face();
        *face.misnamed.lock() = 1;
        let c = fx.consumer(face, 4);
        c.open(&path).await.unwrap();
        assert_eq!(c.face().seen.lock().len(), 2);

        *c.face().misnamed.lock() = 100;
        let err = c.stat(&path).await.unwrap_err();
        assert!(matches!(err, FileError::MalformedPeerResponse { .. }), "{err}");
        assert_eq!(c.face().seen.lock().len(), 2 + c.config().max_attempts as usize);
    }

    #[tokio::test]
    async fn trailing_segment_serves_reads_until_close() {
        let fx = Fixture::new(4);
        let data = pattern(10);
        let path = fx.file("f", &data);
        let c = fx.consumer(fx.face(), 8);
        c.open(&path).await.unwrap();

        let mut buf = [0u8; 5];
        c.read(&path, 0, &mut buf).await.unwrap();
        fx.producer.table().close(&path).unwrap();
        // segment 1 was kept from the first read; the producer is not asked
        let mut next = [0u8; 2];
        assert_eq!(c.read(&path, 5, &mut next).await.unwrap(), 2);
        assert_eq!(&next, &data[5..7]);
        assert!(c.tail.lock().contains_key(&path));

        // a read that also needs the producer fails and drops the kept segment
        let mut wide = [0u8; 5];
        assert!(c.read(&path, 5, &mut wide).await.is_err());
        assert!(c.tail.lock().is_empty());
    }
}
