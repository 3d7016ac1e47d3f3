//! Async (Tokio) TCP transport for ndnfile producer/consumer.
//!
//! One connection carries many outstanding requests. The server answers each
//! request on its own task and writes responses as they complete, so arrival
//! order at the client does not follow request order.

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use crate::protocol::timeouts::{read_deadline_ms, write_deadline_ms};
use crate::protocol_core::{parse_frame_header, validate_frame_size, FRAME_HEADER_LEN};

/// Read one frame. `Ok(None)` on a clean close between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(rd: &mut R) -> Result<Option<(u8, Vec<u8>)>> {
    let mut hdr = [0u8; FRAME_HEADER_LEN];
    match rd.read_exact(&mut hdr).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let (typ, len) = parse_frame_header(&hdr)?;
    let len = len as usize;
    validate_frame_size(len)?;
    let mut payload = vec![0u8; len];
    if len > 0 {
        let ms = read_deadline_ms(len);
        match timeout(Duration::from_millis(ms), rd.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => anyhow::bail!("frame body timeout ({} ms)", ms),
        }
    }
    Ok(Some((typ, payload)))
}

#[inline]
pub async fn write_all_timed<W: AsyncWrite + Unpin>(wr: &mut W, buf: &[u8]) -> Result<()> {
    let ms = write_deadline_ms(buf.len());
    match timeout(Duration::from_millis(ms), wr.write_all(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => anyhow::bail!("write timeout ({} ms)", ms),
    }
}

pub mod server {
    use super::*;
    use crate::packet::Packet;
    use crate::producer::Producer;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    pub async fn serve(bind: &str, producer: Arc<Producer>) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind {}", bind))?;
        serve_listener(listener, producer).await
    }

    /// Accept loop on an already bound listener.
    pub async fn serve_listener(listener: TcpListener, producer: Arc<Producer>) -> Result<()> {
        let local = listener.local_addr()?;
        eprintln!("ndnfile producer listening on {} prefix={}", local, producer.prefix());
        loop {
            let (stream, peer) = listener.accept().await?;
            let _ = stream.set_nodelay(true);
            eprintln!("conn from {}", peer);
            let producer = Arc::clone(&producer);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, producer).await {
                    eprintln!("conn {} closed: {:#}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(stream: TcpStream, producer: Arc<Producer>) -> Result<()> {
        let (mut rd, mut wr) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<Packet>(256);

        let writer = tokio::spawn(async move {
            while let Some(pkt) = rx.recv().await {
                let frame = pkt.to_frame()?;
                write_all_timed(&mut wr, &frame).await?;
            }
            Ok::<(), anyhow::Error>(())
        });

        while let Some((typ, payload)) = read_frame(&mut rd).await? {
            match Packet::decode(typ, &payload)? {
                Packet::Request(req) => {
                    let producer = Arc::clone(&producer);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let reply = producer.handle(req).await;
                        let _ = tx.send(reply).await;
                    });
                }
                other => anyhow::bail!("unexpected packet from consumer: {}", other.name()),
            }
        }

        // in-flight handlers hold their own senders; the writer drains them
        drop(tx);
        writer.await.context("writer task")??;
        Ok(())
    }
}

pub mod client {
    use super::*;
    use crate::name::Name;
    use crate::packet::{NackReason, Packet, Request};
    use crate::protocol::timeouts::CONNECT_MS;
    use crate::transport::{delivery_from, Delivery, Face};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpStream;
    use tokio::sync::{mpsc, oneshot};
    use tokio::task::JoinHandle;

    type Waiters = HashMap<Name, Vec<(u64, oneshot::Sender<Packet>)>>;

    /// Consumer side of a TCP connection to a producer. Outstanding requests
    /// are matched to responses by name; one response satisfies every
    /// waiter for that name.
    pub struct TcpFace {
        tx: mpsc::Sender<Vec<u8>>,
        pending: Arc<Mutex<Waiters>>,
        next_id: AtomicU64,
        reader: JoinHandle<()>,
        writer: JoinHandle<()>,
    }

    impl TcpFace {
        pub async fn connect(addr: &str) -> Result<Self> {
            let stream = match timeout(Duration::from_millis(CONNECT_MS), TcpStream::connect(addr)).await {
                Ok(res) => res.with_context(|| format!("connect {}", addr))?,
                Err(_) => anyhow::bail!("connect {} timed out ({} ms)", addr, CONNECT_MS),
            };
            let _ = stream.set_nodelay(true);
            let (mut rd, mut wr) = stream.into_split();

            let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
            let writer = tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if let Err(e) = write_all_timed(&mut wr, &frame).await {
                        eprintln!("ndnfile: write to producer failed: {:#}", e);
                        break;
                    }
                }
            });

            let pending: Arc<Mutex<Waiters>> = Arc::new(Mutex::new(HashMap::new()));
            let table = Arc::clone(&pending);
            let reader = tokio::spawn(async move {
                loop {
                    let pkt = match read_frame(&mut rd).await {
                        Ok(Some((typ, payload))) => match Packet::decode(typ, &payload) {
                            Ok(pkt) => pkt,
                            Err(e) => {
                                eprintln!("ndnfile: dropping undecodable frame: {:#}", e);
                                continue;
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            eprintln!("ndnfile: read from producer failed: {:#}", e);
                            break;
                        }
                    };
                    let key = match &pkt {
                        Packet::Response(r) => r.name.without_version(),
                        other => other.name().clone(),
                    };
                    // unsolicited or late responses are dropped
                    if let Some(waiters) = table.lock().remove(&key) {
                        for (_, w) in waiters {
                            let _ = w.send(pkt.clone());
                        }
                    }
                }
                // wake everyone still waiting; their senders drop here
                table.lock().clear();
            });

            Ok(Self {
                tx,
                pending,
                next_id: AtomicU64::new(0),
                reader,
                writer,
            })
        }

        fn forget(&self, name: &Name, id: u64) {
            let mut pending = self.pending.lock();
            if let Some(waiters) = pending.get_mut(name) {
                waiters.retain(|(i, _)| *i != id);
                if waiters.is_empty() {
                    pending.remove(name);
                }
            }
        }

        /// Requests still waiting for an answer.
        pub fn outstanding(&self) -> usize {
            self.pending.lock().values().map(Vec::len).sum()
        }
    }

    /// Removes a waiter when its request is abandoned, including when the
    /// calling future is dropped mid-flight.
    struct Waiting<'a> {
        face: &'a TcpFace,
        key: Name,
        id: u64,
    }

    impl Drop for Waiting<'_> {
        fn drop(&mut self) {
            self.face.forget(&self.key, self.id);
        }
    }

    impl Face for TcpFace {
        async fn express(&self, req: Request) -> Delivery {
            let lifetime = Duration::from_millis(req.lifetime_ms as u64);
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (otx, orx) = oneshot::channel();
            self.pending.lock().entry(req.name.clone()).or_default().push((id, otx));
            let _waiting = Waiting {
                face: self,
                key: req.name.clone(),
                id,
            };

            let frame = match Packet::Request(req).to_frame() {
                Ok(f) => f,
                Err(_) => return Delivery::Nack(NackReason::NoRoute),
            };
            if self.tx.send(frame).await.is_err() {
                return Delivery::Nack(NackReason::NoRoute);
            }

            match timeout(lifetime, orx).await {
                Ok(Ok(pkt)) => delivery_from(pkt),
                // connection went away
                Ok(Err(_)) => Delivery::Nack(NackReason::NoRoute),
                Err(_) => Delivery::Timeout,
            }
        }
    }

    impl Drop for TcpFace {
        fn drop(&mut self) {
            self.reader.abort();
            self.writer.abort();
        }
    }
}
