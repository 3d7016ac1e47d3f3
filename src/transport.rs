//! The request/response substrate the consumer talks through.
//!
//! A `Face` takes one request and eventually yields exactly one outcome:
//! the response, a timeout, or a negative acknowledgment. Delivery is
//! at-most-once per call; retrying is the caller's business.

use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

use crate::packet::{NackReason, Packet, Request, Response};
use crate::producer::Producer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Data(Response),
    Timeout,
    Nack(NackReason),
}

pub trait Face: Send + Sync + 'static {
    fn express(&self, req: Request) -> impl Future<Output = Delivery> + Send;
}

/// Turn what a producer emitted into a delivery outcome.
pub fn delivery_from(pkt: Packet) -> Delivery {
    match pkt {
        Packet::Response(r) => Delivery::Data(r),
        Packet::Nack(n) => Delivery::Nack(n.reason),
        // a producer never answers with a request
        Packet::Request(_) => Delivery::Nack(NackReason::NoRoute),
    }
}

/// In-process face wired straight to a producer. Each request runs on its
/// own task, so responses to a burst complete in any order.
pub struct LocalFace {
    producer: Arc<Producer>,
}

impl LocalFace {
    pub fn new(producer: Arc<Producer>) -> Self {
        Self { producer }
    }
}

impl Face for LocalFace {
    async fn express(&self, req: Request) -> Delivery {
        let lifetime = Duration::from_millis(req.lifetime_ms as u64);
        let producer = Arc::clone(&self.producer);
        let task = tokio::spawn(async move { producer.handle(req).await });
        match timeout(lifetime, task).await {
            Ok(Ok(pkt)) => delivery_from(pkt),
            Ok(Err(_)) => Delivery::Nack(NackReason::Congestion),
            Err(_) => Delivery::Timeout,
        }
    }
}
