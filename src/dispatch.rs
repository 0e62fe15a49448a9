//! Queued command dispatch with retrying, in-order response delivery.
//!
//! Inbound frames flow through an unbounded channel into a single dispatcher
//! task. Each frame is decoded and executed immediately; its response joins a
//! local outbound queue delivered strictly in order. A send failure keeps the
//! response at the head of the queue and retries with a fixed backoff, up to
//! a bounded attempt count, after which the response is dropped and delivery
//! moves on. New frames keep being accepted while the head is retrying.

use crate::controller::AspController;
use crate::packet::CommandPacket;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, warn};

pub enum InboundItem {
    Frame(Vec<u8>, SocketAddr),
    /// Sentinel: finish delivering queued responses, then exit.
    Shutdown,
}

/// Where encoded response frames go. The UDP socket in production, an
/// in-memory recorder in tests.
#[async_trait]
pub trait ResponseSink: Send {
    async fn send(&mut self, peer: SocketAddr, frame: &[u8]) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

struct PendingResponse {
    peer: SocketAddr,
    frame: Vec<u8>,
    attempts: u32,
}

pub struct Dispatcher {
    tx: UnboundedSender<InboundItem>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(
        controller: AspController,
        sink: impl ResponseSink + 'static,
        retry: RetryPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(controller, Box::new(sink), rx, retry));
        Self { tx, task }
    }

    pub fn sender(&self) -> UnboundedSender<InboundItem> {
        self.tx.clone()
    }

    /// Signal shutdown and wait for the queue to drain.
    pub async fn stop(self) {
        let _ = self.tx.send(InboundItem::Shutdown);
        let _ = self.task.await;
    }
}

async fn run_loop(
    controller: AspController,
    mut sink: Box<dyn ResponseSink>,
    mut rx: UnboundedReceiver<InboundItem>,
    retry: RetryPolicy,
) {
    let mut outbound: VecDeque<PendingResponse> = VecDeque::new();
    let mut draining = false;

    loop {
        if !draining {
            if outbound.is_empty() {
                match rx.recv().await {
                    Some(item) => ingest(item, &controller, &mut outbound, &mut draining),
                    None => draining = true,
                }
            }
            while !draining {
                match rx.try_recv() {
                    Ok(item) => ingest(item, &controller, &mut outbound, &mut draining),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => draining = true,
                }
            }
        }

        if outbound.is_empty() {
            if draining {
                break;
            }
            continue;
        }

        if !send_head(sink.as_mut(), &mut outbound, retry).await {
            tokio::time::sleep(retry.backoff).await;
        }
    }
}

fn ingest(
    item: InboundItem,
    controller: &AspController,
    outbound: &mut VecDeque<PendingResponse>,
    draining: &mut bool,
) {
    let (data, peer) = match item {
        InboundItem::Frame(data, peer) => (data, peer),
        InboundItem::Shutdown => {
            *draining = true;
            return;
        }
    };
    let packet = match CommandPacket::decode(&data) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(%peer, %err, "discarding undecodable frame");
            return;
        }
    };
    // A panicking handler loses its response but never the dispatcher.
    let response =
        match std::panic::catch_unwind(AssertUnwindSafe(|| controller.process_command(&packet))) {
            Ok(response) => response,
            Err(_) => {
                error!(command = %packet.command, reference = packet.reference,
                    "command handler panicked");
                return;
            }
        };
    outbound.push_back(PendingResponse {
        peer,
        frame: response.encode(),
        attempts: 0,
    });
}

/// Attempt delivery of the queue head. Returns false when the head stays
/// queued for another attempt.
async fn send_head(
    sink: &mut dyn ResponseSink,
    outbound: &mut VecDeque<PendingResponse>,
    retry: RetryPolicy,
) -> bool {
    let Some(head) = outbound.front_mut() else {
        return true;
    };
    head.attempts += 1;
    match sink.send(head.peer, &head.frame).await {
        Ok(()) => {
            outbound.pop_front();
            true
        }
        Err(err) => {
            if head.attempts >= retry.max_attempts {
                error!(peer = %head.peer, attempts = head.attempts, %err,
                    "dropping undeliverable response");
                outbound.pop_front();
                true
            } else {
                warn!(peer = %head.peer, attempt = head.attempts, %err, "response send failed");
                false
            }
        }
    }
}
