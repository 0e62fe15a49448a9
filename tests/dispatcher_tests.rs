use aspctl::{
    AspController, BusDriver, Config, Dispatcher, InboundItem, ResponseSink, RetryPolicy,
    SimulatedBus,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sink that records delivered frames and can be told to fail its next N
/// sends.
#[derive(Clone)]
struct RecordingSink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_next: Arc<AtomicU32>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(AtomicU32::new(0)),
        }
    }

    fn delivered(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn send(&mut self, _peer: SocketAddr, frame: &[u8]) -> std::io::Result<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "sink down"));
        }
        self.sent.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

fn controller() -> AspController {
    let bus: Arc<dyn BusDriver> = Arc::new(SimulatedBus::new(2));
    AspController::new(Config::default(), bus)
}

fn frame(cmd: &str, reference: u32, payload: &str) -> Vec<u8> {
    format!(
        "ASPMCS{:<3}{:>9}{:>4}{:>6}{:>9} {}",
        cmd,
        reference,
        payload.len(),
        58_000,
        43_200_000,
        payload
    )
    .into_bytes()
}

fn peer() -> SocketAddr {
    "127.0.0.1:9999".parse().unwrap()
}

fn reference_of(frame: &[u8]) -> u32 {
    std::str::from_utf8(&frame[9..18])
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn responses_are_delivered_in_order() {
    let sink = RecordingSink::new();
    let dispatcher = Dispatcher::spawn(controller(), sink.clone(), fast_retry());
    let tx = dispatcher.sender();

    for reference in 1..=3 {
        tx.send(InboundItem::Frame(frame("PNG", reference, ""), peer()))
            .unwrap();
    }
    dispatcher.stop().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 3);
    for (i, response) in delivered.iter().enumerate() {
        assert_eq!(reference_of(response), i as u32 + 1);
        assert_eq!(&response[6..9], b"PNG");
        assert_eq!(response[38], b'A');
    }
}

#[tokio::test]
async fn failed_send_retries_head_before_later_responses() {
    let sink = RecordingSink::new();
    sink.fail_next.store(1, Ordering::SeqCst);
    let dispatcher = Dispatcher::spawn(controller(), sink.clone(), fast_retry());
    let tx = dispatcher.sender();

    tx.send(InboundItem::Frame(frame("PNG", 1, ""), peer()))
        .unwrap();
    tx.send(InboundItem::Frame(frame("PNG", 2, ""), peer()))
        .unwrap();
    dispatcher.stop().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(reference_of(&delivered[0]), 1);
    assert_eq!(reference_of(&delivered[1]), 2);
}

#[tokio::test]
async fn undecodable_frame_is_dropped_without_a_response() {
    let sink = RecordingSink::new();
    let dispatcher = Dispatcher::spawn(controller(), sink.clone(), fast_retry());
    let tx = dispatcher.sender();

    tx.send(InboundItem::Frame(b"garbage".to_vec(), peer()))
        .unwrap();
    tx.send(InboundItem::Frame(frame("PNG", 5, ""), peer()))
        .unwrap();
    dispatcher.stop().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(reference_of(&delivered[0]), 5);
}

#[tokio::test]
async fn undeliverable_response_is_dropped_after_the_attempt_cap() {
    let sink = RecordingSink::new();
    sink.fail_next.store(u32::MAX, Ordering::SeqCst);
    let retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(1),
    };
    let dispatcher = Dispatcher::spawn(controller(), sink.clone(), retry);
    let tx = dispatcher.sender();

    tx.send(InboundItem::Frame(frame("PNG", 1, ""), peer()))
        .unwrap();
    // Must terminate: the head is dropped once the cap is reached.
    dispatcher.stop().await;
    assert!(sink.delivered().is_empty());
}

#[tokio::test]
async fn shutdown_drains_queued_responses_first() {
    let sink = RecordingSink::new();
    sink.fail_next.store(2, Ordering::SeqCst);
    let dispatcher = Dispatcher::spawn(controller(), sink.clone(), fast_retry());
    let tx = dispatcher.sender();

    for reference in 1..=3 {
        tx.send(InboundItem::Frame(frame("PNG", reference, ""), peer()))
            .unwrap();
    }
    dispatcher.stop().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(reference_of(&delivered[0]), 1);
    assert_eq!(reference_of(&delivered[2]), 3);
}

#[tokio::test]
async fn rejected_commands_still_get_responses() {
    let sink = RecordingSink::new();
    let dispatcher = Dispatcher::spawn(controller(), sink.clone(), fast_retry());
    let tx = dispatcher.sender();

    tx.send(InboundItem::Frame(frame("FIL", 1, "00103"), peer()))
        .unwrap();
    dispatcher.stop().await;

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0][38], b'R');
    let text = String::from_utf8_lossy(&delivered[0][46..]).to_string();
    assert!(text.contains("subsystem not initialized"), "{text}");
}
