use aspctl::packet::RESPONSE_OVERHEAD;
use aspctl::server::{bind_command_socket, spawn_receive_loop, UdpResponseSink};
use aspctl::{AspController, BusDriver, Config, Dispatcher, RetryPolicy, SimulatedBus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

struct Harness {
    addr: SocketAddr,
    controller: AspController,
    dispatcher: Dispatcher,
    receiver: JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let socket = bind_command_socket("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        let config = Config {
            boards_expected: 2,
            stand_count: 16,
            stands_per_board: 8,
            settle_delay_ms: 10,
            temperature_period_ms: 3_600_000,
            chassis_period_ms: 3_600_000,
            ..Config::default()
        };
        let bus: Arc<dyn BusDriver> = Arc::new(SimulatedBus::new(2));
        let subsystem = config.subsystem.clone();
        let controller = AspController::new(config, bus);

        let dispatcher = Dispatcher::spawn(
            controller.clone(),
            UdpResponseSink::new(Arc::clone(&socket)),
            RetryPolicy::default(),
        );
        let receiver = spawn_receive_loop(socket, subsystem, dispatcher.sender());

        Self {
            addr,
            controller,
            dispatcher,
            receiver,
        }
    }

    async fn shutdown(self) {
        self.receiver.abort();
        self.dispatcher.stop().await;
        self.controller.stop_monitors().await;
        self.controller.quiesce().await;
    }
}

fn frame_to(dst: &str, cmd: &str, reference: u32, payload: &str) -> Vec<u8> {
    format!(
        "{:<3}MCS{:<3}{:>9}{:>4}{:>6}{:>9} {}",
        dst,
        cmd,
        reference,
        payload.len(),
        58_000,
        43_200_000,
        payload
    )
    .into_bytes()
}

async fn exchange(client: &UdpSocket, server: SocketAddr, request: &[u8]) -> Vec<u8> {
    client.send_to(request, server).await.unwrap();
    let mut buf = [0u8; 8192];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("no response within timeout")
        .unwrap();
    buf[..n].to_vec()
}

#[tokio::test]
async fn ping_round_trips_over_udp() {
    let harness = Harness::start().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let response = exchange(&client, harness.addr, &frame_to("ASP", "PNG", 42, "")).await;
    assert_eq!(&response[0..3], b"MCS");
    assert_eq!(&response[3..6], b"ASP");
    assert_eq!(&response[6..9], b"PNG");
    let reference: u32 = std::str::from_utf8(&response[9..18])
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(reference, 42);
    let length: usize = std::str::from_utf8(&response[18..22])
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(length, RESPONSE_OVERHEAD);
    assert_eq!(response[38], b'A');
    assert_eq!(&response[39..46], b"SHUTDWN");

    harness.shutdown().await;
}

#[tokio::test]
async fn full_command_session_over_udp() {
    let harness = Harness::start().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let response = exchange(&client, harness.addr, &frame_to("ASP", "INI", 1, "")).await;
    assert_eq!(response[38], b'A');
    harness.controller.quiesce().await;

    let response = exchange(&client, harness.addr, &frame_to("ASP", "RPT", 2, "SUMMARY")).await;
    assert_eq!(response[38], b'A');
    assert_eq!(&response[46..], b"NORMAL");

    let response = exchange(&client, harness.addr, &frame_to("ASP", "FIL", 3, "00102")).await;
    assert_eq!(response[38], b'A');
    harness.controller.quiesce().await;

    let response = exchange(
        &client,
        harness.addr,
        &frame_to("ASP", "RPT", 4, "FILTER_001"),
    )
    .await;
    assert_eq!(&response[46..], b"2");

    harness.shutdown().await;
}

#[tokio::test]
async fn frames_addressed_elsewhere_are_ignored() {
    let harness = Harness::start().await;
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client
        .send_to(&frame_to("SHL", "PNG", 1, ""), harness.addr)
        .await
        .unwrap();
    let mut buf = [0u8; 256];
    let silent = tokio::time::timeout(Duration::from_millis(200), client.recv_from(&mut buf)).await;
    assert!(silent.is_err(), "expected no response for foreign frame");

    // Broadcast destination is always accepted.
    let response = exchange(&client, harness.addr, &frame_to("ALL", "PNG", 2, "")).await;
    assert_eq!(&response[6..9], b"PNG");
    assert_eq!(response[38], b'A');

    harness.shutdown().await;
}
