//! Subsystem controller daemon backed by the simulated chassis bus.

use aspctl::server::{bind_command_socket, spawn_receive_loop, UdpResponseSink};
use aspctl::{AspController, BusDriver, Config, Dispatcher, RetryPolicy, SimulatedBus};
use clap::{App, Arg};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let matches = App::new("aspd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Analog signal conditioning subsystem controller")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Override the bind address")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!(%err, path, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(addr) = matches.value_of("bind") {
        config.bind_address = addr.to_string();
    }

    let socket = match bind_command_socket(&config.bind_address).await {
        Ok(socket) => socket,
        Err(err) => {
            error!(%err, "startup failed");
            std::process::exit(1);
        }
    };

    let bus: Arc<dyn BusDriver> = Arc::new(SimulatedBus::new(config.boards_expected));
    let retry = RetryPolicy {
        max_attempts: config.send_retry_limit,
        backoff: config.send_retry_backoff(),
    };
    let subsystem = config.subsystem.clone();
    let controller = AspController::new(config, bus);

    let dispatcher = Dispatcher::spawn(
        controller.clone(),
        UdpResponseSink::new(Arc::clone(&socket)),
        retry,
    );
    let receiver = spawn_receive_loop(socket, subsystem, dispatcher.sender());

    info!("controller running, awaiting commands");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    receiver.abort();
    dispatcher.stop().await;
    controller.stop_monitors().await;
    controller.quiesce().await;
}
