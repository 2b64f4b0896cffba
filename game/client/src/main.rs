//! The `gameclient` binary: a headless driver for `clientcore::ClientCore` (section 4.10's
//! "C10"). Connects to a `gamerunner` server, joins, and periodically submits a harmless
//! game-control input so the connection and its pending-action tracking stay exercised.
//! There is no rendering or input device here — a real UI would sit where the scripted
//! `maybe_submit_demo_input` call is, reading `ClientCore`'s state instead of timer-driven
//! stubbing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{App, Arg};

use corenet::logging::{self, info, warn};
use netcore::ioworker::{ClientIoWorker, ClientWorkerCommand, ClientWorkerEvent};
use netcore::net::transport::ClientTransport;
use netcore::net::types::InputType;
use registry::Registry;

use clientcore::client::{ClientCore, ClientState};
use clientcore::config::ClientConfig;

const TICK_INTERVAL: Duration = Duration::from_millis(50);
const DEMO_INPUT_INTERVAL: Duration = Duration::from_secs(5);

fn main() {
    let matches = App::new("gameclient")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Connects a headless client to a city-sim network core server.")
        .arg(
            Arg::with_name("SERVER")
                .help("Server address, host:port")
                .required(true),
        )
        .arg(
            Arg::with_name("name")
                .long("name")
                .takes_value(true)
                .help("Player name offered on join"),
        )
        .get_matches();

    let server_addr: SocketAddr = matches
        .value_of("SERVER")
        .unwrap()
        .parse()
        .expect("SERVER must be a valid host:port");

    let mut config = ClientConfig::default();
    if let Some(name) = matches.value_of("name") {
        config.player_name = name.to_string();
    }

    let log = logging::init(&config.logging);
    let mut client_id = [0u8; 8];
    corenet::crypto::random_bytes(&mut client_id);
    let client_id = u64::from_le_bytes(client_id);

    let mut io_worker = connect(server_addr, client_id, &log);
    let mut client = ClientCore::new(config, log.new(logging::o!()));
    let mut registry = Registry::new();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .expect("failed to install Ctrl-C handler");
    }

    let mut reconnect_at: Option<Instant> = None;
    let mut last_demo_input = Instant::now();
    let mut outbound = Vec::new();
    let mut tick: u64 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        if let Some(at) = reconnect_at {
            if Instant::now() >= at {
                info!(log, "reconnect delay elapsed, re-establishing transport");
                io_worker.stop();
                io_worker.join();
                io_worker = connect(server_addr, client_id, &log);
                reconnect_at = None;
            }
        }

        for event in io_worker.drain_events() {
            if matches!(event, ClientWorkerEvent::Connected) && client.player_id().is_none() {
                client.connect(&mut outbound);
            } else {
                client.handle_worker_event(event, &mut registry, &mut outbound);
            }
        }

        client.tick(&mut outbound);

        if let Some(delay_ms) = client.take_reconnect_delay_ms() {
            reconnect_at = Some(Instant::now() + Duration::from_millis(delay_ms));
        }

        if client.state() == ClientState::Connected && last_demo_input.elapsed() >= DEMO_INPUT_INTERVAL {
            last_demo_input = Instant::now();
            maybe_submit_demo_input(&mut client, tick, &mut outbound);
        }

        for message in outbound.drain(..) {
            if !io_worker.submit(ClientWorkerCommand::Send(message)) {
                warn!(log, "outbound queue full, dropping message");
            }
        }

        tick = tick.wrapping_add(1);
        std::thread::sleep(TICK_INTERVAL);
    }

    info!(log, "shutdown requested, disconnecting");
    io_worker.submit(ClientWorkerCommand::Disconnect);
    io_worker.stop();
    io_worker.join();
}

fn connect(server_addr: SocketAddr, client_id: u64, log: &logging::Logger) -> ClientIoWorker {
    let local_addr: SocketAddr = "0.0.0.0:0".parse().unwrap();
    let transport = ClientTransport::connect(local_addr, server_addr, client_id)
        .unwrap_or_else(|err| panic!("failed to connect to {}: {:?}", server_addr, err));
    info!(log, "transport connecting"; "server" => %server_addr);
    ClientIoWorker::spawn(transport)
}

/// Stands in for whatever UI affordance would normally produce an `Input` (section 4.10's
/// queues are meant to be read by an application, not driven by a timer like this).
fn maybe_submit_demo_input(client: &mut ClientCore, tick: u64, outbound: &mut clientcore::client::OutboundQueue) {
    client.submit_input(tick, InputType::SetSimulationSpeed, 0, 0, 1, 0, 0, outbound);
}
