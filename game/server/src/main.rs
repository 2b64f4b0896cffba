//! The `gamerunner` binary: loads configuration, brings up the transport on its own I/O
//! worker thread (section 4.5/5), and drives `servercore::ServerCore` at a fixed tick rate
//! until interrupted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{App, Arg};

use corenet::logging::{self, info, warn};
use netcore::ioworker::IoWorker;
use netcore::net::transport::ServerTransport;
use registry::Registry;
use servercore::server::ServerCore;

use gamecore::config::GameConfig;
use gamecore::handlers::build_input_handler;

const DEFAULT_CONFIG_NAME: &str = "game_config.toml";

fn main() {
    let matches = App::new("gamerunner")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the city-sim network core server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the game configuration file")
                .required(false),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .help("Overrides the configured listen port"),
        )
        .get_matches();

    let mut config = match matches.value_of("CONFIG_FILE") {
        Some(path) => GameConfig::load(path),
        None => GameConfig::load(DEFAULT_CONFIG_NAME),
    };

    if let Some(port) = matches.value_of("port") {
        config.server.listen_port = port.parse().expect("port must be a valid u16");
    }

    let log = logging::init(&config.server.logging);

    info!(log, "starting gamerunner"; "port" => config.server.listen_port, "max_players" => config.server.max_players);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server.listen_port)
        .parse()
        .expect("failed to parse listen address");

    let transport = ServerTransport::bind(addr, config.server.max_players as usize)
        .unwrap_or_else(|err| panic!("failed to bind transport on {}: {:?}", addr, err));

    let mut io_worker = IoWorker::spawn(transport);

    let mut registry = Registry::new();
    let bounds = gamecore::config::world_bounds_tiles(config.server.map_size_tier);
    let mut server = ServerCore::new(config.server.clone(), config.simulation.terrain_seed, log.new(logging::o!()));

    server.register_handler(Box::new(build_input_handler(bounds.0, bounds.1)));
    server.start();
    server.set_running();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("failed to install Ctrl-C handler");
    }

    let tick_duration = Duration::from_millis(1000 / config.simulation.fps.max(1));
    let mut tick: u64 = 0;
    let mut outbound = Vec::new();

    while !shutdown.load(Ordering::SeqCst) {
        let frame_start = Instant::now();

        for event in io_worker.drain_events() {
            server.handle_worker_event(event, &mut registry, tick, &mut outbound);
        }

        server.tick(&mut registry, tick, &mut outbound);

        for message in outbound.drain(..) {
            if !io_worker.submit(netcore::ioworker::WorkerCommand::Send(message)) {
                warn!(log, "outbound queue full, dropping message");
            }
        }

        tick = tick.wrapping_add(1);

        let elapsed = frame_start.elapsed();
        if elapsed < tick_duration {
            std::thread::sleep(tick_duration - elapsed);
        }
    }

    info!(log, "shutdown requested, stopping server");
    server.stop(&mut registry, &mut outbound);
    for message in outbound.drain(..) {
        io_worker.submit(netcore::ioworker::WorkerCommand::Send(message));
    }
    io_worker.stop();
    io_worker.join();
}
