//! I/O worker (section 5's "C5"): owns the transport on a dedicated thread so the game loop
//! never blocks on socket I/O. Commands flow in, events flow out, both through bounded
//! lock-free queues; the worker polls at a fixed interval rather than tying its pace to
//! whatever the simulation thread happens to be doing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use crate::net::transport::{Channel, ClientTransport, ServerTransport, TransportEvent};
use crate::net::types::PeerId;

/// Depth shared by every queue the worker touches. Bounded rather than unbounded: a peer
/// that floods faster than the simulation can drain simply starts losing unreliable-channel
/// messages at the queue instead of growing memory without limit.
pub const QUEUE_CAPACITY: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct RawMessage {
    pub peer: PeerId,
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum WorkerCommand {
    Send(RawMessage),
    Disconnect(PeerId),
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Message(RawMessage),
    Connected(PeerId),
    Disconnected(PeerId),
}

#[derive(Default)]
pub struct WorkerStats {
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
}

/// Handle held by the game loop. Dropping it does not stop the thread by itself; call
/// `stop` and then `join` for an orderly shutdown.
pub struct IoWorker {
    commands: Arc<ArrayQueue<WorkerCommand>>,
    events: Arc<ArrayQueue<WorkerEvent>>,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
}

impl IoWorker {
    /// Spawns the worker thread, handing it ownership of the transport.
    pub fn spawn(mut transport: ServerTransport) -> IoWorker {
        let commands = Arc::new(ArrayQueue::new(QUEUE_CAPACITY));
        let events = Arc::new(ArrayQueue::new(QUEUE_CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());

        let thread_commands = Arc::clone(&commands);
        let thread_events = Arc::clone(&events);
        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);

        let handle = std::thread::Builder::new()
            .name("netcore-io".to_string())
            .spawn(move || {
                run(
                    &mut transport,
                    &thread_commands,
                    &thread_events,
                    &thread_stop,
                    &thread_stats,
                )
            })
            .expect("failed to spawn io worker thread");

        IoWorker {
            commands,
            events,
            stop,
            stats,
            handle: Some(handle),
        }
    }

    /// Enqueues a command for the worker thread; drops it (and returns `false`) if the
    /// command queue is full, which only happens if the game loop is producing faster than
    /// the worker can drain — a sign something upstream needs its own backpressure.
    pub fn submit(&self, command: WorkerCommand) -> bool {
        self.commands.push(command).is_ok()
    }

    /// Drains every event currently queued, without blocking.
    pub fn drain_events(&self) -> Vec<WorkerEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.events.pop() {
            out.push(event);
        }
        out
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Signals the worker thread to stop after its current poll iteration.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run(
    transport: &mut ServerTransport,
    commands: &ArrayQueue<WorkerCommand>,
    events: &ArrayQueue<WorkerEvent>,
    stop: &AtomicBool,
    stats: &WorkerStats,
) {
    let mut last_tick = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        let elapsed = now.duration_since(last_tick);
        last_tick = now;

        if transport.update(elapsed).is_err() {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        for transport_event in transport.events() {
            let event = match transport_event {
                TransportEvent::Connected(peer) => WorkerEvent::Connected(peer),
                TransportEvent::Disconnected(peer, _reason) => WorkerEvent::Disconnected(peer),
            };
            // Best-effort: a full event queue means the game loop has fallen behind: drop
            // rather than block the socket thread.
            let _ = events.push(event);
        }

        while let Some(command) = commands.pop() {
            match command {
                WorkerCommand::Send(msg) => {
                    stats.bytes_sent.fetch_add(msg.bytes.len() as u64, Ordering::Relaxed);
                    stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    transport.send(msg.peer, msg.channel, &msg.bytes);
                }
                WorkerCommand::Disconnect(peer) => transport.disconnect(peer),
            }
        }

        for peer in transport.connected_peers() {
            for channel in [Channel::Reliable, Channel::Unreliable] {
                while let Some(bytes) = transport.recv(peer, channel) {
                    stats.bytes_received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    stats.messages_received.fetch_add(1, Ordering::Relaxed);
                    let _ = events.push(WorkerEvent::Message(RawMessage { peer, channel, bytes }));
                }
            }
        }

        let _ = transport.send_packets();

        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Client-side counterpart to `RawMessage`: a single connection has no peer to distinguish.
#[derive(Debug, Clone)]
pub struct ClientRawMessage {
    pub channel: Channel,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum ClientWorkerCommand {
    Send(ClientRawMessage),
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum ClientWorkerEvent {
    Message(ClientRawMessage),
    Connected,
    Disconnected,
}

/// Same polling-thread design as `IoWorker` (section 5's "C5"), specialized to the single
/// outbound `ClientTransport` connection the client core drives (section 4.10's "C10").
pub struct ClientIoWorker {
    commands: Arc<ArrayQueue<ClientWorkerCommand>>,
    events: Arc<ArrayQueue<ClientWorkerEvent>>,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
}

impl ClientIoWorker {
    pub fn spawn(mut transport: ClientTransport) -> ClientIoWorker {
        let commands = Arc::new(ArrayQueue::new(QUEUE_CAPACITY));
        let events = Arc::new(ArrayQueue::new(QUEUE_CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());

        let thread_commands = Arc::clone(&commands);
        let thread_events = Arc::clone(&events);
        let thread_stop = Arc::clone(&stop);
        let thread_stats = Arc::clone(&stats);

        let handle = std::thread::Builder::new()
            .name("netcore-client-io".to_string())
            .spawn(move || {
                run_client(
                    &mut transport,
                    &thread_commands,
                    &thread_events,
                    &thread_stop,
                    &thread_stats,
                )
            })
            .expect("failed to spawn client io worker thread");

        ClientIoWorker {
            commands,
            events,
            stop,
            stats,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, command: ClientWorkerCommand) -> bool {
        self.commands.push(command).is_ok()
    }

    pub fn drain_events(&self) -> Vec<ClientWorkerEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.events.pop() {
            out.push(event);
        }
        out
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ClientIoWorker {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run_client(
    transport: &mut ClientTransport,
    commands: &ArrayQueue<ClientWorkerCommand>,
    events: &ArrayQueue<ClientWorkerEvent>,
    stop: &AtomicBool,
    stats: &WorkerStats,
) {
    let mut last_tick = Instant::now();
    let mut was_connected = false;

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        let elapsed = now.duration_since(last_tick);
        last_tick = now;

        if transport.update(elapsed).is_err() {
            std::thread::sleep(POLL_INTERVAL);
            continue;
        }

        let is_connected = transport.is_connected();
        if is_connected && !was_connected {
            let _ = events.push(ClientWorkerEvent::Connected);
        } else if !is_connected && was_connected {
            let _ = events.push(ClientWorkerEvent::Disconnected);
        }
        was_connected = is_connected;

        while let Some(command) = commands.pop() {
            match command {
                ClientWorkerCommand::Send(msg) => {
                    stats.bytes_sent.fetch_add(msg.bytes.len() as u64, Ordering::Relaxed);
                    stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                    transport.send(msg.channel, &msg.bytes);
                }
                ClientWorkerCommand::Disconnect => break,
            }
        }

        if is_connected {
            for channel in [Channel::Reliable, Channel::Unreliable] {
                while let Some(bytes) = transport.recv(channel) {
                    stats.bytes_received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                    stats.messages_received.fetch_add(1, Ordering::Relaxed);
                    let _ = events.push(ClientWorkerEvent::Message(ClientRawMessage { channel, bytes }));
                }
            }
        }

        let _ = transport.send_packets();

        std::thread::sleep(POLL_INTERVAL);
    }
}
