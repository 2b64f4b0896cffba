//! Transport abstraction (section 5's "C4"): a thin seam between the message layer and the
//! actual datagram channel, so the server and client cores exercise the same code path
//! whether they are talking over real UDP (`renet`) or to an in-process test double.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use corenet::shared::{ErrorType, NetworkError, NetworkResult};
use renet::{
    ChannelConfig, ConnectionConfig, DefaultChannel, RenetClient, RenetConnectionConfig, RenetServer,
    ServerConfig, ServerEvent,
};

use crate::net::types::PeerId;

/// Two channels, matching `renet`'s own reliable/unreliable split (section 4.4's "Channel"
/// concept): gameplay input and connection lifecycle traffic goes over `Reliable` so nothing
/// is silently dropped; high-frequency state broadcasts go over `Unreliable` since a missed
/// one is superseded by the next tick's snapshot anyway.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Channel {
    Reliable = 0,
    Unreliable = 1,
}

impl Channel {
    fn to_renet(self) -> u8 {
        match self {
            Channel::Reliable => DefaultChannel::Reliable as u8,
            Channel::Unreliable => DefaultChannel::Unreliable as u8,
        }
    }
}

/// Connection lifecycle notifications surfaced by the transport, consumed by the server
/// core (C8) to drive its own peer bookkeeping.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected(PeerId),
    Disconnected(PeerId, String),
}

fn connection_config() -> RenetConnectionConfig {
    RenetConnectionConfig {
        send_channels_config: vec![
            ChannelConfig::default(),
            ChannelConfig::default(),
        ],
        receive_channels_config: vec![
            ChannelConfig::default(),
            ChannelConfig::default(),
        ],
        ..Default::default()
    }
}

/// Server-side half of the transport: binds one UDP socket and fans datagrams out to many
/// peers, identified by the session's own `PeerId` rather than a raw socket address (section
/// 4.4: peer identity survives address changes across a reconnect).
pub struct ServerTransport {
    socket: RenetServer,
}

impl ServerTransport {
    pub fn bind(addr: SocketAddr, max_clients: usize) -> NetworkResult<ServerTransport> {
        let udp = UdpSocket::bind(addr).map_err(NetworkError::from)?;
        let server_config = ServerConfig::new(max_clients, 0, addr, [0u8; 256]);
        let socket = RenetServer::new(
            Duration::from_millis(0),
            server_config,
            connection_config(),
            udp,
        )
        .map_err(|_| NetworkError::Fatal(ErrorType::Io(std::io::ErrorKind::Other)))?;

        Ok(ServerTransport { socket })
    }

    /// Pumps socket I/O and internal bookkeeping. Must be called once per server tick before
    /// `events`/`recv` report anything new.
    pub fn update(&mut self, elapsed: Duration) -> NetworkResult<()> {
        self.socket.update(elapsed).map_err(|_| NetworkError::Fatal(ErrorType::Io(std::io::ErrorKind::Other)))
    }

    pub fn events(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.socket.get_event() {
            match event {
                ServerEvent::ClientConnected(id, _) => out.push(TransportEvent::Connected(id as PeerId)),
                ServerEvent::ClientDisconnected(id) => {
                    out.push(TransportEvent::Disconnected(id as PeerId, "transport closed".to_string()))
                }
            }
        }
        out
    }

    pub fn send(&mut self, peer: PeerId, channel: Channel, bytes: &[u8]) {
        self.socket.send_message(peer as u64, channel.to_renet(), bytes.to_vec());
    }

    pub fn recv(&mut self, peer: PeerId, channel: Channel) -> Option<Vec<u8>> {
        self.socket.receive_message(peer as u64, channel.to_renet())
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.socket.clients_id().into_iter().map(|id| id as PeerId).collect()
    }

    pub fn disconnect(&mut self, peer: PeerId) {
        self.socket.disconnect(peer as u64);
    }

    pub fn send_packets(&mut self) -> NetworkResult<()> {
        self.socket
            .send_packets()
            .map_err(|_| NetworkError::Fatal(ErrorType::Io(std::io::ErrorKind::Other)))
    }
}

/// Client-side half of the transport: a single outbound connection to one server.
pub struct ClientTransport {
    socket: RenetClient,
}

impl ClientTransport {
    pub fn connect(local_addr: SocketAddr, server_addr: SocketAddr, client_id: u64) -> NetworkResult<ClientTransport> {
        let udp = UdpSocket::bind(local_addr).map_err(NetworkError::from)?;
        let socket = RenetClient::new(
            Duration::from_millis(0),
            udp,
            server_addr,
            client_id,
            connection_config(),
            ConnectionConfig::default(),
        )
        .map_err(|_| NetworkError::Fatal(ErrorType::Io(std::io::ErrorKind::Other)))?;

        Ok(ClientTransport { socket })
    }

    pub fn update(&mut self, elapsed: Duration) -> NetworkResult<()> {
        self.socket
            .update(elapsed)
            .map_err(|_| NetworkError::Fatal(ErrorType::Io(std::io::ErrorKind::Other)))
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn send(&mut self, channel: Channel, bytes: &[u8]) {
        self.socket.send_message(channel.to_renet(), bytes.to_vec());
    }

    pub fn recv(&mut self, channel: Channel) -> Option<Vec<u8>> {
        self.socket.receive_message(channel.to_renet())
    }

    pub fn send_packets(&mut self) -> NetworkResult<()> {
        self.socket
            .send_packets()
            .map_err(|_| NetworkError::Fatal(ErrorType::Io(std::io::ErrorKind::Other)))
    }
}

/// In-memory test double standing in for a single peer's pair of channels, used by C8/C9/C10
/// unit tests that need to exercise message flow without binding real sockets (section 5's
/// note that the transport seam should be swappable for tests).
#[derive(Default)]
pub struct LoopbackTransport {
    inbound: std::collections::VecDeque<Vec<u8>>,
    outbound: std::collections::VecDeque<Vec<u8>>,
}

impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        LoopbackTransport {
            inbound: std::collections::VecDeque::new(),
            outbound: std::collections::VecDeque::new(),
        }
    }

    /// Feeds a datagram as though it had just arrived from the peer.
    pub fn push_inbound(&mut self, bytes: Vec<u8>) {
        self.inbound.push_back(bytes);
    }

    pub fn send(&mut self, _channel: Channel, bytes: &[u8]) {
        self.outbound.push_back(bytes.to_vec());
    }

    pub fn recv(&mut self, _channel: Channel) -> Option<Vec<u8>> {
        self.inbound.pop_front()
    }

    /// Drains what was sent, for assertions in tests.
    pub fn drain_outbound(&mut self) -> Vec<Vec<u8>> {
        self.outbound.drain(..).collect()
    }
}
