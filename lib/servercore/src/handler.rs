//! Handler routing (section 4.8): a list of handler objects consulted in registration
//! order, each declaring which message types it handles. System messages (Join, Reconnect,
//! Heartbeat, Disconnect) never reach this list — the server core handles them internally.
//! Everything else (gameplay messages such as Input) goes through here.

use netcore::net::buffer::ByteBuffer;
use netcore::net::envelope::MessageType;
use netcore::net::transport::Channel;
use netcore::net::types::{PlayerId, Tick};

use corenet::shared::NetworkResult;
use registry::Registry;

/// Accumulates outbound sends a handler wants to make; the server core drains it into the
/// I/O worker's outbound queue once the handler returns (handlers never touch the transport
/// or the I/O worker directly).
#[derive(Default)]
pub struct Outbox {
    sends: Vec<(PlayerId, Channel, Vec<u8>)>,
}

impl Outbox {
    pub fn new() -> Outbox {
        Outbox::default()
    }

    pub fn send_to(&mut self, player: PlayerId, channel: Channel, bytes: Vec<u8>) {
        self.sends.push((player, channel, bytes));
    }

    pub fn drain(&mut self) -> Vec<(PlayerId, Channel, Vec<u8>)> {
        std::mem::take(&mut self.sends)
    }
}

/// A handler specialized to one or more gameplay message types (section 4.8/4.9).
pub trait NetworkHandler {
    fn handled_types(&self) -> &'static [MessageType];

    fn handles(&self, msg_type: MessageType) -> bool {
        self.handled_types().contains(&msg_type)
    }

    fn handle(
        &mut self,
        player_id: PlayerId,
        msg_type: MessageType,
        payload: &mut ByteBuffer,
        registry: &mut Registry,
        tick: Tick,
        outbox: &mut Outbox,
    ) -> NetworkResult<()>;

    /// Called once a player permanently leaves (explicit disconnect, kick, or session
    /// expiry), never on a transient network drop a reconnect might still recover from.
    /// The default is a no-op; `InputHandler` overrides it to roll back pending actions.
    fn on_disconnect(&mut self, _player_id: PlayerId, _registry: &mut Registry) {}
}
