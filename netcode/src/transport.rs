//! Transport contract. No concrete transport (KCP, TCP, libuv, ...) lives in this
//! crate; `ServerCore` is generic over anything that implements [`Transport`].

/// Delivery guarantee requested for a send. Transports map this onto whatever concept
/// they use internally (e.g. a reliable-ordered vs. unreliable-unordered KCP stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Reliable,
    Unreliable,
}

pub type ConnectionId = u64;

/// Events the transport reports to the server, all expected to arrive on the same
/// thread that drives [`Transport::tick`].
pub trait TransportEvents {
    fn on_connected(&mut self, connection: ConnectionId);
    fn on_data(&mut self, connection: ConnectionId, data: &[u8]);
    fn on_disconnected(&mut self, connection: ConnectionId);
}

/// A transport implementation: owns sockets/polling, delivers events through
/// [`TransportEvents`] during [`Transport::tick`].
pub trait Transport {
    fn start(&mut self) -> bool;
    fn stop(&mut self);
    fn is_active(&self) -> bool;

    /// Sends `data` on `channel` to `connection`. Returns `false` on a hard failure;
    /// the caller marks the connection broken and disconnects it.
    fn send(&mut self, connection: ConnectionId, data: &[u8], channel: Channel) -> bool;
    fn disconnect(&mut self, connection: ConnectionId);

    /// Largest payload a single `send` can carry; batches are sized to this.
    fn max_packet_size(&self) -> usize;
    fn get_address(&self, connection: ConnectionId) -> Option<String>;

    /// Pumps the transport's event loop once, delivering any pending events through
    /// `events` before returning.
    fn tick(&mut self, events: &mut dyn TransportEvents);
}
