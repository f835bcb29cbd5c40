//! A demonstration in-memory [`Transport`]. It never touches a real socket: events are
//! injected by test/demo code through `simulate_*`, and outgoing bytes are staged into a
//! per-connection [`netcode::buffer::Buffer`] instead of a socket, so `gamerunner` is
//! runnable end to end without a concrete KCP/TCP/libuv binding.

use hashbrown::HashMap;
use netcode::buffer::Buffer;
use netcode::transport::{Channel, ConnectionId, Transport, TransportEvents};

const EGRESS_CAPACITY: usize = 65536;

enum PendingEvent {
    Connected(ConnectionId),
    Data(ConnectionId, Vec<u8>),
    Disconnected(ConnectionId),
}

pub struct InMemoryTransport {
    active: bool,
    mtu: usize,
    pending: Vec<PendingEvent>,
    egress: HashMap<ConnectionId, Buffer>,
    disconnect_requests: Vec<ConnectionId>,
}

impl InMemoryTransport {
    pub fn new(mtu: usize) -> InMemoryTransport {
        InMemoryTransport {
            active: false,
            mtu,
            pending: Vec::new(),
            egress: HashMap::new(),
            disconnect_requests: Vec::new(),
        }
    }

    /// Queues a simulated `on_connected` event, delivered on the next `tick`.
    pub fn simulate_connect(&mut self, connection: ConnectionId) {
        self.pending.push(PendingEvent::Connected(connection));
        self.egress.insert(connection, Buffer::new(EGRESS_CAPACITY));
    }

    /// Queues a simulated inbound frame, delivered on the next `tick`.
    pub fn simulate_data(&mut self, connection: ConnectionId, data: Vec<u8>) {
        self.pending.push(PendingEvent::Data(connection, data));
    }

    /// Queues a simulated `on_disconnected` event, delivered on the next `tick`.
    pub fn simulate_disconnect(&mut self, connection: ConnectionId) {
        self.pending.push(PendingEvent::Disconnected(connection));
    }

    /// Bytes queued for `connection` via [`Transport::send`] but not yet drained by a
    /// test/demo harness reading the egress buffer.
    pub fn egress_for(&self, connection: ConnectionId) -> &[u8] {
        self.egress.get(&connection).map(|b| b.read_slice()).unwrap_or(&[])
    }

    pub fn drain_egress(&mut self, connection: ConnectionId) {
        if let Some(buffer) = self.egress.get_mut(&connection) {
            buffer.clear();
        }
    }

    /// Connections the transport itself asked to disconnect (capacity/duplicate
    /// rejection, broken-connection teardown), drained by the caller once per tick.
    pub fn take_disconnect_requests(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.disconnect_requests)
    }
}

impl Transport for InMemoryTransport {
    fn start(&mut self) -> bool {
        self.active = true;
        true
    }

    fn stop(&mut self) {
        self.active = false;
        self.egress.clear();
        self.pending.clear();
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8], _channel: Channel) -> bool {
        match self.egress.get_mut(&connection) {
            Some(buffer) => {
                let mut cursor = data;
                buffer.ingress(&mut cursor).is_ok()
            }
            None => false,
        }
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        self.disconnect_requests.push(connection);
        self.egress.remove(&connection);
    }

    fn max_packet_size(&self) -> usize {
        self.mtu
    }

    fn get_address(&self, connection: ConnectionId) -> Option<String> {
        if self.egress.contains_key(&connection) {
            Some(format!("memory://{}", connection))
        } else {
            None
        }
    }

    fn tick(&mut self, events: &mut dyn TransportEvents) {
        for event in self.pending.drain(..) {
            match event {
                PendingEvent::Connected(id) => events.on_connected(id),
                PendingEvent::Data(id, data) => events.on_data(id, &data),
                PendingEvent::Disconnected(id) => events.on_disconnected(id),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcode::server::EventQueue;

    #[test]
    fn tick_delivers_queued_events_in_order() {
        let mut transport = InMemoryTransport::new(512);
        transport.simulate_connect(1);
        transport.simulate_data(1, vec![0xAB]);
        transport.simulate_disconnect(1);

        let mut queue = EventQueue::default();
        transport.tick(&mut queue);
        assert_eq!(queue.events.len(), 3);
    }

    #[test]
    fn send_stages_bytes_into_the_connections_egress_buffer() {
        let mut transport = InMemoryTransport::new(512);
        transport.simulate_connect(1);
        let mut queue = EventQueue::default();
        transport.tick(&mut queue);

        assert!(transport.send(1, &[1, 2, 3], Channel::Reliable));
        assert_eq!(transport.egress_for(1), &[1, 2, 3]);
    }
}
