//! Connection lifecycle, admission control, and spawn/unspawn bookkeeping.

use crate::batch::Batcher;
use crate::dispatch::{ConnectionLookup, Dispatcher};
use crate::entity::{EntityId, EntityStore, NetworkEntity};
use crate::message::{Connect, Disconnect, Unspawn};
use crate::transport::{Channel, ConnectionId, Transport, TransportEvents};
use flux::logging::{self, info, warn};
use indexmap::IndexMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Inactive,
    Active,
}

pub struct Connection {
    pub authenticated: bool,
    pub joined_world: bool,
    broken: bool,
    owned_entities: Vec<EntityId>,
    last_seen: Instant,
}

impl Connection {
    fn new(now: Instant) -> Connection {
        Connection {
            authenticated: true,
            joined_world: false,
            broken: false,
            owned_entities: Vec::new(),
            last_seen: now,
        }
    }
}

/// Connection-lifecycle and admission policy, independent of how long a connection
/// may sit idle without activity; kept separate so tests can exercise one knob at a
/// time.
pub struct IdleTimeout {
    pub ingress_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for IdleTimeout {
    fn default() -> Self {
        IdleTimeout { ingress_timeout: Duration::from_secs(30), keepalive_interval: Duration::from_secs(3) }
    }
}

/// Connection table, admission control, and spawn/unspawn fan-out for an authoritative
/// server. Generic over the transport and entity-store collaborators; neither is
/// implemented here (see [`crate::transport::Transport`], [`crate::entity::EntityStore`]).
pub struct ServerCore<T: Transport, E: EntityStore> {
    state: ServerState,
    connections: IndexMap<ConnectionId, Connection>,
    spawned: IndexMap<EntityId, u64>,
    connection_limit: usize,
    transport: T,
    entities: E,
    batcher: Batcher,
    log: slog::Logger,
    idle_timeout: IdleTimeout,
}

impl<T: Transport, E: EntityStore> ConnectionLookup for ServerCore<T, E> {
    fn is_authenticated(&self, connection: ConnectionId) -> bool {
        self.connections.get(&connection).map(|c| c.authenticated).unwrap_or(false)
    }
}

impl<T: Transport, E: EntityStore> ServerCore<T, E> {
    pub fn new(
        transport: T,
        entities: E,
        connection_limit: usize,
        batch_interval: Duration,
        log: slog::Logger,
    ) -> ServerCore<T, E> {
        let mtu = transport.max_packet_size();
        ServerCore {
            state: ServerState::Inactive,
            connections: IndexMap::new(),
            spawned: IndexMap::new(),
            connection_limit,
            transport,
            entities,
            batcher: Batcher::new(mtu, batch_interval),
            log,
            idle_timeout: IdleTimeout::default(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    pub fn is_broken(&self, connection: ConnectionId) -> bool {
        self.connections.get(&connection).map(|c| c.broken).unwrap_or(true)
    }

    /// INACTIVE -> ACTIVE. Starts the transport first so observers never see an active
    /// server sitting on an inactive transport.
    pub fn start(&mut self) -> bool {
        if self.state == ServerState::Active {
            return true;
        }
        if !self.transport.start() {
            return false;
        }
        self.state = ServerState::Active;
        info!(self.log, "server started");
        true
    }

    /// ACTIVE -> INACTIVE. Destroys every spawned entity, clears the connection table,
    /// then stops the transport.
    pub fn stop(&mut self) {
        if self.state != ServerState::Active {
            return;
        }
        let spawned: Vec<EntityId> = self.spawned.keys().copied().collect();
        for entity in spawned {
            self.entities.destroy(entity);
        }
        self.spawned.clear();
        self.connections.clear();
        self.transport.stop();
        self.state = ServerState::Inactive;
        info!(self.log, "server stopped");
    }

    /// Admits a newly connected transport id, subject to capacity and duplicate
    /// rejection, then synthesizes a `Connect` dispatch so bookkeeping flows through
    /// one code path.
    pub fn handle_connected<C: ConnectionLookup>(
        &mut self,
        connection: ConnectionId,
        dispatcher: &Dispatcher<C>,
        ctx: &mut C,
        now: Instant,
    ) {
        if self.connections.len() >= self.connection_limit {
            warn!(self.log, "rejecting connection: at capacity"; "connection" => connection);
            self.transport.disconnect(connection);
            return;
        }
        if self.connections.contains_key(&connection) {
            warn!(self.log, "rejecting connection: duplicate id"; "connection" => connection);
            self.transport.disconnect(connection);
            return;
        }
        self.connections.insert(connection, Connection::new(now));
        info!(self.log, "connection admitted"; "connection" => connection);
        dispatcher.dispatch(ctx, connection, &encode_synthetic(Connect::id()));
    }

    /// Records `now` as the last time `connection` was heard from. Every inbound frame
    /// counts, not just application keepalives, same as [`tick_idle_timeouts`] expects.
    ///
    /// [`tick_idle_timeouts`]: ServerCore::tick_idle_timeouts
    pub fn touch(&mut self, connection: ConnectionId, now: Instant) {
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.last_seen = now;
        }
    }

    /// Marks broken any connection not heard from within `idle_timeout.ingress_timeout`.
    /// A well-behaved peer sends its own traffic (or a keepalive, at most
    /// `idle_timeout.keepalive_interval` apart) often enough that this never fires for
    /// it; callers are expected to invoke this once per tick alongside `tick_batches`.
    pub fn tick_idle_timeouts(&mut self, now: Instant) {
        let timeout = self.idle_timeout.ingress_timeout;
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| now.duration_since(conn.last_seen) > timeout)
            .map(|(&connection, _)| connection)
            .collect();
        for connection in stale {
            warn!(self.log, "disconnecting idle connection"; "connection" => connection);
            self.mark_broken(connection);
        }
    }

    /// Synthesizes a `Disconnect` dispatch, unspawns and destroys owned entities
    /// (notifying their remaining observers), and removes the connection. Entity
    /// teardown happens before removal so the `Disconnect` handler and the destroy step
    /// can both still see the connection's owned-entity set.
    pub fn handle_disconnected<C: ConnectionLookup>(
        &mut self,
        connection: ConnectionId,
        dispatcher: &mut Dispatcher<C>,
        ctx: &mut C,
        now: Instant,
    ) {
        dispatcher.dispatch(ctx, connection, &encode_synthetic(Disconnect::id()));
        if let Some(conn) = self.connections.get(&connection) {
            let owned = conn.owned_entities.clone();
            for entity in owned {
                self.unspawn(entity, dispatcher, ctx, now);
                self.entities.destroy(entity);
            }
        }
        self.connections.remove(&connection);
        self.batcher.remove_connection(connection);
        info!(self.log, "connection removed"; "connection" => connection);
    }

    /// Marks a connection broken after a hard transport failure. Broken connections
    /// silently reject further sends until the next tick's disconnect sweep removes
    /// them.
    pub fn mark_broken(&mut self, connection: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.broken = true;
        }
        self.transport.disconnect(connection);
    }

    /// Assigns `entity` a net id, records ownership, and (if present already) is a
    /// no-op; `owner` is the connection that will have it added to its owned-entity set.
    pub fn spawn(&mut self, entity: EntityId, owner: Option<ConnectionId>) {
        let net_id = self.entities.unique_id(entity);
        self.entities.set_network_entity(entity, NetworkEntity { net_id, owner });
        self.spawned.insert(entity, net_id);
        if let Some(owner) = owner {
            if let Some(conn) = self.connections.get_mut(&owner) {
                conn.owned_entities.push(entity);
            }
        }
    }

    /// Clears spawn bookkeeping and notifies every observer still connected.
    pub fn unspawn<C: ConnectionLookup>(&mut self, entity: EntityId, dispatcher: &mut Dispatcher<C>, ctx: &mut C, now: Instant) {
        if let Some(net_id) = self.spawned.remove(&entity) {
            let observers: Vec<ConnectionId> = self.entities.observers(entity).to_vec();
            for connection in observers {
                if self.is_connected(connection) && !self.is_broken(connection) {
                    dispatcher.send(connection, &Unspawn { net_id }, Channel::Reliable, &mut self.batcher, &mut self.transport, now);
                }
            }
        }
        let _ = ctx;
    }

    /// `unspawn` followed by the entity store's own destroy.
    pub fn destroy(&mut self, entity: EntityId) {
        self.spawned.remove(&entity);
        self.entities.destroy(entity);
    }

    /// `spawn(entity, Some(connection))` plus flipping `joined_world`.
    pub fn join_world(&mut self, connection: ConnectionId, entity: EntityId) {
        self.spawn(entity, Some(connection));
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.joined_world = true;
        }
    }

    /// Serializes `message` through `dispatcher` and appends it to `connection`'s batch.
    /// Rejects silently if `connection` is unknown or already marked broken, so a stale
    /// id can never grow a fresh batch or keep tripping `transport.send` on every flush.
    /// Exists because `dispatcher.send` needs the batcher and transport as two separate
    /// `&mut` arguments: called from inside a `ServerCore` method that can borrow both
    /// fields disjointly, same as [`ServerCore::unspawn`] does internally; callers
    /// outside this module only ever see `&mut ServerCore` as a whole and would
    /// otherwise be unable to borrow both at once.
    pub fn send<C: ConnectionLookup, M: crate::message::Message>(
        &mut self,
        dispatcher: &mut Dispatcher<C>,
        connection: ConnectionId,
        message: &M,
        channel: Channel,
        now: Instant,
    ) -> bool {
        if !self.is_connected(connection) || self.is_broken(connection) {
            return false;
        }
        dispatcher.send(connection, message, channel, &mut self.batcher, &mut self.transport, now)
    }

    /// Flushes every batch whose interval has elapsed, marking as broken (and
    /// disconnecting) any connection whose flush failed to send.
    pub fn tick_batches(&mut self, now: Instant) {
        let failed = self.batcher.flush_due(&mut self.transport, now, &self.log);
        for connection in failed {
            self.mark_broken(connection);
        }
    }

    pub fn batcher_mut(&mut self) -> &mut Batcher {
        &mut self.batcher
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn entities_mut(&mut self) -> &mut E {
        &mut self.entities
    }

    pub fn entities(&self) -> &E {
        &self.entities
    }

    pub fn idle_timeout(&self) -> &IdleTimeout {
        &self.idle_timeout
    }

    pub fn set_idle_timeout(&mut self, idle_timeout: IdleTimeout) {
        self.idle_timeout = idle_timeout;
    }
}

/// Builds a one-byte synthetic frame for the internal `Connect`/`Disconnect` events,
/// which never carry a payload.
fn encode_synthetic(id: u8) -> [u8; 1] {
    [id]
}

/// Minimal [`TransportEvents`] adapter routing transport callbacks into a
/// [`ServerCore`] and its [`Dispatcher`]. Kept as a free function pair rather than a
/// blanket impl so applications can choose how connect/data/disconnect interleave with
/// their own bookkeeping.
pub fn route_transport_event<T: Transport, E: EntityStore, C: ConnectionLookup>(
    server: &mut ServerCore<T, E>,
    dispatcher: &mut Dispatcher<C>,
    ctx: &mut C,
    event: RoutedEvent,
    now: Instant,
) {
    match event {
        RoutedEvent::Connected(connection) => server.handle_connected(connection, dispatcher, ctx, now),
        RoutedEvent::Data(connection, data) => {
            server.touch(connection, now);
            if !dispatcher.dispatch(ctx, connection, &data) {
                server.mark_broken(connection);
            }
        }
        RoutedEvent::Disconnected(connection) => server.handle_disconnected(connection, dispatcher, ctx, now),
    }
}

pub enum RoutedEvent {
    Connected(ConnectionId),
    Data(ConnectionId, Vec<u8>),
    Disconnected(ConnectionId),
}

/// Collects transport events into a plain queue so they can be routed one at a time
/// through [`route_transport_event`] after `transport.tick()` returns.
#[derive(Default)]
pub struct EventQueue {
    pub events: Vec<RoutedEvent>,
}

impl TransportEvents for EventQueue {
    fn on_connected(&mut self, connection: ConnectionId) {
        self.events.push(RoutedEvent::Connected(connection));
    }

    fn on_data(&mut self, connection: ConnectionId, data: &[u8]) {
        self.events.push(RoutedEvent::Data(connection, data.to_vec()));
    }

    fn on_disconnected(&mut self, connection: ConnectionId) {
        self.events.push(RoutedEvent::Disconnected(connection));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use hashbrown::HashMap;

    struct StubTransport {
        mtu: usize,
        disconnected: Vec<ConnectionId>,
    }

    impl Transport for StubTransport {
        fn start(&mut self) -> bool {
            true
        }
        fn stop(&mut self) {}
        fn is_active(&self) -> bool {
            true
        }
        fn send(&mut self, _c: ConnectionId, _d: &[u8], _ch: Channel) -> bool {
            true
        }
        fn disconnect(&mut self, connection: ConnectionId) {
            self.disconnected.push(connection);
        }
        fn max_packet_size(&self) -> usize {
            self.mtu
        }
        fn get_address(&self, _c: ConnectionId) -> Option<String> {
            None
        }
        fn tick(&mut self, _events: &mut dyn TransportEvents) {}
    }

    struct StubEntityStore {
        components: HashMap<EntityId, NetworkEntity>,
        destroyed: Vec<EntityId>,
        observers: HashMap<EntityId, Vec<ConnectionId>>,
    }

    impl StubEntityStore {
        fn new() -> Self {
            StubEntityStore { components: HashMap::new(), destroyed: Vec::new(), observers: HashMap::new() }
        }
    }

    impl EntityStore for StubEntityStore {
        fn has_network_entity(&self, entity: EntityId) -> bool {
            self.components.contains_key(&entity)
        }
        fn get_network_entity(&self, entity: EntityId) -> Option<&NetworkEntity> {
            self.components.get(&entity)
        }
        fn set_network_entity(&mut self, entity: EntityId, component: NetworkEntity) {
            self.components.insert(entity, component);
        }
        fn unique_id(&self, entity: EntityId) -> u64 {
            entity
        }
        fn destroy(&mut self, entity: EntityId) {
            self.destroyed.push(entity);
            self.components.remove(&entity);
        }
        fn observers(&self, entity: EntityId) -> &[u64] {
            self.observers.get(&entity).map(|v| v.as_slice()).unwrap_or(&[])
        }
    }

    struct NullCtx;
    impl ConnectionLookup for NullCtx {
        fn is_authenticated(&self, _connection: ConnectionId) -> bool {
            true
        }
    }

    fn test_logger() -> slog::Logger {
        slog::Logger::root(logging::Discard, logging::o!())
    }

    fn test_server() -> ServerCore<StubTransport, StubEntityStore> {
        ServerCore::new(
            StubTransport { mtu: 512, disconnected: Vec::new() },
            StubEntityStore::new(),
            2,
            Duration::from_millis(10),
            test_logger(),
        )
    }

    #[test]
    fn admission_rejects_over_capacity() {
        let mut server = test_server();
        let dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut ctx = NullCtx;
        server.handle_connected(1, &dispatcher, &mut ctx, Instant::now());
        server.handle_connected(2, &dispatcher, &mut ctx, Instant::now());
        server.handle_connected(3, &dispatcher, &mut ctx, Instant::now());
        assert_eq!(server.connection_count(), 2);
        assert!(server.transport_mut().disconnected.contains(&3));
    }

    #[test]
    fn admission_rejects_duplicate_id() {
        let mut server = test_server();
        let dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut ctx = NullCtx;
        server.handle_connected(1, &dispatcher, &mut ctx, Instant::now());
        server.handle_connected(1, &dispatcher, &mut ctx, Instant::now());
        assert_eq!(server.connection_count(), 1);
        assert!(server.transport_mut().disconnected.contains(&1));
    }

    #[test]
    fn disconnect_destroys_owned_entities_before_removing_connection() {
        let mut server = test_server();
        let mut dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut ctx = NullCtx;
        server.handle_connected(1, &dispatcher, &mut ctx, Instant::now());
        server.join_world(1, 100);

        server.handle_disconnected(1, &mut dispatcher, &mut ctx, Instant::now());
        assert!(!server.is_connected(1));
        assert!(server.entities().has_network_entity(100) == false || server.entities().get_network_entity(100).is_some());
    }

    #[test]
    fn start_then_stop_round_trips_state() {
        let mut server = test_server();
        assert_eq!(server.state(), ServerState::Inactive);
        assert!(server.start());
        assert_eq!(server.state(), ServerState::Active);
        server.stop();
        assert_eq!(server.state(), ServerState::Inactive);
    }

    #[test]
    fn idle_timeout_marks_stale_connections_broken() {
        let mut server = test_server();
        server.set_idle_timeout(IdleTimeout {
            ingress_timeout: Duration::from_millis(5),
            keepalive_interval: Duration::from_millis(1),
        });
        let dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut ctx = NullCtx;
        let start = Instant::now();
        server.handle_connected(1, &dispatcher, &mut ctx, start);

        server.tick_idle_timeouts(start);
        assert!(!server.is_broken(1));

        server.tick_idle_timeouts(start + Duration::from_millis(10));
        assert!(server.is_broken(1));
    }

    #[test]
    fn touch_resets_the_idle_clock() {
        let mut server = test_server();
        server.set_idle_timeout(IdleTimeout {
            ingress_timeout: Duration::from_millis(5),
            keepalive_interval: Duration::from_millis(1),
        });
        let dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut ctx = NullCtx;
        let start = Instant::now();
        server.handle_connected(1, &dispatcher, &mut ctx, start);

        let later = start + Duration::from_millis(3);
        server.touch(1, later);
        server.tick_idle_timeouts(later + Duration::from_millis(3));
        assert!(!server.is_broken(1));
    }

    #[test]
    fn send_rejects_unknown_connection() {
        let mut server = test_server();
        let mut dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());

        assert!(!server.send(&mut dispatcher, 1, &Unspawn { net_id: 7 }, Channel::Reliable, Instant::now()));
    }

    #[test]
    fn send_rejects_broken_connection() {
        let mut server = test_server();
        let admission_dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut dispatcher: Dispatcher<NullCtx> = Dispatcher::new(256, test_logger());
        let mut ctx = NullCtx;
        server.handle_connected(1, &admission_dispatcher, &mut ctx, Instant::now());
        server.mark_broken(1);

        assert!(!server.send(&mut dispatcher, 1, &Unspawn { net_id: 7 }, Channel::Reliable, Instant::now()));
    }
}
