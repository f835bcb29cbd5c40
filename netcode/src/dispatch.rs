//! Message-id to handler routing, with authentication gating.

use crate::batch::Batcher;
use crate::bitcodec::{Reader, Writer};
use crate::message::Message;
use crate::transport::{Channel, ConnectionId, Transport};
use hashbrown::HashMap;
use flux::logging::{self, warn, Logger};
use std::time::Instant;

/// Read-only view the dispatcher needs of the connection table to gate authenticated
/// messages; implemented by [`crate::server::ServerCore`].
pub trait ConnectionLookup {
    fn is_authenticated(&self, connection: ConnectionId) -> bool;
}

type HandlerFn<C> = Box<dyn Fn(&mut C, ConnectionId, &mut Reader) -> bool>;

struct HandlerEntry<C> {
    requires_auth: bool,
    invoke: HandlerFn<C>,
}

/// Registration failed because `id` already has a handler.
#[derive(Debug)]
pub struct DuplicateRegistration(pub u8);

/// Routes inbound bytes to typed handlers by 1-byte message id, and serializes
/// outbound messages into the connection's batch.
///
/// `C` is the application's handler context (typically the server itself, or a facade
/// over it) threaded through every invocation.
pub struct Dispatcher<C> {
    handlers: HashMap<u8, HandlerEntry<C>>,
    send_writer: Writer,
    log: Logger,
}

impl<C: ConnectionLookup> Dispatcher<C> {
    pub fn new(send_buffer_size: usize, log: Logger) -> Dispatcher<C> {
        Dispatcher { handlers: HashMap::new(), send_writer: Writer::new(send_buffer_size), log }
    }

    /// Registers `handler` for `M::id()`. Fails if that id already has a handler.
    pub fn register<M, F>(&mut self, requires_auth: bool, handler: F) -> Result<(), DuplicateRegistration>
    where
        M: Message + 'static,
        F: Fn(&mut C, ConnectionId, M) + 'static,
    {
        let id = M::id();
        if self.handlers.contains_key(&id) {
            return Err(DuplicateRegistration(id));
        }
        let invoke: HandlerFn<C> = Box::new(move |ctx, connection, reader| match M::deserialize(reader) {
            Some(message) => {
                handler(ctx, connection, message);
                true
            }
            None => false,
        });
        self.handlers.insert(id, HandlerEntry { requires_auth, invoke });
        Ok(())
    }

    /// Routes an inbound frame. Returns `false` when the connection should be
    /// disconnected: the id byte was missing, the id is unregistered, the connection
    /// failed the auth gate, or deserialization of the payload failed.
    pub fn dispatch(&self, ctx: &mut C, connection: ConnectionId, data: &[u8]) -> bool {
        let mut reader = Reader::new(data);
        let id = match reader.read_byte_bits(8) {
            Some(id) => id,
            None => {
                warn!(self.log, "dropped truncated frame"; "connection" => connection);
                return false;
            }
        };
        let entry = match self.handlers.get(&id) {
            Some(entry) => entry,
            None => {
                warn!(self.log, "unknown message id"; "connection" => connection, "id" => id);
                return false;
            }
        };
        if entry.requires_auth && !ctx.is_authenticated(connection) {
            warn!(self.log, "unauthenticated message rejected"; "connection" => connection, "id" => id);
            return false;
        }
        if !(entry.invoke)(ctx, connection, &mut reader) {
            warn!(self.log, "failed to deserialize payload"; "connection" => connection, "id" => id);
            return false;
        }
        true
    }

    /// Serializes `message` and appends it to the connection's batch on `channel`.
    /// Serialization failure (message too large for the send buffer) is logged and the
    /// message is dropped — it never disconnects the peer, since it is our own bug, not
    /// a protocol violation.
    ///
    /// Reuses the one pre-allocated send buffer (`reset()` between calls) instead of
    /// allocating a fresh `Writer` per message, per the resource model's "one
    /// pre-allocated send buffer per server, reused across all outgoing messages."
    pub fn send<M: Message>(
        &mut self,
        connection: ConnectionId,
        message: &M,
        channel: Channel,
        batcher: &mut Batcher,
        transport: &mut dyn Transport,
        now: Instant,
    ) -> bool {
        self.send_writer.reset();
        if !self.send_writer.write_byte_bits(M::id(), 8) || !message.serialize(&mut self.send_writer) {
            warn!(self.log, "dropped outbound message: does not fit in send buffer"; "connection" => connection, "id" => M::id());
            return false;
        }
        batcher.append(connection, channel, &mut self.send_writer, transport, now, &self.log)
    }
}
