//! Bit-packed serialization, message framing, batching, and dispatch for an
//! authoritative game server.
//!
//! The crate is layered bottom-up:
//!
//! - [`bitcodec`] is the portable, transport-agnostic bit-level reader/writer.
//! - [`message`] frames typed messages on top of the codec.
//! - [`batch`] groups outgoing messages per `(connection, channel)` with time-based flush.
//! - [`dispatch`] routes inbound frames to registered handlers with authentication gating.
//! - [`server`] owns the connection table, lifecycle, and spawn/unspawn bookkeeping.
//!
//! [`transport`] and [`entity`] are contracts only: concrete transports and the scene/
//! entity system are external collaborators, never implemented in this crate.
//! [`buffer`] is example plumbing for staging raw socket I/O outside the bit-level codec;
//! it is not part of the portable core.

pub mod batch;
pub mod bitcodec;
pub mod buffer;
pub mod dispatch;
pub mod entity;
pub mod message;
pub mod server;
pub mod transport;
