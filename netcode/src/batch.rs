//! Per-connection, per-channel outgoing batching with time-based flush.

use crate::bitcodec::Writer;
use crate::transport::{Channel, ConnectionId, Transport};
use hashbrown::HashMap;
use flux::logging::{self, debug, warn, Logger};
use std::time::{Duration, Instant};

struct Batch {
    writer: Writer,
    last_send_time: Instant,
}

impl Batch {
    fn new(mtu: usize, now: Instant) -> Batch {
        Batch { writer: Writer::new(mtu), last_send_time: now }
    }
}

/// Owns one [`Writer`]-backed batch per `(connection, channel)` pair and decides when
/// to flush it: when a message no longer fits, or when `batch_interval` has elapsed
/// since the last flush.
pub struct Batcher {
    batches: HashMap<(ConnectionId, Channel), Batch>,
    mtu: usize,
    batch_interval: Duration,
}

impl Batcher {
    pub fn new(mtu: usize, batch_interval: Duration) -> Batcher {
        Batcher { batches: HashMap::new(), mtu, batch_interval }
    }

    /// Appends a fully-serialized message (its bit-exact content, no padding) to the
    /// connection's batch on `channel`, flushing first if it wouldn't otherwise fit.
    /// Returns `false` if the flush it triggered failed to send; the caller is
    /// responsible for marking the connection broken in that case.
    pub fn append(
        &mut self,
        connection: ConnectionId,
        channel: Channel,
        message: &mut Writer,
        transport: &mut dyn Transport,
        now: Instant,
        log: &Logger,
    ) -> bool {
        let needed = message.bit_position();
        let key = (connection, channel);
        let mtu = self.mtu;
        let batch = self.batches.entry(key).or_insert_with(|| Batch::new(mtu, now));

        if batch.writer.remaining_bits() < needed {
            if !flush_batch(connection, channel, batch, transport, now, log) {
                return false;
            }
        }

        let bytes = message.segment();
        batch.writer.write_bytes_bit_size(bytes, 0, needed)
    }

    /// Flushes every batch whose interval has elapsed. Returns the connections whose
    /// flush failed to send, so the caller can mark them broken and disconnect.
    pub fn flush_due(&mut self, transport: &mut dyn Transport, now: Instant, log: &Logger) -> Vec<ConnectionId> {
        let interval = self.batch_interval;
        let mut failed = Vec::new();
        for (&(connection, channel), batch) in self.batches.iter_mut() {
            if batch.writer.bit_position() > 0 && now.duration_since(batch.last_send_time) >= interval {
                if !flush_batch(connection, channel, batch, transport, now, log) {
                    failed.push(connection);
                }
            }
        }
        failed
    }

    /// Force-flushes every non-empty batch for `connection`, e.g. right before it is
    /// disconnected so nothing queued is silently dropped.
    pub fn flush_connection(&mut self, connection: ConnectionId, transport: &mut dyn Transport, now: Instant, log: &Logger) {
        for (&(id, channel), batch) in self.batches.iter_mut() {
            if id == connection && batch.writer.bit_position() > 0 {
                flush_batch(connection, channel, batch, transport, now, log);
            }
        }
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) {
        self.batches.retain(|&(id, _), _| id != connection);
    }
}

fn flush_batch(
    connection: ConnectionId,
    channel: Channel,
    batch: &mut Batch,
    transport: &mut dyn Transport,
    now: Instant,
    log: &Logger,
) -> bool {
    let len = batch.writer.segment().len();
    let sent = transport.send(connection, batch.writer.segment(), channel);
    if sent {
        debug!(log, "flushed batch"; "connection" => connection, "channel" => ?channel, "bytes" => len);
    } else {
        warn!(log, "batch flush failed"; "connection" => connection, "channel" => ?channel);
    }
    batch.writer.reset();
    batch.last_send_time = now;
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportEvents;

    struct RecordingTransport {
        sent: Vec<(ConnectionId, Vec<u8>, Channel)>,
        fail_next: bool,
    }

    impl RecordingTransport {
        fn new() -> Self {
            RecordingTransport { sent: Vec::new(), fail_next: false }
        }
    }

    impl Transport for RecordingTransport {
        fn start(&mut self) -> bool {
            true
        }
        fn stop(&mut self) {}
        fn is_active(&self) -> bool {
            true
        }
        fn send(&mut self, connection: ConnectionId, data: &[u8], channel: Channel) -> bool {
            if self.fail_next {
                self.fail_next = false;
                return false;
            }
            self.sent.push((connection, data.to_vec(), channel));
            true
        }
        fn disconnect(&mut self, _connection: ConnectionId) {}
        fn max_packet_size(&self) -> usize {
            64
        }
        fn get_address(&self, _connection: ConnectionId) -> Option<String> {
            None
        }
        fn tick(&mut self, _events: &mut dyn TransportEvents) {}
    }

    fn test_logger() -> Logger {
        Logger::root(logging::Discard, logging::o!())
    }

    #[test]
    fn append_defers_send_until_flush() {
        let mut batcher = Batcher::new(64, Duration::from_millis(10));
        let mut transport = RecordingTransport::new();
        let log = test_logger();
        let now = Instant::now();

        let mut w = Writer::new(8);
        w.write_uint_bits(0xAB, 8);
        assert!(batcher.append(1, Channel::Reliable, &mut w, &mut transport, now, &log));
        assert!(transport.sent.is_empty());

        let failed = batcher.flush_due(&mut transport, now + Duration::from_millis(20), &log);
        assert!(failed.is_empty());
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(transport.sent[0].1, vec![0xAB]);
    }

    #[test]
    fn append_flushes_early_when_message_does_not_fit() {
        let mut batcher = Batcher::new(4, Duration::from_secs(10));
        let mut transport = RecordingTransport::new();
        let log = test_logger();
        let now = Instant::now();

        let mut first = Writer::new(4);
        first.write_uint_bits(0x11, 8);
        assert!(batcher.append(1, Channel::Reliable, &mut first, &mut transport, now, &log));

        let mut second = Writer::new(4);
        second.write_ulong_bits(0x2233_4455, 32);
        assert!(batcher.append(1, Channel::Reliable, &mut second, &mut transport, now, &log));

        assert_eq!(transport.sent.len(), 1, "first message should have been flushed to make room");
    }

    #[test]
    fn four_messages_pack_without_padding_between_them() {
        // Four messages of 12, 20, 8, 8 bits packed bit-exact into an MTU-16 batch
        // total exactly 48 bits (6 bytes), with no inter-message padding, and the
        // reader recovers all four in order.
        let mut batcher = Batcher::new(16, Duration::from_secs(10));
        let mut transport = RecordingTransport::new();
        let log = test_logger();
        let now = Instant::now();

        let lengths = [12u32, 20, 8, 8];
        for (i, &bits) in lengths.iter().enumerate() {
            let mut w = Writer::new(4);
            w.write_uint_bits(i as u32, bits);
            assert!(batcher.append(1, Channel::Reliable, &mut w, &mut transport, now, &log));
        }

        let failed = batcher.flush_due(&mut transport, now + Duration::from_millis(1), &log);
        assert!(failed.is_empty());
        assert_eq!(transport.sent.len(), 1);
        let bytes = &transport.sent[0].1;
        assert_eq!(bytes.len(), 6, "48 bits must pad to exactly 6 bytes");

        let mut r = crate::bitcodec::Reader::new(bytes);
        for (i, &bits) in lengths.iter().enumerate() {
            assert_eq!(r.read_uint_bits(bits), Some(i as u32));
        }
    }

    #[test]
    fn failed_flush_is_reported() {
        let mut batcher = Batcher::new(64, Duration::from_millis(1));
        let mut transport = RecordingTransport::new();
        transport.fail_next = true;
        let log = test_logger();
        let now = Instant::now();

        let mut w = Writer::new(8);
        w.write_uint_bits(0xAB, 8);
        batcher.append(1, Channel::Reliable, &mut w, &mut transport, now, &log);

        let failed = batcher.flush_due(&mut transport, now + Duration::from_millis(5), &log);
        assert_eq!(failed, vec![1]);
    }
}
