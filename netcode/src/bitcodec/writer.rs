use super::{bits_required, Quaternion, QUAT_PRECISION_BITS, SMALLEST_THREE_BOUND};
use byteorder::{ByteOrder, LittleEndian};

/// Bit-packing writer over an owned, fixed-capacity byte buffer.
///
/// Bits accumulate in a 64-bit scratch register and are flushed to the backing buffer
/// four bytes at a time, little-endian, once 32 bits have accumulated. The buffer never
/// grows; callers size it up front (transport MTU for a [`crate::batch::Batch`], or the
/// worst-case payload size for a single message).
pub struct Writer {
    buffer: Vec<u8>,
    scratch: u64,
    scratch_bits: u32,
    word_index: usize,
}

impl Writer {
    /// Creates a writer over a zeroed buffer of `capacity` bytes. Capacity must be at
    /// least 4 bytes so a single word flush always has somewhere to land.
    pub fn new(capacity: usize) -> Writer {
        assert!(capacity >= 4, "writer buffer must be at least one word");
        Writer { buffer: vec![0u8; capacity], scratch: 0, scratch_bits: 0, word_index: 0 }
    }

    /// Total bits written so far.
    pub fn bit_position(&self) -> usize {
        self.word_index * 8 + self.scratch_bits as usize
    }

    /// Bits still available before the buffer is exhausted. Four bytes of slack past
    /// `word_index` are always reserved for the next word flush.
    fn space_bits(&self) -> usize {
        let tail_bytes = self.buffer.len().saturating_sub(self.word_index + 4);
        (32 - self.scratch_bits as usize) + tail_bytes * 8
    }

    /// Public view of [`Writer::space_bits`], used by the batcher to decide whether a
    /// message fits in the current batch before appending it.
    pub fn remaining_bits(&self) -> usize {
        self.space_bits()
    }

    fn flush_word(&mut self) {
        if self.scratch_bits >= 32 {
            let word = (self.scratch & 0xFFFF_FFFF) as u32;
            LittleEndian::write_u32(&mut self.buffer[self.word_index..self.word_index + 4], word);
            self.word_index += 4;
            self.scratch >>= 32;
            self.scratch_bits -= 32;
        }
    }

    /// Writes the low `bits` of `value`, `bits` in `0..=32`. Masks silently; it is a
    /// programming error to pass more than 32 bits.
    pub fn write_uint_bits(&mut self, value: u32, bits: u32) -> bool {
        assert!(bits <= 32, "write_uint_bits: bits out of range");
        if bits == 0 {
            return true;
        }
        if self.space_bits() < bits as usize {
            return false;
        }
        let masked = if bits == 32 { value as u64 } else { (value as u64) & ((1u64 << bits) - 1) };
        self.scratch |= masked << self.scratch_bits;
        self.scratch_bits += bits;
        self.flush_word();
        true
    }

    /// Writes the low `bits` of `value`, `bits` in `0..=64`, as two word-sized writes.
    pub fn write_ulong_bits(&mut self, value: u64, bits: u32) -> bool {
        assert!(bits <= 64, "write_ulong_bits: bits out of range");
        if bits == 0 {
            return true;
        }
        if self.space_bits() < bits as usize {
            return false;
        }
        let lower_bits = bits.min(32);
        let upper_bits = bits - lower_bits;
        let lower = if lower_bits == 32 { value as u32 } else { (value & ((1u64 << lower_bits) - 1)) as u32 };
        self.write_uint_bits(lower, lower_bits);
        if upper_bits > 0 {
            let upper = ((value >> lower_bits) & ((1u64 << upper_bits) - 1)) as u32;
            self.write_uint_bits(upper, upper_bits);
        }
        true
    }

    pub fn write_bool(&mut self, value: bool) -> bool {
        self.write_uint_bits(value as u32, 1)
    }

    pub fn write_byte_bits(&mut self, value: u8, bits: u32) -> bool {
        assert!(bits <= 8, "write_byte_bits: bits out of range");
        self.write_uint_bits(value as u32, bits)
    }

    pub fn write_ushort_bits(&mut self, value: u16, bits: u32) -> bool {
        assert!(bits <= 16, "write_ushort_bits: bits out of range");
        self.write_uint_bits(value as u32, bits)
    }

    pub fn write_float(&mut self, value: f32) -> bool {
        self.write_uint_bits(value.to_bits(), 32)
    }

    pub fn write_double(&mut self, value: f64) -> bool {
        self.write_ulong_bits(value.to_bits(), 64)
    }

    /// Writes `value` range-scaled to `precision` within `[min, max]`. Fails (does not
    /// clamp or panic) if the scaled value, min, or max overflow the signed 64-bit range
    /// the range coder works in.
    pub fn write_float_scaled(&mut self, value: f32, min: f32, max: f32, precision: f32) -> bool {
        assert!(min <= max, "write_float_scaled: min must not exceed max");
        assert!(precision > 0.0, "write_float_scaled: precision must be positive");
        let (min_i, max_i, val_i) = match (scale_f32(min, precision), scale_f32(max, precision), scale_f32(value, precision)) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return false,
        };
        if val_i < min_i || val_i > max_i {
            return false;
        }
        self.write_i64_ranged(val_i, min_i, max_i)
    }

    pub fn write_double_scaled(&mut self, value: f64, min: f64, max: f64, precision: f64) -> bool {
        assert!(min <= max, "write_double_scaled: min must not exceed max");
        assert!(precision > 0.0, "write_double_scaled: precision must be positive");
        let (min_i, max_i, val_i) = match (scale_f64(min, precision), scale_f64(max, precision), scale_f64(value, precision)) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => return false,
        };
        if val_i < min_i || val_i > max_i {
            return false;
        }
        self.write_i64_ranged(val_i, min_i, max_i)
    }

    /// Writes four uncompressed floats (128 bits total).
    pub fn write_quaternion(&mut self, q: &Quaternion) -> bool {
        if self.space_bits() < 128 {
            return false;
        }
        self.write_float(q.x);
        self.write_float(q.y);
        self.write_float(q.z);
        self.write_float(q.w);
        true
    }

    /// Drops the largest-magnitude component and writes its index (2 bits) plus the
    /// remaining three components quantized to 10 bits each (32 bits total).
    pub fn write_quaternion_smallest_three(&mut self, q: &Quaternion) -> bool {
        let comps = [q.x, q.y, q.z, q.w];
        let mut largest_index = 0usize;
        let mut largest_abs = comps[0].abs();
        for (i, c) in comps.iter().enumerate().skip(1) {
            if c.abs() > largest_abs {
                largest_abs = c.abs();
                largest_index = i;
            }
        }
        let sign = if comps[largest_index] < 0.0 { -1.0 } else { 1.0 };
        let max_scaled = (1u32 << QUAT_PRECISION_BITS) - 1;
        let mut quantized = [0u32; 3];
        let mut k = 0;
        for (i, c) in comps.iter().enumerate() {
            if i == largest_index {
                continue;
            }
            let v = (c * sign).clamp(-SMALLEST_THREE_BOUND, SMALLEST_THREE_BOUND);
            let normalized = (v + SMALLEST_THREE_BOUND) / (2.0 * SMALLEST_THREE_BOUND);
            quantized[k] = (normalized * max_scaled as f32).round() as u32;
            k += 1;
        }
        if self.space_bits() < 2 + 3 * QUAT_PRECISION_BITS as usize {
            return false;
        }
        self.write_uint_bits(largest_index as u32, 2);
        for q in &quantized {
            self.write_uint_bits(*q, QUAT_PRECISION_BITS);
        }
        true
    }

    /// Writes `size` verbatim bytes from `slice[offset..offset+size]`.
    pub fn write_bytes(&mut self, slice: &[u8], offset: usize, size: usize) -> bool {
        assert!(offset + size <= slice.len(), "write_bytes: range exceeds source slice");
        if self.space_bits() < size * 8 {
            return false;
        }
        for &byte in &slice[offset..offset + size] {
            self.write_uint_bits(byte as u32, 8);
        }
        true
    }

    /// Writes `size_in_bits` bits from `slice[offset..]`: full bytes, then the final
    /// partial byte's low bits. The only operation that can leave the writer
    /// non-byte-aligned mid-stream.
    pub fn write_bytes_bit_size(&mut self, slice: &[u8], offset: usize, size_in_bits: usize) -> bool {
        let full_bytes = size_in_bits / 8;
        let remainder_bits = (size_in_bits % 8) as u32;
        let bytes_needed = full_bytes + if remainder_bits > 0 { 1 } else { 0 };
        assert!(offset + bytes_needed <= slice.len(), "write_bytes_bit_size: range exceeds source slice");
        if self.space_bits() < size_in_bits {
            return false;
        }
        for i in 0..full_bytes {
            self.write_uint_bits(slice[offset + i] as u32, 8);
        }
        if remainder_bits > 0 {
            let last = slice[offset + full_bytes];
            let mask = (1u16 << remainder_bits) - 1;
            self.write_uint_bits((last as u32) & mask as u32, remainder_bits);
        }
        true
    }

    /// Writes a 16-bit length prefix followed by `s`'s UTF-8 bytes. `capacity` is the
    /// fixed string type's total byte budget (length prefix included).
    pub fn write_fixed_string(&mut self, s: &str, capacity: usize) -> bool {
        assert!(capacity >= 2, "write_fixed_string: capacity too small for length prefix");
        let bytes = s.as_bytes();
        let max_len = capacity - 2;
        if bytes.len() > max_len {
            return false;
        }
        if self.space_bits() < 16 + bytes.len() * 8 {
            return false;
        }
        self.write_uint_bits(bytes.len() as u32, 16);
        self.write_bytes(bytes, 0, bytes.len());
        true
    }

    pub fn write_fixed_string_32(&mut self, s: &str) -> bool {
        self.write_fixed_string(s, 32)
    }

    pub fn write_fixed_string_64(&mut self, s: &str) -> bool {
        self.write_fixed_string(s, 64)
    }

    pub fn write_fixed_string_128(&mut self, s: &str) -> bool {
        self.write_fixed_string(s, 128)
    }

    pub fn write_fixed_string_512(&mut self, s: &str) -> bool {
        self.write_fixed_string(s, 512)
    }

    /// Byte-padded view of everything written so far. Not a valid input for bit-level
    /// re-reading across writers unless every append used [`Writer::write_bytes_bit_size`]
    /// to avoid padding.
    pub fn segment(&mut self) -> &[u8] {
        let byte_len = self.word_index + ((self.scratch_bits as usize + 7) / 8);
        if self.scratch_bits > 0 {
            let avail = self.buffer.len() - self.word_index;
            let tail_bytes = (((self.scratch_bits as usize) + 7) / 8).min(avail);
            let mut tail = [0u8; 4];
            LittleEndian::write_u32(&mut tail, (self.scratch & 0xFFFF_FFFF) as u32);
            self.buffer[self.word_index..self.word_index + tail_bytes].copy_from_slice(&tail[..tail_bytes]);
        }
        &self.buffer[..byte_len]
    }

    /// Resets the writer to empty, reusing the backing buffer.
    pub fn reset(&mut self) {
        self.scratch = 0;
        self.scratch_bits = 0;
        self.word_index = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

fn scale_f32(v: f32, precision: f32) -> Option<i64> {
    let scaled = (v as f64 / precision as f64).round();
    if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
        None
    } else {
        Some(scaled as i64)
    }
}

fn scale_f64(v: f64, precision: f64) -> Option<i64> {
    let scaled = (v / precision).round();
    if scaled < i64::MIN as f64 || scaled > i64::MAX as f64 {
        None
    } else {
        Some(scaled as i64)
    }
}

macro_rules! impl_ranged {
    ($write_name:ident, $ty:ty) => {
        impl Writer {
            #[doc(hidden)]
            pub fn $write_name(&mut self, value: $ty, min: $ty, max: $ty) -> bool {
                assert!(min <= max, concat!(stringify!($write_name), ": min must not exceed max"));
                assert!(
                    value >= min && value <= max,
                    concat!(stringify!($write_name), ": value out of declared range")
                );
                let range = (max as u64).wrapping_sub(min as u64);
                let bits = bits_required(0, range);
                if bits == 0 {
                    return true;
                }
                let offset = (value as u64).wrapping_sub(min as u64);
                self.write_ulong_bits(offset, bits)
            }
        }
    };
}

impl_ranged!(write_u8_ranged, u8);
impl_ranged!(write_u16_ranged, u16);
impl_ranged!(write_u32_ranged, u32);
impl_ranged!(write_u64_ranged, u64);
impl_ranged!(write_i8_ranged, i8);
impl_ranged!(write_i16_ranged, i16);
impl_ranged!(write_i32_ranged, i32);
impl_ranged!(write_i64_ranged, i64);
