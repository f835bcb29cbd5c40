//! Wire message shapes. Every message is framed on the wire as `<id:8 bits><payload>`;
//! the id is never written by `serialize` itself, only by whoever frames the message
//! (see [`crate::dispatch::Dispatcher`] and [`crate::batch::Batch`]).

use crate::bitcodec::{Quaternion, Reader, Writer};

/// A value type that can be framed with a stable 1-byte id.
pub trait Message: Sized {
    /// Stable wire id. Reserved ids are listed alongside the concrete types below;
    /// application messages should use `0x00` or `0x40..=0xFF`.
    fn id() -> u8;
    fn serialize(&self, writer: &mut Writer) -> bool;
    fn deserialize(reader: &mut Reader) -> Option<Self>;
}

pub const ID_CONNECT: u8 = 0x01;
pub const ID_DISCONNECT: u8 = 0x02;
pub const ID_SPAWN: u8 = 0x22;
pub const ID_UNSPAWN: u8 = 0x23;
pub const ID_TRANSFORM: u8 = 0x25;
pub const ID_JOIN_WORLD: u8 = 0x31;
pub const ID_JOINED: u8 = 0x32;
pub const ID_CHAT: u8 = 0x33;

/// Synthesized internally when a transport reports a new connection; never sent or
/// received over the wire.
pub struct Connect;

impl Message for Connect {
    fn id() -> u8 {
        ID_CONNECT
    }

    fn serialize(&self, _writer: &mut Writer) -> bool {
        true
    }

    fn deserialize(_reader: &mut Reader) -> Option<Self> {
        Some(Connect)
    }
}

/// Synthesized internally when a transport reports a disconnection; never sent or
/// received over the wire.
pub struct Disconnect;

impl Message for Disconnect {
    fn id() -> u8 {
        ID_DISCONNECT
    }

    fn serialize(&self, _writer: &mut Writer) -> bool {
        true
    }

    fn deserialize(_reader: &mut Reader) -> Option<Self> {
        Some(Disconnect)
    }
}

/// Prefab identity is a 16-byte opaque id assigned by the entity catalog external to
/// this crate; it is carried verbatim, never interpreted here.
pub type PrefabId = [u8; 16];

pub struct Spawn {
    pub prefab: PrefabId,
    pub net_id: u64,
    pub owned: bool,
    pub position: (f32, f32, f32),
    pub rotation: Quaternion,
}

impl Message for Spawn {
    fn id() -> u8 {
        ID_SPAWN
    }

    fn serialize(&self, writer: &mut Writer) -> bool {
        writer.write_bytes(&self.prefab, 0, 16)
            && writer.write_ulong_bits(self.net_id, 64)
            && writer.write_bool(self.owned)
            && writer.write_float(self.position.0)
            && writer.write_float(self.position.1)
            && writer.write_float(self.position.2)
            && writer.write_quaternion_smallest_three(&self.rotation)
    }

    fn deserialize(reader: &mut Reader) -> Option<Self> {
        let mut prefab = [0u8; 16];
        if !reader.read_bytes(&mut prefab, 0, 16) {
            return None;
        }
        let net_id = reader.read_ulong_bits(64)?;
        let owned = reader.read_bool()?;
        let x = reader.read_float()?;
        let y = reader.read_float()?;
        let z = reader.read_float()?;
        let rotation = reader.read_quaternion_smallest_three()?;
        Some(Spawn { prefab, net_id, owned, position: (x, y, z), rotation })
    }
}

pub struct Unspawn {
    pub net_id: u64,
}

impl Message for Unspawn {
    fn id() -> u8 {
        ID_UNSPAWN
    }

    fn serialize(&self, writer: &mut Writer) -> bool {
        writer.write_ulong_bits(self.net_id, 64)
    }

    fn deserialize(reader: &mut Reader) -> Option<Self> {
        Some(Unspawn { net_id: reader.read_ulong_bits(64)? })
    }
}

pub struct Transform {
    pub net_id: u64,
    pub position: (f32, f32, f32),
    pub rotation: Quaternion,
}

impl Message for Transform {
    fn id() -> u8 {
        ID_TRANSFORM
    }

    fn serialize(&self, writer: &mut Writer) -> bool {
        writer.write_ulong_bits(self.net_id, 64)
            && writer.write_float(self.position.0)
            && writer.write_float(self.position.1)
            && writer.write_float(self.position.2)
            && writer.write_quaternion_smallest_three(&self.rotation)
    }

    fn deserialize(reader: &mut Reader) -> Option<Self> {
        let net_id = reader.read_ulong_bits(64)?;
        let x = reader.read_float()?;
        let y = reader.read_float()?;
        let z = reader.read_float()?;
        let rotation = reader.read_quaternion_smallest_three()?;
        Some(Transform { net_id, position: (x, y, z), rotation })
    }
}

/// Client's request to join the world as a given prefab.
pub struct JoinWorld {
    pub prefab: PrefabId,
}

impl Message for JoinWorld {
    fn id() -> u8 {
        ID_JOIN_WORLD
    }

    fn serialize(&self, writer: &mut Writer) -> bool {
        writer.write_bytes(&self.prefab, 0, 16)
    }

    fn deserialize(reader: &mut Reader) -> Option<Self> {
        let mut prefab = [0u8; 16];
        if !reader.read_bytes(&mut prefab, 0, 16) {
            return None;
        }
        Some(JoinWorld { prefab })
    }
}

/// Server's acknowledgement that a connection has joined the world; empty payload.
pub struct Joined;

impl Message for Joined {
    fn id() -> u8 {
        ID_JOINED
    }

    fn serialize(&self, _writer: &mut Writer) -> bool {
        true
    }

    fn deserialize(_reader: &mut Reader) -> Option<Self> {
        Some(Joined)
    }
}

pub struct Chat {
    pub sender: String,
    pub text: String,
}

impl Message for Chat {
    fn id() -> u8 {
        ID_CHAT
    }

    fn serialize(&self, writer: &mut Writer) -> bool {
        writer.write_fixed_string_32(&self.sender) && writer.write_fixed_string_128(&self.text)
    }

    fn deserialize(reader: &mut Reader) -> Option<Self> {
        let sender = reader.read_fixed_string_32()?;
        let text = reader.read_fixed_string_128()?;
        Some(Chat { sender, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_round_trips() {
        let spawn = Spawn {
            prefab: [7u8; 16],
            net_id: 42,
            owned: true,
            position: (1.0, 2.0, 3.0),
            rotation: Quaternion::IDENTITY,
        };
        let mut w = Writer::new(64);
        assert!(spawn.serialize(&mut w));
        let mut r = Reader::new(w.segment());
        let back = Spawn::deserialize(&mut r).unwrap();
        assert_eq!(back.prefab, spawn.prefab);
        assert_eq!(back.net_id, spawn.net_id);
        assert_eq!(back.owned, spawn.owned);
        assert_eq!(back.position, spawn.position);
    }

    #[test]
    fn chat_round_trips_fixed_strings() {
        let chat = Chat { sender: "tom".into(), text: "hello world".into() };
        let mut w = Writer::new(256);
        assert!(chat.serialize(&mut w));
        let mut r = Reader::new(w.segment());
        let back = Chat::deserialize(&mut r).unwrap();
        assert_eq!(back.sender, "tom");
        assert_eq!(back.text, "hello world");
    }

    #[test]
    fn connect_and_disconnect_have_empty_payloads() {
        let mut w = Writer::new(4);
        assert!(Connect.serialize(&mut w));
        assert_eq!(w.bit_position(), 0);
    }
}
