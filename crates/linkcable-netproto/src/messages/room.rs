use bytes::{BufMut, BytesMut};
use strum::FromRepr;

use crate::{
    error::ProtoError,
    messages::{Message, session::CoreInfo},
    msg_kind::MsgKind,
    wire::BodyReader,
};

/// Join a core to a room. Sent by the client as a request and broadcast by
/// the relay once the join succeeded. `room_id == 0` asks for a new room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Join {
    pub room_id: u32,
    pub core_id: u32,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum ListKind {
    Rooms = 0,
    Cores = 1,
}

/// Listing request. `parent` is the room to list cores of (0 = all rooms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct List {
    pub kind: ListKind,
    pub parent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoomInfo {
    pub room_id: u32,
    pub n_cores: u32,
    pub capacity: u32,
    pub flags: u32,
}

impl RoomInfo {
    /// Size of one encoded record.
    pub const WIRE_LEN: usize = 16;

    /// True if another core can still join.
    pub fn has_space(&self) -> bool {
        self.n_cores < self.capacity
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.room_id);
        out.put_u32_le(self.n_cores);
        out.put_u32_le(self.capacity);
        out.put_u32_le(self.flags);
    }

    fn decode(r: &mut BodyReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            room_id: r.u32()?,
            n_cores: r.u32()?,
            capacity: r.u32()?,
            flags: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListRooms {
    pub rooms: Vec<RoomInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListCores {
    /// Room the listing was requested for.
    pub parent: u32,
    pub cores: Vec<CoreInfo>,
}

impl Message for Join {
    fn msg_kind() -> MsgKind {
        MsgKind::Join
    }

    fn body_len(&self) -> usize {
        8
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.room_id);
        out.put_u32_le(self.core_id);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, 8)?;
        Ok(Self {
            room_id: r.u32()?,
            core_id: r.u32()?,
        })
    }
}

impl Message for List {
    fn msg_kind() -> MsgKind {
        MsgKind::List
    }

    fn body_len(&self) -> usize {
        8
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.kind as u32);
        out.put_u32_le(self.parent);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, 8)?;
        let raw = r.u32()?;
        Ok(Self {
            kind: ListKind::from_repr(raw).ok_or(ProtoError::UnknownListKind(raw))?,
            parent: r.u32()?,
        })
    }
}

impl Message for ListRooms {
    fn msg_kind() -> MsgKind {
        MsgKind::ListRooms
    }

    fn body_len(&self) -> usize {
        4 + self.rooms.len() * RoomInfo::WIRE_LEN
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.rooms.len() as u32);
        for room in &self.rooms {
            room.encode(out);
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let count = r.count(RoomInfo::WIRE_LEN)?;
        let rooms = (0..count)
            .map(|_| RoomInfo::decode(&mut r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rooms })
    }
}

impl Message for ListCores {
    fn msg_kind() -> MsgKind {
        MsgKind::ListCores
    }

    fn body_len(&self) -> usize {
        8 + self.cores.len() * CoreInfo::WIRE_LEN
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.parent);
        out.put_u32_le(self.cores.len() as u32);
        for core in &self.cores {
            core.encode(out);
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let parent = r.u32()?;
        let count = r.count(CoreInfo::WIRE_LEN)?;
        let cores = (0..count)
            .map(|_| CoreInfo::decode(&mut r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { parent, cores })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_rooms_size_must_match_count_exactly() {
        let msg = ListRooms {
            rooms: vec![RoomInfo::default(); 2],
        };
        let mut out = BytesMut::new();
        msg.encode_body(&mut out);
        assert_eq!(out.len(), msg.body_len());

        // One record short.
        let short = &out[..out.len() - RoomInfo::WIRE_LEN];
        assert!(matches!(
            ListRooms::decode_body(short),
            Err(ProtoError::CountOverrun { count: 2, .. })
        ));

        // Trailing garbage.
        let mut long = out.to_vec();
        long.push(0);
        assert!(matches!(
            ListRooms::decode_body(&long),
            Err(ProtoError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn list_rejects_unknown_kind() {
        let mut body = 7u32.to_le_bytes().to_vec();
        body.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            List::decode_body(&body),
            Err(ProtoError::UnknownListKind(7))
        );
    }

    #[test]
    fn room_space() {
        let room = RoomInfo {
            room_id: 1,
            n_cores: 2,
            capacity: 2,
            flags: 0,
        };
        assert!(!room.has_space());
        assert!(RoomInfo { n_cores: 1, ..room }.has_space());
    }
}
