use bytes::{BufMut, BytesMut};
use strum::FromRepr;

use crate::{error::ProtoError, messages::Message, msg_kind::MsgKind, wire::BodyReader};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
pub enum EventKind {
    None = 0,
    Frame = 1,
    Reset = 2,
    KeyInput = 3,
}

/// A frame-tagged event for one core.
///
/// `frame_id` is relative to the core's frame offset, not to any local
/// frame counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub core_id: u32,
    /// Kind-specific payload (the key bitmask for `KeyInput`).
    pub datum: u32,
    pub frame_id: u32,
}

impl Event {
    /// Size of one encoded record.
    pub const WIRE_LEN: usize = 16;

    pub fn key_input(core_id: u32, keys: u32, frame_id: u32) -> Self {
        Self {
            kind: EventKind::KeyInput,
            core_id,
            datum: keys,
            frame_id,
        }
    }

    pub fn reset(core_id: u32, frame_id: u32) -> Self {
        Self {
            kind: EventKind::Reset,
            core_id,
            datum: 0,
            frame_id,
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.kind as u32);
        out.put_u32_le(self.core_id);
        out.put_u32_le(self.datum);
        out.put_u32_le(self.frame_id);
    }

    fn decode(r: &mut BodyReader<'_>) -> Result<Self, ProtoError> {
        let raw = r.u32()?;
        Ok(Self {
            kind: EventKind::from_repr(raw).ok_or(ProtoError::UnknownEventKind(raw))?,
            core_id: r.u32()?,
            datum: r.u32()?,
            frame_id: r.u32()?,
        })
    }
}

/// A single event pushed by the client (local input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushEvent {
    pub event: Event,
}

/// Events fanned out by the relay. One message may carry events for several
/// cores; per-core order is arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncEvents {
    pub events: Vec<Event>,
}

/// The named cores must suspend input and output while the engine corrects
/// their state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RollbackStart {
    pub core_ids: Vec<u32>,
}

/// The named cores may resume after a rollback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RollbackEnd {
    pub core_ids: Vec<u32>,
}

impl Message for PushEvent {
    fn msg_kind() -> MsgKind {
        MsgKind::Event
    }

    fn body_len(&self) -> usize {
        Event::WIRE_LEN
    }

    fn encode_body(&self, out: &mut BytesMut) {
        self.event.encode(out);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, Event::WIRE_LEN)?;
        Ok(Self {
            event: Event::decode(&mut r)?,
        })
    }
}

impl Message for SyncEvents {
    fn msg_kind() -> MsgKind {
        MsgKind::Sync
    }

    fn body_len(&self) -> usize {
        4 + self.events.len() * Event::WIRE_LEN
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.events.len() as u32);
        for event in &self.events {
            event.encode(out);
        }
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::new(body);
        let count = r.count(Event::WIRE_LEN)?;
        let events = (0..count)
            .map(|_| Event::decode(&mut r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { events })
    }
}

fn encode_core_ids(core_ids: &[u32], out: &mut BytesMut) {
    out.put_u32_le(core_ids.len() as u32);
    for id in core_ids {
        out.put_u32_le(*id);
    }
}

fn decode_core_ids(body: &[u8]) -> Result<Vec<u32>, ProtoError> {
    let mut r = BodyReader::new(body);
    let count = r.count(4)?;
    (0..count).map(|_| r.u32()).collect()
}

impl Message for RollbackStart {
    fn msg_kind() -> MsgKind {
        MsgKind::RollbackStart
    }

    fn body_len(&self) -> usize {
        4 + self.core_ids.len() * 4
    }

    fn encode_body(&self, out: &mut BytesMut) {
        encode_core_ids(&self.core_ids, out);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            core_ids: decode_core_ids(body)?,
        })
    }
}

impl Message for RollbackEnd {
    fn msg_kind() -> MsgKind {
        MsgKind::RollbackEnd
    }

    fn body_len(&self) -> usize {
        4 + self.core_ids.len() * 4
    }

    fn encode_body(&self, out: &mut BytesMut) {
        encode_core_ids(&self.core_ids, out);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        Ok(Self {
            core_ids: decode_core_ids(body)?,
        })
    }
}
