use crate::{
    codec::{Frame, check_body_len, encode_message},
    error::ProtoError,
    header::Header,
    messages::{
        Message,
        room::{Join, List, ListCores, ListRooms},
        session::{Ack, CloneCore, Connect, DeleteCore, RegisterCore, Shutdown},
        sync::{PushEvent, RollbackEnd, RollbackStart, SyncEvents},
    },
    msg_kind::MsgKind,
};

/// A fully decoded message of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    Ack(Ack),
    Shutdown,
    RegisterCore(RegisterCore),
    CloneCore(CloneCore),
    DeleteCore(DeleteCore),
    Join(Join),
    List(List),
    ListRooms(ListRooms),
    ListCores(ListCores),
    Event(PushEvent),
    Sync(SyncEvents),
    RollbackStart(RollbackStart),
    RollbackEnd(RollbackEnd),
}

impl Packet {
    /// Decode `body` according to `header`.
    ///
    /// Fails if the body length differs from `header.body_size`, if the kind
    /// is unknown, or if the body does not match the kind's layout. A failure
    /// only concerns this message; the caller has already consumed the body
    /// and can continue with the next header.
    pub fn decode(header: &Header, body: &[u8]) -> Result<Packet, ProtoError> {
        check_body_len(header, body)?;
        let packet = match header.msg_kind()? {
            MsgKind::Connect => Packet::Connect(Connect::decode_body(body)?),
            MsgKind::Ack => Packet::Ack(Ack::decode_body(body)?),
            MsgKind::Shutdown => {
                Shutdown::decode_body(body)?;
                Packet::Shutdown
            }
            MsgKind::RegisterCore => Packet::RegisterCore(RegisterCore::decode_body(body)?),
            MsgKind::CloneCore => Packet::CloneCore(CloneCore::decode_body(body)?),
            MsgKind::DeleteCore => Packet::DeleteCore(DeleteCore::decode_body(body)?),
            MsgKind::Join => Packet::Join(Join::decode_body(body)?),
            MsgKind::List => Packet::List(List::decode_body(body)?),
            MsgKind::ListRooms => Packet::ListRooms(ListRooms::decode_body(body)?),
            MsgKind::ListCores => Packet::ListCores(ListCores::decode_body(body)?),
            MsgKind::Event => Packet::Event(PushEvent::decode_body(body)?),
            MsgKind::Sync => Packet::Sync(SyncEvents::decode_body(body)?),
            MsgKind::RollbackStart => Packet::RollbackStart(RollbackStart::decode_body(body)?),
            MsgKind::RollbackEnd => Packet::RollbackEnd(RollbackEnd::decode_body(body)?),
        };
        Ok(packet)
    }

    pub fn msg_kind(&self) -> MsgKind {
        match self {
            Packet::Connect(_) => MsgKind::Connect,
            Packet::Ack(_) => MsgKind::Ack,
            Packet::Shutdown => MsgKind::Shutdown,
            Packet::RegisterCore(_) => MsgKind::RegisterCore,
            Packet::CloneCore(_) => MsgKind::CloneCore,
            Packet::DeleteCore(_) => MsgKind::DeleteCore,
            Packet::Join(_) => MsgKind::Join,
            Packet::List(_) => MsgKind::List,
            Packet::ListRooms(_) => MsgKind::ListRooms,
            Packet::ListCores(_) => MsgKind::ListCores,
            Packet::Event(_) => MsgKind::Event,
            Packet::Sync(_) => MsgKind::Sync,
            Packet::RollbackStart(_) => MsgKind::RollbackStart,
            Packet::RollbackEnd(_) => MsgKind::RollbackEnd,
        }
    }

    /// Encode back into a frame.
    pub fn encode(&self) -> Result<Frame, ProtoError> {
        match self {
            Packet::Connect(m) => encode_message(m),
            Packet::Ack(m) => encode_message(m),
            Packet::Shutdown => encode_message(&Shutdown),
            Packet::RegisterCore(m) => encode_message(m),
            Packet::CloneCore(m) => encode_message(m),
            Packet::DeleteCore(m) => encode_message(m),
            Packet::Join(m) => encode_message(m),
            Packet::List(m) => encode_message(m),
            Packet::ListRooms(m) => encode_message(m),
            Packet::ListCores(m) => encode_message(m),
            Packet::Event(m) => encode_message(m),
            Packet::Sync(m) => encode_message(m),
            Packet::RollbackStart(m) => encode_message(m),
            Packet::RollbackEnd(m) => encode_message(m),
        }
    }
}
