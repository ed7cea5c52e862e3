use bitflags::bitflags;
use bytes::{BufMut, BytesMut};

use crate::{
    constants::{BUILD_ID_LEN, GAME_CODE_LEN, GAME_TITLE_LEN},
    error::ProtoError,
    messages::Message,
    msg_kind::MsgKind,
    wire::BodyReader,
};

bitflags! {
    /// Permission bits carried per core.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CoreFlags: u32 {
        /// Remote participants may watch this core.
        const ALLOW_OBSERVE = 1 << 0;
        /// Remote participants may send input to this core.
        const ALLOW_CONTROL = 1 << 1;
    }
}

/// First message on a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_version: u32,
    /// Identifies the client build (a commit hash in release builds).
    pub build_id: [u8; BUILD_ID_LEN],
}

/// Relay reply to `Connect`. A negative reply means the connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub reply: i32,
}

impl Ack {
    pub fn is_accepted(&self) -> bool {
        self.reply >= 0
    }
}

/// Terminal message, sent by either side. Empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shutdown;

/// Identity and state of one core as known to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoreInfo {
    pub platform: u32,
    pub game_title: [u8; GAME_TITLE_LEN],
    pub game_code: [u8; GAME_CODE_LEN],
    pub crc32: u32,
    /// Relay-assigned id; 0 until the relay answers a registration.
    pub core_id: u32,
    /// 0 while the core is not in a room.
    pub room_id: u32,
    /// Local frame counter at registration time.
    pub frame_offset: u32,
    pub flags: CoreFlags,
}

impl CoreInfo {
    /// Size of one encoded record.
    pub const WIRE_LEN: usize = 4 + GAME_TITLE_LEN + GAME_CODE_LEN + 4 * 5;

    pub fn game_title(&self) -> String {
        str_from_fixed(&self.game_title)
    }

    pub fn game_code(&self) -> String {
        str_from_fixed(&self.game_code)
    }

    /// Store `title`, truncated to the field width.
    pub fn set_game_title(&mut self, title: &str) {
        self.game_title = fixed_from_str(title);
    }

    /// Store `code`, truncated to the field width.
    pub fn set_game_code(&mut self, code: &str) {
        self.game_code = fixed_from_str(code);
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.platform);
        out.put_slice(&self.game_title);
        out.put_slice(&self.game_code);
        out.put_u32_le(self.crc32);
        out.put_u32_le(self.core_id);
        out.put_u32_le(self.room_id);
        out.put_u32_le(self.frame_offset);
        out.put_u32_le(self.flags.bits());
    }

    pub(crate) fn decode(r: &mut BodyReader<'_>) -> Result<Self, ProtoError> {
        Ok(Self {
            platform: r.u32()?,
            game_title: r.array()?,
            game_code: r.array()?,
            crc32: r.u32()?,
            core_id: r.u32()?,
            room_id: r.u32()?,
            frame_offset: r.u32()?,
            flags: CoreFlags::from_bits_retain(r.u32()?),
        })
    }
}

fn fixed_from_str<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn str_from_fixed(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Registration request for a local core; the relay echoes it back with
/// `info.core_id` filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCore {
    pub info: CoreInfo,
    pub nonce: u32,
}

/// Ask the relay for a new slot mirroring an existing core.
/// Answered by a `RegisterCore` echo carrying `nonce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneCore {
    pub core_id: u32,
    pub flags: CoreFlags,
    pub nonce: u32,
}

/// Remove a core from the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteCore {
    pub core_id: u32,
}

impl Message for Connect {
    fn msg_kind() -> MsgKind {
        MsgKind::Connect
    }

    fn body_len(&self) -> usize {
        4 + BUILD_ID_LEN
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.protocol_version);
        out.put_slice(&self.build_id);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, 4 + BUILD_ID_LEN)?;
        Ok(Self {
            protocol_version: r.u32()?,
            build_id: r.array()?,
        })
    }
}

impl Message for Ack {
    fn msg_kind() -> MsgKind {
        MsgKind::Ack
    }

    fn body_len(&self) -> usize {
        4
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_i32_le(self.reply);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, 4)?;
        Ok(Self { reply: r.i32()? })
    }
}

impl Message for Shutdown {
    fn msg_kind() -> MsgKind {
        MsgKind::Shutdown
    }

    fn body_len(&self) -> usize {
        0
    }

    fn encode_body(&self, _out: &mut BytesMut) {}

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        BodyReader::exact(body, 0)?;
        Ok(Shutdown)
    }
}

impl Message for RegisterCore {
    fn msg_kind() -> MsgKind {
        MsgKind::RegisterCore
    }

    fn body_len(&self) -> usize {
        CoreInfo::WIRE_LEN + 4
    }

    fn encode_body(&self, out: &mut BytesMut) {
        self.info.encode(out);
        out.put_u32_le(self.nonce);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, CoreInfo::WIRE_LEN + 4)?;
        Ok(Self {
            info: CoreInfo::decode(&mut r)?,
            nonce: r.u32()?,
        })
    }
}

impl Message for CloneCore {
    fn msg_kind() -> MsgKind {
        MsgKind::CloneCore
    }

    fn body_len(&self) -> usize {
        12
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.core_id);
        out.put_u32_le(self.flags.bits());
        out.put_u32_le(self.nonce);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, 12)?;
        Ok(Self {
            core_id: r.u32()?,
            flags: CoreFlags::from_bits_retain(r.u32()?),
            nonce: r.u32()?,
        })
    }
}

impl Message for DeleteCore {
    fn msg_kind() -> MsgKind {
        MsgKind::DeleteCore
    }

    fn body_len(&self) -> usize {
        4
    }

    fn encode_body(&self, out: &mut BytesMut) {
        out.put_u32_le(self.core_id);
    }

    fn decode_body(body: &[u8]) -> Result<Self, ProtoError> {
        let mut r = BodyReader::exact(body, 4)?;
        Ok(Self { core_id: r.u32()? })
    }
}
