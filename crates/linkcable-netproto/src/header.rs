use crate::{
    constants::{HEADER_LEN, MAX_BODY_SIZE},
    error::ProtoError,
    msg_kind::MsgKind,
};

/// Message header (wire format).
///
/// Encoding rules:
/// - Fixed size: exactly `HEADER_LEN` bytes, sent before every body.
/// - Integer fields are little-endian.
/// - Layout is defined by `encode_into()` / `decode()` offsets below.
///
/// `kind` is kept as the raw wire value so that a reader can still skip the
/// body of a message it does not understand and stay aligned on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Raw message kind. Use [`Header::msg_kind`] to validate it.
    pub kind: u32,

    /// Number of body bytes that follow the header.
    pub body_size: u32,

    /// Per-message flags. Currently always 0 on the client side.
    pub flags: u32,
}

impl Header {
    /// Header size in bytes for the current wire layout.
    pub const LEN: usize = HEADER_LEN;

    /// Create a header for `kind` with an empty body.
    pub fn new(kind: MsgKind) -> Self {
        Self {
            kind: kind as u32,
            body_size: 0,
            flags: 0,
        }
    }

    /// Resolve the raw kind into a known [`MsgKind`].
    pub fn msg_kind(&self) -> Result<MsgKind, ProtoError> {
        MsgKind::from_repr(self.kind).ok_or(ProtoError::UnknownKind(self.kind))
    }

    /// Returns `true` when the declared body size is small enough to allocate.
    pub fn body_size_allowed(&self) -> bool {
        (self.body_size as usize) < MAX_BODY_SIZE
    }

    /// Encode this header into `out`.
    ///
    /// Offsets (bytes):
    /// - 0..4   kind (u32 LE)
    /// - 4..8   body_size (u32 LE)
    /// - 8..12  flags (u32 LE)
    pub fn encode_into(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..4].copy_from_slice(&self.kind.to_le_bytes());
        out[4..8].copy_from_slice(&self.body_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.to_le_bytes());
    }

    /// Encode into a fresh array.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        self.encode_into(&mut out);
        out
    }

    /// Decode a header from the first `HEADER_LEN` bytes of `buf`.
    ///
    /// The kind is not validated here; unknown kinds are rejected later when
    /// the body is decoded, after the body bytes have been consumed.
    pub fn decode(buf: &[u8]) -> Result<Header, ProtoError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtoError::TooShort);
        }

        Ok(Header {
            kind: read_u32_le(buf, 0)?,
            body_size: read_u32_le(buf, 4)?,
            flags: read_u32_le(buf, 8)?,
        })
    }
}

fn read_u32_le(buf: &[u8], start: usize) -> Result<u32, ProtoError> {
    let bytes: [u8; 4] = buf
        .get(start..start + 4)
        .ok_or(ProtoError::TooShort)?
        .try_into()
        .map_err(|_| ProtoError::TooShort)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::Header;
    use crate::{constants::HEADER_LEN, error::ProtoError, msg_kind::MsgKind};

    #[test]
    fn header_len_is_locked() {
        assert_eq!(Header::LEN, HEADER_LEN);
        assert_eq!(Header::LEN, 12);
    }

    #[test]
    fn header_encode_offsets_are_locked() {
        let mut h = Header::new(MsgKind::Sync);
        h.body_size = 0x3344;
        h.flags = 0xA5A5_0001;

        let buf = h.to_bytes();

        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 11);
        assert_eq!(
            u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            h.body_size
        );
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), h.flags);
    }

    #[test]
    fn header_decode_keeps_unknown_kind_raw() {
        let h = Header {
            kind: 0xDEAD,
            body_size: 3,
            flags: 0,
        };
        let decoded = Header::decode(&h.to_bytes()).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(decoded.msg_kind(), Err(ProtoError::UnknownKind(0xDEAD)));
    }

    #[test]
    fn header_decode_rejects_short_buffer() {
        let buf = Header::new(MsgKind::Ack).to_bytes();
        assert_eq!(Header::decode(&buf[..11]), Err(ProtoError::TooShort));
    }

    #[test]
    fn oversized_body_is_not_allowed() {
        let mut h = Header::new(MsgKind::Sync);
        h.body_size = 16 * 1024 * 1024;
        assert!(!h.body_size_allowed());
        h.body_size -= 1;
        assert!(h.body_size_allowed());
    }
}
