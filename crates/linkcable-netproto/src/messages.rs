use bytes::BytesMut;

use crate::{error::ProtoError, msg_kind::MsgKind};

pub mod room;
pub mod session;
pub mod sync;

/// A trait for all netplay protocol messages.
///
/// Each message type declares its [`MsgKind`] and its fixed body layout, so
/// the codec can build the header automatically when encoding.
pub trait Message: Sized + Send + 'static {
    /// Returns the message kind for this message type.
    fn msg_kind() -> MsgKind;

    /// Number of body bytes `encode_body` will write.
    fn body_len(&self) -> usize;

    /// Append the body to `out`.
    fn encode_body(&self, out: &mut BytesMut);

    /// Decode a body. The slice is the complete body as declared by the header.
    fn decode_body(body: &[u8]) -> Result<Self, ProtoError>;
}
