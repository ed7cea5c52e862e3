use bytes::{Bytes, BytesMut};

use crate::{
    constants::{HEADER_LEN, MAX_BODY_SIZE},
    error::ProtoError,
    header::Header,
    messages::Message,
};

/// A message ready for the transport: header plus owned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    /// Header and body as one contiguous buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        out.freeze()
    }
}

/// Encode a message that implements the [`Message`] trait into a [`Frame`].
///
/// The header is built from the message type's `msg_kind()` and the encoded
/// body length.
///
/// # Example
/// ```ignore
/// use linkcable_netproto::codec::encode_message;
/// use linkcable_netproto::messages::room::Join;
///
/// let frame = encode_message(&Join { room_id: 0, core_id: 7 })?;
/// ```
pub fn encode_message<T: Message>(msg: &T) -> Result<Frame, ProtoError> {
    let body_len = msg.body_len();
    if body_len >= MAX_BODY_SIZE {
        return Err(ProtoError::BodyTooLarge(body_len));
    }

    let mut body = BytesMut::with_capacity(body_len);
    msg.encode_body(&mut body);
    debug_assert_eq!(body.len(), body_len);

    let mut header = Header::new(T::msg_kind());
    header.body_size = body.len() as u32;

    Ok(Frame {
        header,
        body: body.freeze(),
    })
}

/// Encode a message straight into contiguous wire bytes.
pub fn encode_message_bytes<T: Message>(msg: &T) -> Result<Bytes, ProtoError> {
    Ok(encode_message(msg)?.to_bytes())
}

/// Decode a body of a known message type, checking it against the header.
pub fn decode_message<T: Message>(header: &Header, body: &[u8]) -> Result<T, ProtoError> {
    check_body_len(header, body)?;
    T::decode_body(body)
}

pub(crate) fn check_body_len(header: &Header, body: &[u8]) -> Result<(), ProtoError> {
    if body.len() != header.body_size as usize {
        return Err(ProtoError::LengthMismatch {
            declared: header.body_size as usize,
            actual: body.len(),
        });
    }
    Ok(())
}
