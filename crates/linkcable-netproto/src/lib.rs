//! Wire protocol for the linkcable netplay relay.
//!
//! Every message is a fixed 12-byte [`header::Header`] followed by a body whose
//! layout is fixed per [`msg_kind::MsgKind`]. All integers are little-endian.

pub mod codec;
pub mod constants;
pub mod error;
pub mod header;
pub mod messages;
pub mod msg_kind;
pub mod packet;
mod wire;
