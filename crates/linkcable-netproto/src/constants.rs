/// Wire-format protocol version sent in `Connect`.
/// The relay compares it for exact equality.
pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed header length in bytes (wire format).
pub const HEADER_LEN: usize = 12;

/// Largest single write or read used when moving a body over the stream.
pub const CHUNK_SIZE: usize = 4096;

/// Declared body sizes at or above this are refused without allocating.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Default relay TCP port.
pub const DEFAULT_PORT: u16 = 4267;

/// Length of the client build identifier carried by `Connect`.
pub const BUILD_ID_LEN: usize = 20;

/// Fixed width of the game title field in `CoreInfo` (NUL padded).
pub const GAME_TITLE_LEN: usize = 16;

/// Fixed width of the game code field in `CoreInfo` (NUL padded).
pub const GAME_CODE_LEN: usize = 12;
