use std::time::Duration;

use clap::Parser;
use linkcable_netproto::constants::{BUILD_ID_LEN, CHUNK_SIZE, DEFAULT_PORT, HEADER_LEN};

/// Default outbound queue capacity in bytes.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(name = "linkcable")]
pub struct ClientConfig {
    /// Relay host name or IP address
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Relay TCP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Outbound queue capacity in bytes (at least one header plus one chunk)
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Upper bound in milliseconds on how long the worker waits before
    /// re-checking connection state
    #[arg(long, default_value_t = 4)]
    pub poll_interval_ms: u64,

    /// Give up connecting (TCP connect plus handshake) after N seconds
    #[arg(long, default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Client build identifier as hex (up to 20 bytes); sent in Connect
    #[arg(long, default_value = "")]
    pub build_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: 4,
            connect_timeout_secs: 5,
            build_id: String::new(),
        }
    }
}

impl ClientConfig {
    /// Queue capacity, raised to the smallest value that can hold any single
    /// header or body chunk.
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(HEADER_LEN.max(CHUNK_SIZE))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Decode `build_id` into the fixed-width wire field.
    ///
    /// Decoding stops at the first invalid hex pair; unused bytes stay zero.
    pub fn build_id_bytes(&self) -> [u8; BUILD_ID_LEN] {
        let mut out = [0u8; BUILD_ID_LEN];
        let digits = self.build_id.trim().as_bytes();
        for (slot, pair) in out.iter_mut().zip(digits.chunks_exact(2)) {
            match hex::decode(pair) {
                Ok(byte) => *slot = byte[0],
                Err(_) => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_raised_to_one_chunk() {
        let config = ClientConfig {
            queue_capacity: 16,
            ..ClientConfig::default()
        };
        assert_eq!(config.effective_queue_capacity(), CHUNK_SIZE);
    }

    #[test]
    fn build_id_decodes_hex_prefix() {
        let config = ClientConfig {
            build_id: "0a1B2c".to_string(),
            ..ClientConfig::default()
        };
        let id = config.build_id_bytes();
        assert_eq!(&id[..3], &[0x0a, 0x1b, 0x2c]);
        assert!(id[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn build_id_stops_at_invalid_digit() {
        let config = ClientConfig {
            build_id: "ffzz11".to_string(),
            ..ClientConfig::default()
        };
        let id = config.build_id_bytes();
        assert_eq!(id[0], 0xff);
        assert!(id[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn parses_from_args() {
        let config =
            ClientConfig::try_parse_from(["linkcable", "--host", "relay.lan", "--port", "5000"])
                .unwrap();
        assert_eq!(config.host, "relay.lan");
        assert_eq!(config.port, 5000);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
