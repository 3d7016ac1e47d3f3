//! Shared protocol constants for the ndnfile named transport

// Root prefix every request name starts with
pub const DEFAULT_PREFIX: &str = "/ndn/xrootd";

// Maximum bytes carried by one read response. Producer and consumer must agree
// on this value: segment N always starts at byte N * segment_size.
pub const DEFAULT_SEGMENT_SIZE: usize = 8 * 1024;

// How long a response stays fresh for caches along the path (ms)
pub const DEFAULT_FRESHNESS_MS: u64 = 1_000;

// Per-attempt request lifetime before the transport reports a timeout (ms)
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 4_000;

// Attempts per request before giving up with a transient delivery error
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

// Maximum segment requests outstanding for a single read call
pub const DEFAULT_PIPELINE_WINDOW: usize = 16;

// Overall deadline for one read call (ms)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;

// Default producer bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:9053";

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"NDNF";
pub const VERSION: u16 = 1;

// Maximum frame payload size (16MB) - prevents memory exhaustion from a bad peer
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

// Frame type IDs
pub mod frame {
    pub const REQUEST: u8 = 1;
    pub const RESPONSE: u8 = 2;
    pub const NACK: u8 = 3;
}

// Copy driver read buffer bounds
pub mod buffer {
    pub const DEFAULT: u64 = 262_144;
    pub const MIN: u64 = 8 * 1024;
    pub const MAX: u64 = 1024 * 1024 * 1024;
}

// Centralized timeout constants for the TCP transport
pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 2_000;

    // Base timeout for writes (ms)
    pub const WRITE_BASE_MS: u64 = 500;

    // Base timeout for a frame body once its header has arrived (ms)
    pub const READ_BASE_MS: u64 = 300;

    // Additional timeout per MB of data (ms)
    pub const PER_MB_MS: u64 = 1;

    // Calculate write deadline based on payload size (ms)
    // 500ms base + 1ms per 1MB payload (ceil)
    pub fn write_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        WRITE_BASE_MS + mb * PER_MB_MS
    }

    // Calculate read deadline based on payload size (ms)
    // 300ms base + 1ms per 1MB payload (ceil)
    pub fn read_deadline_ms(payload_len: usize) -> u64 {
        let mb = (payload_len as u64 + 1_048_575) / 1_048_576;
        READ_BASE_MS + mb * PER_MB_MS
    }
}
