//! Protocol and runtime constants

/// Connection id reserved for the in-process host participant
pub const HOST_CONNECTION_ID: i32 = -1;

/// Highest connection id the transport hands out (must fit the i16 wire origin)
pub const MAX_CONNECTION_ID: i32 = i16::MAX as i32;

/// Frame magic ("VC" little endian)
pub const FRAME_MAGIC: u16 = 0x5643;

/// Frame header: magic(2) + length(4)
pub const FRAME_HEADER_SIZE: usize = 6;

/// Maximum voice payload carried by a single packet
pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024;

/// Largest message body: type(1) + origin(2) + owner(4) + len(2) + payload
pub const MAX_MESSAGE_SIZE: usize = 1 + 2 + 4 + 2 + MAX_PAYLOAD_SIZE;

/// Largest frame accepted by the codec
pub const MAX_FRAME_SIZE: usize = FRAME_HEADER_SIZE + MAX_MESSAGE_SIZE;

/// Default TCP port for the relay server
pub const DEFAULT_TCP_PORT: u16 = 7777;

/// Default per-connection outbound queue depth (messages)
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Default capacity of the server event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default capacity of the proxy event broadcast channel
pub const PROXY_EVENT_CAPACITY: usize = 256;

/// Default time to wait for ProxyAssigned before re-requesting
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2000;

/// Default synthetic capture frame interval
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 20;

/// Default synthetic capture frame size in bytes
pub const DEFAULT_FRAME_BYTES: usize = 160;

/// Default capture channel capacity (frames)
pub const DEFAULT_CAPTURE_QUEUE: usize = 64;

/// Default playback channel capacity (frames)
pub const DEFAULT_PLAYBACK_QUEUE: usize = 512;

/// Default interval between stats log lines
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;
