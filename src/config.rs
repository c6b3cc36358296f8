//! Compile-time tunables.

/// Maximum number of MQTT client instances per process.
pub const MAX_HANDLE: usize = 4;

/// Maximum number of outgoing PUBLISH packets stashed per client while
/// waiting for a PUBACK or PUBREC.
pub const MAX_OUTGOING_PUBLISHES: usize = 10;

/// Maximum number of topic filters in a single SUBSCRIBE or UNSUBSCRIBE
/// request.
pub const MAX_OUTGOING_SUBSCRIBES: usize = 10;

/// Smallest scratch network buffer accepted at client creation.
pub const MIN_NETWORK_BUFFER_SIZE: usize = 256;

/// Send + ACK-wait attempts per PUBLISH, SUBSCRIBE or UNSUBSCRIBE request.
pub const MAX_RETRY_VALUE: u8 = 3;

/// Timeout for receiving the CONNACK packet, in milliseconds.
pub const CONNACK_RECV_TIMEOUT_MS: u32 = 2000;

/// Network socket receive timeout, in milliseconds.
pub const SOCKET_RECEIVE_TIMEOUT_MS: u32 = 1;

/// Timeout handed to the codec process loop (zero drains without blocking).
pub const RECEIVE_DATA_TIMEOUT_MS: u32 = 0;

/// Receive thread sleep between process-loop drains, in milliseconds.
pub const RECEIVE_THREAD_SLEEP_MS: u64 = 100;

/// Budget for waiting on a PUBACK, PUBREC, SUBACK or UNSUBACK,
/// in milliseconds.
pub const ACK_RECEIVE_TIMEOUT_MS: u32 = 3000;

/// Wall-time budget for aggregating short reads into a requested packet
/// read, in milliseconds.
pub const MESSAGE_RECEIVE_TIMEOUT_MS: u64 = 3000;

/// Transport send timeout used while connecting, in milliseconds.
pub const MESSAGE_SEND_TIMEOUT_MS: u32 = 3000;

/// Enqueue timeout for transport disconnect notifications, in milliseconds.
pub const DISCONNECT_EVENT_QUEUE_TIMEOUT_MS: u64 = 500;
