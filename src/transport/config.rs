use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_LEN;

/// Transport configuration, constructed once at startup and passed by value
/// into the processes that need it. There is no ambient global registry.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-candidate connect timeout for outbound connection attempts.
    pub connect_timeout: Duration,
    /// Listen backlog for server sockets.
    pub listen_backlog: i32,
    /// How long the batching writer waits after the first message of a batch
    /// before flushing, so closely-spaced sends coalesce. Zero flushes
    /// immediately.
    pub flush_delay: Duration,
    /// Bound on waiting for a worker thread to exit during `stop()`; the
    /// caller proceeds with a warning once it elapses.
    pub join_timeout: Duration,
    /// Largest accepted frame payload.
    pub max_frame_len: usize,
    /// When set, inbound messages are dispatched to the receiver on a
    /// bounded pool of this many threads instead of inline on the reader
    /// thread. Pool dispatch keeps a slow receiver from delaying reads but
    /// no longer guarantees per-connection delivery order.
    pub dispatch_threads: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            listen_backlog: 50,
            flush_delay: Duration::ZERO,
            join_timeout: Duration::from_secs(60),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            dispatch_threads: None,
        }
    }
}
