/// Heartbeat interval used when Hello omits one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// How long a fresh socket may stay silent before Hello arrives.
pub const HELLO_TIMEOUT_MS: u64 = 20_000;

/// Fixed delay (ms) before a fresh Identify after the session was invalidated.
pub const RECONNECT_DELAY_FRESH_MS: u64 = 1_500;

/// Timeout (ms) allowed for the WS write task to flush and shut down.
pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Close code sent on a deliberate shutdown. The remote drops the session.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code used when tearing down to resume. Keeps the session alive.
pub const CLOSE_RESUME: u16 = 4000;
