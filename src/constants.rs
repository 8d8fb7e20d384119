//! System-wide constants for the dispatch fabric.

/// Per-agent task queue capacity. Leaves room to buffer a few tasks
/// for a lagging agent or flaky network without unbounded growth.
pub const TASK_QUEUE_CAPACITY: usize = 16;

/// Default submit timeout when the caller doesn't specify one.
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 26;

/// Lower bound on a caller-supplied submit timeout.
pub const MIN_SUBMIT_TIMEOUT_SECS: u64 = 1;

/// Upper bound on a caller-supplied submit timeout.
pub const MAX_SUBMIT_TIMEOUT_SECS: u64 = 300;

/// Long-poll timeout for `GET /tasks`. Chosen to sit comfortably under
/// typical intermediate proxy read timeouts (60s).
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 26;

/// An agent is considered live if a long-poll is parked for it, or its
/// last seen timestamp is within this window.
pub const LIVENESS_WINDOW_SECS: u64 = 28;

/// Length in bytes of the random session id before hex-encoding.
pub const SESSION_ID_BYTES: usize = 32;
