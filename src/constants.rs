pub mod network {
    pub const SSH_DEFAULT_PORT: u16 = 22;
    pub const TIMEOUT_SSH_READY_MS: u64 = 10_000;
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;
    pub const POLL_IDLE_SLEEP_MS: u64 = 20;
}

pub mod pool {
    pub const DEFAULT_SIZE: usize = 4;
    pub const DEFAULT_OVERFLOW: usize = 4;
    /// Effectively unbounded: 30 days.
    pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30 * 24 * 60 * 60 * 1000;
    pub const DEFAULT_AVAIL_WAIT_MS: u64 = 1;
}

pub mod buffers {
    pub const DEFAULT_LOG_MAX_SIZE: usize = 1_000;
    pub const SINK_CAPACITY: usize = 256;
    pub const STDIN_CAPACITY: usize = 16;
    pub const READ_CHUNK_BYTES: usize = 8192;
    /// Stderr lines logged when a program exits.
    pub const EXIT_TAIL_LINES: usize = 5;
}

pub mod pty {
    pub const TERM: &str = "xterm";
    pub const COLUMNS: u32 = 80;
    pub const ROWS: u32 = 40;
    pub const SPEED_BAUD: u32 = 14_400;
}
