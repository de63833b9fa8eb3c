use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

pub trait Progress: Send + Sync {
    fn start(&self);

    /// The worker pool has settled; `end` follows.
    fn stop(&self);

    fn end(&self, has_error: bool);

    fn update_progress(&self, parts: u64);

    /// Parts that were already complete and went through checksum verification.
    fn update_checksum(&self, parts: u64);

    fn increment_byte_read(&self, bytes: u64);

    fn increment_byte_written(&self, bytes: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: RunState,
    pub stopped: bool,
    pub parts_transferred: u64,
    pub parts_checksummed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug)]
pub struct ProgressCounters {
    state: Mutex<RunState>,
    stopped: AtomicBool,
    parts_transferred: AtomicU64,
    parts_checksummed: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            stopped: AtomicBool::new(false),
            parts_transferred: AtomicU64::new(0),
            parts_checksummed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }
}

impl ProgressCounters {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state(),
            stopped: self.stopped.load(Ordering::SeqCst),
            parts_transferred: self.parts_transferred.load(Ordering::SeqCst),
            parts_checksummed: self.parts_checksummed.load(Ordering::SeqCst),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            bytes_written: self.bytes_written.load(Ordering::SeqCst),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl Progress for ProgressCounters {
    fn start(&self) {
        self.set_state(RunState::Running);
        self.stopped.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn end(&self, has_error: bool) {
        let snapshot = self.snapshot();
        tracing::info!(
            has_error,
            parts_transferred = snapshot.parts_transferred,
            parts_checksummed = snapshot.parts_checksummed,
            bytes_written = snapshot.bytes_written,
            "transfer ended"
        );
        self.set_state(if has_error {
            RunState::Failed
        } else {
            RunState::Succeeded
        });
    }

    fn update_progress(&self, parts: u64) {
        self.parts_transferred.fetch_add(parts, Ordering::SeqCst);
    }

    fn update_checksum(&self, parts: u64) {
        self.parts_checksummed.fetch_add(parts, Ordering::SeqCst);
    }

    fn increment_byte_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::SeqCst);
    }

    fn increment_byte_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::SeqCst);
    }
}
