//! Handle-based backend for Windows targets.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running background worker.
pub struct WorkerHandle {
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Waits for the worker to exit.
    pub fn join(self) {
        let _ = self.handle.join();
    }

    /// Returns true if the worker has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Starts a named background worker.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be created.
pub fn spawn_worker<F>(name: &str, f: F) -> io::Result<WorkerHandle>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new().name(name.into()).spawn(f)?;
    Ok(WorkerHandle { handle })
}

/// Sleeps the calling worker for `d`.
///
/// The system timer behind `Sleep` has roughly 16 ms resolution, so the
/// duration is rounded up to whole milliseconds; sub-millisecond precision
/// is not available on this backend.
pub fn sleep(d: Duration) {
    let millis = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
    let rounded = if d.subsec_nanos() % 1_000_000 != 0 {
        millis.saturating_add(1)
    } else {
        millis
    };
    thread::sleep(Duration::from_millis(rounded));
}
