//! Thread-based backend for POSIX-family targets.

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
        // A worker that panicked has already torn down its own state; there
        // is nothing useful to propagate to the joiner.
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

/// Sleeps the calling worker for `d`, at nanosleep precision.
pub fn sleep(d: Duration) {
    thread::sleep(d);
}
