//! Worker-thread and sleep primitives.
//!
//! This is the capability boundary between the platform-neutral heartbeat
//! machinery and the OS: starting a named background worker, joining it, and
//! sleeping for a tick. Exactly two backends exist, selected at build time;
//! no platform-conditional code appears above this module.

#[cfg(unix)]
mod posix;
#[cfg(unix)]
pub use posix::{WorkerHandle, sleep, spawn_worker};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{WorkerHandle, sleep, spawn_worker};
