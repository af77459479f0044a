//! Error types for the auto-heartbeat subsystem.

use thiserror::Error;

use crate::engine::EngineError;
use crate::manager::pool::MAX_THUMPERS;

/// Error returned by [`HeartbeatManager`](crate::HeartbeatManager) operations.
///
/// All variants are local and recoverable: the caller may retry, or treat
/// auto heartbeat as simply unavailable for that context. Heartbeat
/// *transaction* failures are never surfaced here; the watcher logs them and
/// reschedules.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// The heartbeat period must be non-zero.
    #[error("invalid argument: heartbeat period must be non-zero")]
    InvalidPeriod,
    /// The operation requires auto heartbeat to be enabled for the context.
    #[error("auto heartbeat is not enabled for this context")]
    NotEnabled,
    /// All thumper slots are in use.
    #[error("thumper pool exhausted ({} slots in use)", MAX_THUMPERS)]
    PoolExhausted,
    /// The watcher thread could not be started. The slot allocated for this
    /// enable has been rolled back; no partial state is left behind.
    #[error("failed to start watcher thread: {0}")]
    ThreadStart(#[source] std::io::Error),
    /// The transaction engine could not derive a dedicated heartbeat
    /// sub-context for the owning context.
    #[error("failed to allocate heartbeat context: {0}")]
    Engine(#[from] EngineError),
}
