//! Collaborator boundary: client context handles and the transaction engine.
//!
//! The heartbeat subsystem never builds requests or parses replies itself.
//! It drives an embedder-supplied [`TransactionEngine`], which owns the
//! network transaction state machine, through an opaque [`ContextId`] handle
//! per client connection.

use std::fmt;

use thiserror::Error;

/// Opaque handle to a client's persistent connection state.
///
/// The heartbeat subsystem never dereferences a context; it only passes
/// handles back to the [`TransactionEngine`] that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ContextId(u64);

impl ContextId {
    /// Creates a context handle from an embedder-assigned identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{:04x}", self.0)
    }
}

/// Error reported by the transaction engine.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(String);

impl EngineError {
    /// Creates an engine error with the given message.
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// The external transaction engine the watcher fires heartbeats through.
///
/// Implementations are shared across the watcher thread and every user
/// thread calling the public pool operations, hence `Send + Sync`.
///
/// [`heartbeat`](TransactionEngine::heartbeat) may block on network I/O; the
/// subsystem guarantees it is never invoked while holding any internal lock,
/// so a slow or stuck heartbeat can delay only that one slot's next
/// registration, never other slots' bookkeeping.
pub trait TransactionEngine: Send + Sync {
    /// Allocates a dedicated sub-context mirroring `owner`'s connection
    /// settings (identity, origin, proxy). Heartbeats are issued on this
    /// sub-context so they never block user operations on the owner.
    fn derive_context(&self, owner: ContextId) -> Result<ContextId, EngineError>;

    /// Releases a sub-context previously returned by
    /// [`derive_context`](TransactionEngine::derive_context).
    fn release_context(&self, ctx: ContextId);

    /// Performs one heartbeat transaction on `ctx` for the given subscribed
    /// channels and channel groups. Blocks until the transaction completes.
    fn heartbeat(
        &self,
        ctx: ContextId,
        channels: &[String],
        channel_groups: &[String],
    ) -> Result<(), EngineError>;
}
