//! Auto-heartbeat subsystem for a publish/subscribe client library.
//!
//! A process-wide pool of periodic keep-presence-alive timers ("thumpers")
//! fires heartbeat transactions on behalf of many independent client
//! contexts. A single watcher thread ticks every active countdown; expired
//! slots get a heartbeat issued on a dedicated sub-context so the owning
//! context's own operations are never blocked.
//!
//! The crate does not speak to the network itself: the embedder supplies a
//! [`TransactionEngine`] that derives sub-contexts and performs the actual
//! heartbeat transactions.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use thumper::{HeartbeatConfig, HeartbeatManager};
//!
//! let manager = HeartbeatManager::new(engine, HeartbeatConfig::default());
//! manager.enable(ctx, Duration::from_secs(30))?;
//!
//! // From the subscribe-completion path:
//! manager.update_channel_info(ctx, channels, groups);
//! manager.transaction_finished(ctx);
//!
//! // Before tearing down contexts:
//! manager.shutdown();
//! ```

pub mod engine;
pub mod error;
pub mod manager;
pub mod platform;
mod trace;

pub use engine::{ContextId, EngineError, TransactionEngine};
pub use error::HeartbeatError;
pub use manager::pool::MAX_THUMPERS;
pub use manager::{HeartbeatConfig, HeartbeatManager};
pub use trace::init_tracing;
