//! The watcher thread: a single background worker that ticks every active
//! countdown and fires heartbeats for the ones that expire.
//!
//! Per-tick locking is deliberately staged: the timer lock alone for the
//! decrement pass, the pool lock alone for copying out expired thumpers,
//! and no lock at all while the heartbeat transaction runs. The only place
//! both locks are held is the reschedule, which goes through
//! `Shared::with_pool_then_timers` like every other pairing.
//!
//! A failed heartbeat still reschedules with the unchanged period: these are
//! advisory presence pings, and the original design applies no backoff.
//! Known limitation, kept on purpose.

use std::sync::Arc;

use minstant::Instant;

use crate::engine::ContextId;
use crate::platform;
use crate::trace::{debug, info, warn};

use super::Shared;
use super::pool::SlotIndex;
use super::timers::Ticks;

/// Everything the watcher needs to fire one heartbeat, copied out of the
/// pool so no lock is held during the transaction.
struct FireSnapshot {
    owner: ContextId,
    heartbeat_ctx: ContextId,
    channels: Vec<String>,
    channel_groups: Vec<String>,
}

/// Watcher state driven by the spawned worker thread.
pub(crate) struct Watcher {
    shared: Arc<Shared>,
}

impl Watcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Runs the tick loop until the stop flag is observed.
    pub(crate) fn run(&self) {
        info!("heartbeat watcher started");
        let tick_interval = self.shared.tick_interval();
        let mut sleep_for = tick_interval;

        loop {
            platform::sleep(sleep_for);
            if self.shared.stop_requested() {
                break;
            }

            let work_started = Instant::now();
            let expired = self.shared.lock_timers().tick();
            for slot in expired {
                self.fire(slot);
            }

            // Pace the next wake-up against the monotonic clock so slow
            // heartbeat dispatch does not stretch tick spacing.
            sleep_for = tick_interval.saturating_sub(work_started.elapsed());
            if self.shared.stop_requested() {
                break;
            }
        }
        info!("heartbeat watcher exiting");
    }

    /// Fires a heartbeat for an expired slot and reschedules it.
    fn fire(&self, slot: SlotIndex) {
        let Some(shot) = self.snapshot(slot) else {
            // Disabled between expiry and now; nothing to fire.
            return;
        };

        debug!(
            ctx = %shot.owner,
            slot = %slot,
            channels = shot.channels.len(),
            channel_groups = shot.channel_groups.len(),
            "firing heartbeat"
        );
        if let Err(e) =
            self.shared
                .engine()
                .heartbeat(shot.heartbeat_ctx, &shot.channels, &shot.channel_groups)
        {
            warn!(ctx = %shot.owner, slot = %slot, error = %e, "heartbeat failed, keeping schedule");
        }

        // Reschedule from the thumper's *current* period, and only if the
        // slot still holds the same registration. The sub-context is unique
        // per enable, so this also catches a disable + re-enable by the same
        // owner while the transaction was in flight; that fresh registration
        // gets its countdown from transaction_finished, not from here.
        let tick_interval = self.shared.tick_interval();
        self.shared.with_pool_then_timers(|pool, timers| {
            if let Some(thumper) = pool.get(slot)
                && thumper.owner == shot.owner
                && thumper.heartbeat_ctx == shot.heartbeat_ctx
            {
                timers.register(slot, Ticks::from_period(thumper.period, tick_interval));
            }
        });
    }

    /// Copies the expired thumper out under the pool lock alone.
    fn snapshot(&self, slot: SlotIndex) -> Option<FireSnapshot> {
        let pool = self.shared.lock_pool();
        let thumper = pool.get(slot)?;
        Some(FireSnapshot {
            owner: thumper.owner,
            heartbeat_ctx: thumper.heartbeat_ctx,
            channels: thumper.channel_info.channels.clone(),
            channel_groups: thumper.channel_info.channel_groups.clone(),
        })
    }
}
