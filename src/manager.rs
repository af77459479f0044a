//! Heartbeat manager: the process-wide thumper pool and its watcher.
//!
//! # Architecture
//!
//! N arbitrary user threads call the public pool operations concurrently;
//! exactly one watcher thread ticks the countdowns and fires heartbeats:
//!
//! ```text
//! user thread                         watcher thread
//!      │                                    │
//!      │ enable(ctx, period)                │
//!      │   └─ allocate slot, lazily ───────>│ (spawned on first enable)
//!      │      start watcher                 │
//!      │                                    │ every tick:
//!      │ transaction_finished(ctx)          │   decrement countdowns   [timer lock]
//!      │   └─ register countdown            │   copy expired thumpers  [pool lock]
//!      │                                    │   fire heartbeats        [no lock]
//!      │ disable(ctx)                       │   reschedule             [pool → timer]
//!      │   └─ drop slot + countdown         │
//!      │      [pool → timer]                │
//! ```
//!
//! # Lock discipline
//!
//! Three independent synchronization domains: the pool lock, the timer lock,
//! and the stop flag. Whenever both locks are needed, the order is pool
//! first, then timer — only [`Shared::with_pool_then_timers`] can take the
//! pair, so the order cannot be reintroduced wrong elsewhere. Engine I/O is
//! never issued while holding either lock.

pub mod pool;
pub mod timers;
mod watcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::engine::{ContextId, TransactionEngine};
use crate::error::HeartbeatError;
use crate::platform::{self, WorkerHandle};
use crate::trace::{debug, info, warn};

use pool::{ChannelInfo, Thumper, ThumperPool};
use timers::{Ticks, TimerRegistry};
use watcher::Watcher;

/// Configuration for the heartbeat manager.
pub struct HeartbeatConfig {
    /// Interval between watcher wake-ups. Countdown granularity equals this
    /// interval; the default of one second matches the coarse precision the
    /// subsystem is designed for.
    pub tick_interval: Duration,
    /// Name given to the watcher thread.
    pub thread_name: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            thread_name: "thumper-watcher".into(),
        }
    }
}

/// Body the watcher thread executes, handed to the spawner.
type WatcherBody = Box<dyn FnOnce() + Send + 'static>;

/// How the manager starts its watcher thread. Production uses
/// [`platform::spawn_worker`]; tests substitute a spawner that fails on
/// demand to exercise the rollback path.
type SpawnFn = Box<dyn Fn(&str, WatcherBody) -> std::io::Result<WorkerHandle> + Send + Sync>;

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section here completes its writes before releasing, so a
/// poisoned guard still refers to consistent state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between user threads and the watcher thread.
pub(crate) struct Shared {
    /// Thumper slots and their channel-info snapshots.
    pool: Mutex<ThumperPool>,
    /// Live countdowns, at most one per slot.
    timers: Mutex<TimerRegistry>,
    /// Requests watcher shutdown; its own synchronization domain, touched
    /// while holding neither of the locks above.
    stop: AtomicBool,
    /// The external transaction engine heartbeats are fired through.
    engine: Arc<dyn TransactionEngine>,
    /// Watcher wake-up interval.
    tick_interval: Duration,
}

impl Shared {
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub(crate) fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub(crate) fn engine(&self) -> &dyn TransactionEngine {
        &*self.engine
    }

    pub(crate) fn lock_pool(&self) -> MutexGuard<'_, ThumperPool> {
        lock(&self.pool)
    }

    pub(crate) fn lock_timers(&self) -> MutexGuard<'_, TimerRegistry> {
        lock(&self.timers)
    }

    /// Acquires the pool lock and then the timer lock, in that fixed global
    /// order. All code that needs both goes through here; taking them in the
    /// other order anywhere would deadlock against this path.
    pub(crate) fn with_pool_then_timers<R>(
        &self,
        f: impl FnOnce(&mut ThumperPool, &mut TimerRegistry) -> R,
    ) -> R {
        let mut pool = lock(&self.pool);
        let mut timers = lock(&self.timers);
        f(&mut pool, &mut timers)
    }
}

/// Process-wide auto-heartbeat manager.
///
/// Owns the thumper pool, the timer registry, and the watcher thread.
/// Construct one explicitly and share it (by reference or `Arc`) with every
/// call site; there is no hidden global. Call [`shutdown`](Self::shutdown)
/// before tearing down the contexts it watches, otherwise the watcher may
/// still be firing heartbeats on released context handles.
pub struct HeartbeatManager {
    shared: Arc<Shared>,
    /// Watcher thread handle; `None` while stopped. Guarded so concurrent
    /// enables race the lazy start at most once.
    watcher: Mutex<Option<WorkerHandle>>,
    thread_name: String,
    spawner: SpawnFn,
}

impl HeartbeatManager {
    /// Creates a manager firing heartbeats through `engine`.
    #[must_use]
    pub fn new(engine: Arc<dyn TransactionEngine>, config: HeartbeatConfig) -> Self {
        Self::with_spawner(
            engine,
            config,
            Box::new(|name, body| platform::spawn_worker(name, body)),
        )
    }

    fn with_spawner(
        engine: Arc<dyn TransactionEngine>,
        config: HeartbeatConfig,
        spawner: SpawnFn,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                pool: Mutex::new(ThumperPool::new()),
                timers: Mutex::new(TimerRegistry::new()),
                stop: AtomicBool::new(false),
                engine,
                tick_interval: config.tick_interval,
            }),
            watcher: Mutex::new(None),
            thread_name: config.thread_name,
            spawner,
        }
    }

    /// Enables periodic heartbeats that keep presence on the channels and
    /// channel groups `ctx` is subscribed to.
    ///
    /// If auto heartbeat is already enabled for `ctx`, only the period is
    /// updated (taking effect on the next reschedule). Otherwise a dedicated
    /// heartbeat sub-context is derived, the lowest free slot is allocated,
    /// and the watcher thread is started if it is not running.
    ///
    /// The first heartbeat is not scheduled here: the countdown starts when
    /// the embedder reports a completed subscribe or heartbeat transaction
    /// via [`transaction_finished`](Self::transaction_finished).
    ///
    /// # Errors
    ///
    /// - [`HeartbeatError::InvalidPeriod`] if `period` is zero.
    /// - [`HeartbeatError::PoolExhausted`] if all slots are in use.
    /// - [`HeartbeatError::Engine`] if the sub-context cannot be derived.
    /// - [`HeartbeatError::ThreadStart`] if the watcher cannot be spawned;
    ///   the slot just allocated is rolled back.
    pub fn enable(&self, ctx: ContextId, period: Duration) -> Result<(), HeartbeatError> {
        if period.is_zero() {
            return Err(HeartbeatError::InvalidPeriod);
        }

        if self.update_period_if_enabled(ctx, period) {
            debug!(ctx = %ctx, period_ms = period.as_millis() as u64, "already enabled, period updated");
            return Ok(());
        }

        // Derive the sub-context before taking any lock; the engine may
        // block, and no engine call runs under a lock.
        let heartbeat_ctx = self.shared.engine.derive_context(ctx)?;

        let slot = {
            let mut pool = self.shared.lock_pool();
            // Another thread may have enabled this context while we were
            // deriving; treat it as a period update and discard ours.
            if let Some(slot) = pool.find(ctx) {
                if let Some(thumper) = pool.get_mut(slot) {
                    thumper.period = period;
                }
                drop(pool);
                self.shared.engine.release_context(heartbeat_ctx);
                return Ok(());
            }
            let thumper = Thumper {
                owner: ctx,
                heartbeat_ctx,
                period,
                channel_info: ChannelInfo::default(),
            };
            match pool.insert(thumper) {
                Some(slot) => slot,
                None => {
                    drop(pool);
                    self.shared.engine.release_context(heartbeat_ctx);
                    return Err(HeartbeatError::PoolExhausted);
                }
            }
        };

        if let Err(e) = self.ensure_watcher_running() {
            // Roll back so a failed first enable leaves no partial state. A
            // concurrent disable may already have freed the slot, and another
            // enable may have reused the index; remove only our own
            // registration, identified by its unique sub-context.
            let removed = {
                let mut pool = self.shared.lock_pool();
                match pool.get(slot) {
                    Some(t) if t.heartbeat_ctx == heartbeat_ctx => pool.remove(slot),
                    _ => None,
                }
            };
            if let Some(thumper) = removed {
                self.shared.engine.release_context(thumper.heartbeat_ctx);
            }
            return Err(HeartbeatError::ThreadStart(e));
        }

        info!(ctx = %ctx, slot = %slot, period_ms = period.as_millis() as u64, "auto heartbeat enabled");
        Ok(())
    }

    /// Changes the thumping period for `ctx`.
    ///
    /// The in-flight countdown is untouched; the new period is used from the
    /// next reschedule, which avoids racing the watcher mid-tick.
    ///
    /// # Errors
    ///
    /// - [`HeartbeatError::InvalidPeriod`] if `period` is zero.
    /// - [`HeartbeatError::NotEnabled`] if `ctx` has no slot.
    pub fn set_period(&self, ctx: ContextId, period: Duration) -> Result<(), HeartbeatError> {
        if period.is_zero() {
            return Err(HeartbeatError::InvalidPeriod);
        }
        if self.update_period_if_enabled(ctx, period) {
            debug!(ctx = %ctx, period_ms = period.as_millis() as u64, "heartbeat period updated");
            Ok(())
        } else {
            Err(HeartbeatError::NotEnabled)
        }
    }

    /// Disables auto heartbeat on `ctx`. Safe to call when not enabled.
    ///
    /// Once this returns, no new heartbeat for `ctx` can start. A heartbeat
    /// transaction already dispatched in the current tick completes and its
    /// result is discarded; the watcher checks ownership before
    /// rescheduling, so the countdown is not resurrected.
    pub fn disable(&self, ctx: ContextId) {
        let removed = self.shared.with_pool_then_timers(|pool, timers| {
            let slot = pool.find(ctx)?;
            timers.remove(slot);
            pool.remove(slot)
        });
        // The sub-context is released outside both locks: the engine may
        // block tearing down its connection state.
        if let Some(thumper) = removed {
            self.shared.engine.release_context(thumper.heartbeat_ctx);
            info!(ctx = %ctx, "auto heartbeat disabled");
        }
    }

    /// Returns whether auto heartbeat is enabled for `ctx`.
    #[must_use]
    pub fn is_enabled(&self, ctx: ContextId) -> bool {
        self.shared.lock_pool().find(ctx).is_some()
    }

    /// Stops the watcher thread and releases every thumper.
    ///
    /// Blocks until the watcher has fully exited, so once this returns no
    /// heartbeat can touch a context handle. Must be called before the
    /// embedder destroys its contexts. Idempotent; a later
    /// [`enable`](Self::enable) starts a fresh watcher.
    pub fn shutdown(&self) {
        {
            let mut watcher = lock(&self.watcher);
            if let Some(handle) = watcher.take() {
                info!("stopping heartbeat watcher");
                self.shared.stop.store(true, Ordering::Relaxed);
                handle.join();
                // Reset so a later enable can restart the watcher.
                self.shared.stop.store(false, Ordering::Relaxed);
            }
        }

        let drained = self.shared.with_pool_then_timers(|pool, timers| {
            timers.clear();
            pool.drain()
        });
        for thumper in &drained {
            self.shared.engine.release_context(thumper.heartbeat_ctx);
        }
        if !drained.is_empty() {
            info!(released = drained.len(), "released all thumpers");
        }
    }

    /// Notice that a subscribe or heartbeat transaction has begun on `ctx`'s
    /// owning context: the slot's countdown is withdrawn so the watcher does
    /// not fire into a busy context. No-op when not enabled.
    pub fn transaction_ongoing(&self, ctx: ContextId) {
        self.shared.with_pool_then_timers(|pool, timers| {
            if let Some(slot) = pool.find(ctx) && timers.remove(slot) {
                debug!(ctx = %ctx, slot = %slot, "countdown withdrawn, transaction ongoing");
            }
        });
    }

    /// Notice that `ctx`'s transaction has finished: registers (or
    /// re-registers) the slot's countdown from the current period. No-op
    /// when not enabled.
    pub fn transaction_finished(&self, ctx: ContextId) {
        let tick = self.shared.tick_interval;
        self.shared.with_pool_then_timers(|pool, timers| {
            if let Some(slot) = pool.find(ctx) {
                let period = pool.get(slot).map(|t| t.period);
                if let Some(period) = period {
                    timers.register(slot, Ticks::from_period(period, tick));
                    debug!(ctx = %ctx, slot = %slot, "countdown registered");
                }
            }
        });
    }

    /// Replaces the cached subscribed channel and channel-group names for
    /// `ctx`, called from the subscribe-completion path. No-op when auto
    /// heartbeat is not enabled.
    pub fn update_channel_info(
        &self,
        ctx: ContextId,
        channels: Vec<String>,
        channel_groups: Vec<String>,
    ) {
        let mut pool = self.shared.lock_pool();
        if let Some(slot) = pool.find(ctx)
            && let Some(thumper) = pool.get_mut(slot)
        {
            thumper.channel_info = ChannelInfo {
                channels,
                channel_groups,
            };
        }
    }

    /// Returns a snapshot of the subscribed channel and channel-group names
    /// cached for `ctx`, or `None` when auto heartbeat is not enabled.
    ///
    /// The snapshot is taken under the pool lock, so it never observes a
    /// half-replaced update.
    #[must_use]
    pub fn read_channel_info(&self, ctx: ContextId) -> Option<(Vec<String>, Vec<String>)> {
        let pool = self.shared.lock_pool();
        let slot = pool.find(ctx)?;
        let info = &pool.get(slot)?.channel_info;
        Some((info.channels.clone(), info.channel_groups.clone()))
    }

    /// Number of thumper slots in use.
    #[must_use]
    pub fn thumpers_in_use(&self) -> usize {
        self.shared.lock_pool().in_use()
    }

    /// Number of live countdowns.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.shared.lock_timers().active()
    }

    /// Returns whether the watcher thread is currently running.
    #[must_use]
    pub fn is_watcher_running(&self) -> bool {
        lock(&self.watcher)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Updates the period under the pool lock if `ctx` has a slot.
    fn update_period_if_enabled(&self, ctx: ContextId, period: Duration) -> bool {
        let mut pool = self.shared.lock_pool();
        let Some(slot) = pool.find(ctx) else {
            return false;
        };
        if let Some(thumper) = pool.get_mut(slot) {
            thumper.period = period;
        }
        true
    }

    /// Starts the watcher thread if it is not running.
    fn ensure_watcher_running(&self) -> std::io::Result<()> {
        let mut watcher = lock(&self.watcher);
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        // A finished handle means the previous watcher exited (shutdown that
        // raced an enable); join it before starting fresh.
        if let Some(stale) = watcher.take() {
            stale.join();
        }
        self.shared.stop.store(false, Ordering::Relaxed);
        let worker = Watcher::new(Arc::clone(&self.shared));
        let handle = (self.spawner)(&self.thread_name, Box::new(move || worker.run()))
            .inspect_err(|e| warn!(error = %e, "failed to spawn watcher thread"))?;
        *watcher = Some(handle);
        Ok(())
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        // Explicit shutdown is the supported path; this is a backstop so a
        // dropped manager never leaves the watcher running against slots it
        // can no longer observe.
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use std::io;
    use std::sync::atomic::{AtomicU64, AtomicUsize};
    use std::sync::mpsc;
    use std::thread;

    /// Minimal engine stub: sub-contexts issued from 0x1000, releases
    /// recorded, heartbeats always succeed.
    struct StubEngine {
        next_sub_ctx: AtomicU64,
        released: Mutex<Vec<ContextId>>,
    }

    impl StubEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                next_sub_ctx: AtomicU64::new(0x1000),
                released: Mutex::new(Vec::new()),
            })
        }

        fn released(&self) -> Vec<ContextId> {
            self.released.lock().unwrap().clone()
        }
    }

    impl TransactionEngine for StubEngine {
        fn derive_context(&self, _owner: ContextId) -> Result<ContextId, EngineError> {
            Ok(ContextId::new(self.next_sub_ctx.fetch_add(1, Ordering::Relaxed)))
        }

        fn release_context(&self, ctx: ContextId) {
            self.released.lock().unwrap().push(ctx);
        }

        fn heartbeat(
            &self,
            _ctx: ContextId,
            _channels: &[String],
            _channel_groups: &[String],
        ) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn failing_spawner() -> SpawnFn {
        Box::new(|_, _| Err(io::Error::other("injected spawn failure")))
    }

    #[test]
    fn spawn_failure_rolls_back_slot_and_releases_sub_context() {
        let engine = StubEngine::new();
        let mgr = HeartbeatManager::with_spawner(
            Arc::clone(&engine) as Arc<dyn TransactionEngine>,
            HeartbeatConfig::default(),
            failing_spawner(),
        );

        let err = mgr
            .enable(ContextId::new(1), Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, HeartbeatError::ThreadStart(_)));

        // No partial state left behind: slot rolled back, sub-context
        // returned to the engine, watcher never started.
        assert_eq!(mgr.thumpers_in_use(), 0);
        assert!(!mgr.is_enabled(ContextId::new(1)));
        assert!(!mgr.is_watcher_running());
        assert_eq!(engine.released(), vec![ContextId::new(0x1000)]);
    }

    #[test]
    fn spawn_failure_rollback_spares_a_reused_slot() {
        let engine = StubEngine::new();

        // First watcher start: report in, wait for the test to rearrange
        // the pool, then fail. Later starts run for real.
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let spawner: SpawnFn = {
            let entered = Mutex::new(entered_tx);
            let resume = Mutex::new(resume_rx);
            let calls = AtomicUsize::new(0);
            Box::new(move |name, body| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    entered.lock().unwrap().send(()).unwrap();
                    resume.lock().unwrap().recv().unwrap();
                    Err(io::Error::other("injected spawn failure"))
                } else {
                    platform::spawn_worker(name, body)
                }
            })
        };
        let mgr = Arc::new(HeartbeatManager::with_spawner(
            Arc::clone(&engine) as Arc<dyn TransactionEngine>,
            HeartbeatConfig::default(),
            spawner,
        ));

        // Ctx 1 takes slot 0 and enters the stalled, doomed spawn.
        let t1 = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || mgr.enable(ContextId::new(1), Duration::from_secs(30)))
        };
        entered_rx.recv().unwrap();

        // While it stalls: free slot 0 and hand the index to ctx 2, whose
        // enable inserts its thumper before blocking on the watcher start.
        mgr.disable(ContextId::new(1));
        let t2 = {
            let mgr = Arc::clone(&mgr);
            thread::spawn(move || mgr.enable(ContextId::new(2), Duration::from_secs(30)))
        };
        while !mgr.is_enabled(ContextId::new(2)) {
            thread::sleep(Duration::from_millis(1));
        }

        resume_tx.send(()).unwrap();
        assert!(matches!(
            t1.join().unwrap(),
            Err(HeartbeatError::ThreadStart(_))
        ));
        t2.join().unwrap().unwrap();

        // Ctx 1's rollback must not evict the slot's new occupant.
        assert!(mgr.is_enabled(ContextId::new(2)));
        assert_eq!(mgr.thumpers_in_use(), 1);
        // Only ctx 1's sub-context came back (from disable); ctx 2's is live.
        assert_eq!(engine.released(), vec![ContextId::new(0x1000)]);

        mgr.shutdown();
    }
}
