//! Countdown registry for active thumper timers.
//!
//! The watcher operates on a discrete tick lattice: one tick per wake-up of
//! the watcher thread. Periods are converted to tick counts on registration,
//! and every live countdown is decremented once per tick. The registry is
//! the only structure guarded by the timer lock; it never holds more than
//! one entry per slot.

use std::time::Duration;

use super::pool::{MAX_THUMPERS, SlotIndex};

/// A span in tick space (number of watcher wake-ups).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Ticks(u64);

impl Ticks {
    /// Creates a tick span from a raw tick count.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying tick count.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Converts a heartbeat period into ticks of `tick_interval`, rounding
    /// up so a period never expires early. A period shorter than one tick
    /// still takes one full tick.
    #[must_use]
    pub fn from_period(period: Duration, tick_interval: Duration) -> Self {
        let period = period.as_nanos();
        let tick = tick_interval.as_nanos().max(1);
        let count = period.div_ceil(tick).max(1);
        Self(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

/// One live countdown for a thumper slot.
#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    slot: SlotIndex,
    remaining: Ticks,
}

/// Unordered collection of live countdowns, at most one per slot.
///
/// Inserted by the registering thread (subscribe completion or watcher
/// reschedule) under the timer lock; decremented and drained only by the
/// watcher's tick.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    entries: Vec<TimerEntry>,
}

impl TimerRegistry {
    /// Creates an empty registry with room for every slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(MAX_THUMPERS),
        }
    }

    /// Registers a countdown for `slot`. An existing countdown for the same
    /// slot is replaced, preserving the one-entry-per-slot invariant.
    pub fn register(&mut self, slot: SlotIndex, remaining: Ticks) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.slot == slot) {
            entry.remaining = remaining;
        } else {
            self.entries.push(TimerEntry { slot, remaining });
        }
    }

    /// Removes the countdown for `slot`, if any. Returns whether one existed.
    pub fn remove(&mut self, slot: SlotIndex) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.slot != slot);
        before != self.entries.len()
    }

    /// Returns true if `slot` currently has a live countdown.
    #[must_use]
    pub fn contains(&self, slot: SlotIndex) -> bool {
        self.entries.iter().any(|e| e.slot == slot)
    }

    /// Number of live countdowns.
    #[must_use]
    pub fn active(&self) -> usize {
        self.entries.len()
    }

    /// Drops every countdown.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Advances every countdown by one tick, removing and returning the
    /// slots that reached zero.
    pub fn tick(&mut self) -> Vec<SlotIndex> {
        let mut expired = Vec::new();
        self.entries.retain_mut(|entry| {
            entry.remaining = Ticks::new(entry.remaining.get().saturating_sub(1));
            if entry.remaining.get() == 0 {
                expired.push(entry.slot);
                false
            } else {
                true
            }
        });
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: u8) -> SlotIndex {
        SlotIndex::new(n)
    }

    #[test]
    fn period_to_ticks_rounds_up() {
        let tick = Duration::from_secs(1);
        assert_eq!(Ticks::from_period(Duration::from_secs(30), tick).get(), 30);
        assert_eq!(Ticks::from_period(Duration::from_millis(1500), tick).get(), 2);
        // Shorter than one tick still waits a full tick.
        assert_eq!(Ticks::from_period(Duration::from_millis(1), tick).get(), 1);
    }

    #[test]
    fn register_replaces_existing_entry() {
        let mut reg = TimerRegistry::new();
        reg.register(slot(3), Ticks::new(10));
        reg.register(slot(3), Ticks::new(2));
        assert_eq!(reg.active(), 1);

        // The replacement countdown is the one that runs.
        assert!(reg.tick().is_empty());
        assert_eq!(reg.tick(), vec![slot(3)]);
        assert_eq!(reg.active(), 0);
    }

    #[test]
    fn tick_drains_only_expired() {
        let mut reg = TimerRegistry::new();
        reg.register(slot(0), Ticks::new(1));
        reg.register(slot(1), Ticks::new(2));
        reg.register(slot(2), Ticks::new(3));

        assert_eq!(reg.tick(), vec![slot(0)]);
        assert_eq!(reg.active(), 2);
        assert_eq!(reg.tick(), vec![slot(1)]);
        assert_eq!(reg.tick(), vec![slot(2)]);
        assert!(reg.tick().is_empty());
    }

    #[test]
    fn remove_cancels_countdown() {
        let mut reg = TimerRegistry::new();
        reg.register(slot(5), Ticks::new(1));
        assert!(reg.remove(slot(5)));
        assert!(!reg.remove(slot(5)));
        assert!(reg.tick().is_empty());
    }
}
