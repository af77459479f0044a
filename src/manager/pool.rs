//! Fixed-capacity arena of thumper slots.
//!
//! A thumper is one active auto-heartbeat registration: the owning context,
//! the dedicated sub-context heartbeats are issued on, the period, and a
//! snapshot of the channels the owner is subscribed to. Slots are allocated
//! lowest-free-index first and indices stay stable while occupied (no
//! compaction), so a context can cache its own slot index.

use std::fmt;
use std::time::Duration;

use crate::engine::ContextId;

/// Maximum number of auto-heartbeat thumpers in use at one time.
pub const MAX_THUMPERS: usize = 16;

/// Index of a thumper slot in the pool, 0..[`MAX_THUMPERS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SlotIndex(u8);

impl SlotIndex {
    /// Creates a slot index from a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is not below [`MAX_THUMPERS`].
    #[must_use]
    pub fn new(value: u8) -> Self {
        assert!((value as usize) < MAX_THUMPERS, "slot index out of range");
        Self(value)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// Owned snapshot of the channel names a context is subscribed to.
///
/// Replaced wholesale on each subscribe completion; the strings are owned
/// exclusively by the slot, so they are freed unconditionally with it.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    pub channels: Vec<String>,
    pub channel_groups: Vec<String>,
}

/// One active auto-heartbeat registration.
#[derive(Debug)]
pub struct Thumper {
    /// The context the user enabled auto heartbeat on.
    pub owner: ContextId,
    /// Dedicated sub-context heartbeats are issued on, so they never block
    /// user operations on `owner`.
    pub heartbeat_ctx: ContextId,
    /// Thumping period. Takes effect on the next reschedule, not the
    /// in-flight countdown.
    pub period: Duration,
    /// Channels and channel groups the owner is currently subscribed to.
    pub channel_info: ChannelInfo,
}

/// Fixed arena of up to [`MAX_THUMPERS`] thumpers, guarded by the pool lock.
#[derive(Debug, Default)]
pub struct ThumperPool {
    slots: [Option<Thumper>; MAX_THUMPERS],
    in_use: usize,
}

impl ThumperPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots in use.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Returns true if every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.in_use == MAX_THUMPERS
    }

    /// Finds the slot owned by `owner`, if any.
    #[must_use]
    pub fn find(&self, owner: ContextId) -> Option<SlotIndex> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|t| t.owner == owner))
            .map(|i| SlotIndex(i as u8))
    }

    /// Allocates the lowest free slot for `thumper`.
    ///
    /// The caller must have checked that `thumper.owner` has no slot yet;
    /// each owner appears in at most one slot at any time.
    ///
    /// Returns `None` when the pool is full.
    pub fn insert(&mut self, thumper: Thumper) -> Option<SlotIndex> {
        debug_assert!(self.find(thumper.owner).is_none(), "owner already has a slot");
        let free = self.slots.iter().position(Option::is_none)?;
        self.slots[free] = Some(thumper);
        self.in_use += 1;
        Some(SlotIndex(free as u8))
    }

    /// Releases `slot`, returning its thumper. The index becomes reusable.
    pub fn remove(&mut self, slot: SlotIndex) -> Option<Thumper> {
        let taken = self.slots[slot.get()].take();
        if taken.is_some() {
            self.in_use -= 1;
        }
        taken
    }

    /// Borrows the thumper in `slot`, if occupied.
    #[must_use]
    pub fn get(&self, slot: SlotIndex) -> Option<&Thumper> {
        self.slots[slot.get()].as_ref()
    }

    /// Mutably borrows the thumper in `slot`, if occupied.
    pub fn get_mut(&mut self, slot: SlotIndex) -> Option<&mut Thumper> {
        self.slots[slot.get()].as_mut()
    }

    /// Releases every slot, returning the drained thumpers.
    pub fn drain(&mut self) -> Vec<Thumper> {
        let drained: Vec<Thumper> = self.slots.iter_mut().filter_map(Option::take).collect();
        self.in_use = 0;
        drained
    }

    /// Iterates over occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (SlotIndex, &Thumper)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|t| (SlotIndex(i as u8), t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thumper(owner: u64) -> Thumper {
        Thumper {
            owner: ContextId::new(owner),
            heartbeat_ctx: ContextId::new(owner + 1000),
            period: Duration::from_secs(30),
            channel_info: ChannelInfo::default(),
        }
    }

    #[test]
    fn allocates_lowest_free_index() {
        let mut pool = ThumperPool::new();
        let a = pool.insert(thumper(1)).unwrap();
        let b = pool.insert(thumper(2)).unwrap();
        let c = pool.insert(thumper(3)).unwrap();
        assert_eq!((a.get(), b.get(), c.get()), (0, 1, 2));

        // Freeing the middle slot makes its index the next allocation.
        pool.remove(b);
        let d = pool.insert(thumper(4)).unwrap();
        assert_eq!(d.get(), 1);
        assert_eq!(pool.in_use(), 3);
    }

    #[test]
    fn indices_stay_stable_while_occupied() {
        let mut pool = ThumperPool::new();
        let a = pool.insert(thumper(1)).unwrap();
        let b = pool.insert(thumper(2)).unwrap();
        pool.remove(a);

        // No compaction: ctx 2 is still at its original index.
        assert_eq!(pool.find(ContextId::new(2)), Some(b));
        assert_eq!(pool.get(b).unwrap().owner, ContextId::new(2));
    }

    #[test]
    fn insert_fails_when_full() {
        let mut pool = ThumperPool::new();
        for i in 0..MAX_THUMPERS as u64 {
            assert!(pool.insert(thumper(i)).is_some());
        }
        assert!(pool.is_full());
        assert!(pool.insert(thumper(99)).is_none());
        assert_eq!(pool.in_use(), MAX_THUMPERS);
    }

    #[test]
    fn remove_is_idempotent_on_count() {
        let mut pool = ThumperPool::new();
        let a = pool.insert(thumper(1)).unwrap();
        assert!(pool.remove(a).is_some());
        assert!(pool.remove(a).is_none());
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn drain_releases_everything() {
        let mut pool = ThumperPool::new();
        pool.insert(thumper(1)).unwrap();
        pool.insert(thumper(2)).unwrap();
        let drained = pool.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.find(ContextId::new(1)), None);
    }
}
