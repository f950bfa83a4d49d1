//! Fixed arena of playout buffer slots.

/// Largest supported pool, bounded by the bitset width.
pub(crate) const MAX_SLOTS: usize = u64::BITS as usize;

/// Tracks which of `N` backend buffers are queued on the source.
///
/// Slots are identified by index. A slot is free until [`acquire`] hands it
/// out and stays queued until it is released, either because the backend
/// finished playing it or because the whole pool was reset.
///
/// [`acquire`]: BufferPool::acquire
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BufferPool {
    size: usize,
    queued: u64,
}

impl BufferPool {
    /// Creates a pool of `size` free slots, capped at [`MAX_SLOTS`].
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size: size.min(MAX_SLOTS),
            queued: 0,
        }
    }

    /// Total number of slots.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Marks the lowest free slot as queued and returns it.
    pub(crate) fn acquire(&mut self) -> Option<usize> {
        let slot = (!self.queued).trailing_zeros() as usize;
        if slot >= self.size {
            return None;
        }
        self.queued |= 1 << slot;
        Some(slot)
    }

    /// Frees a queued slot. Returns `false` if it was not queued.
    pub(crate) fn release(&mut self, slot: usize) -> bool {
        if slot >= self.size || !self.is_queued(slot) {
            return false;
        }
        self.queued &= !(1 << slot);
        true
    }

    /// Frees every slot.
    pub(crate) fn release_all(&mut self) {
        self.queued = 0;
    }

    /// Keeps only the queued slots that are also set in `mask`.
    pub(crate) fn retain(&mut self, mask: u64) {
        self.queued &= mask;
    }

    pub(crate) fn is_queued(&self, slot: usize) -> bool {
        slot < self.size && self.queued & (1 << slot) != 0
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.queued.count_ones() as usize
    }

    /// Bitset of queued slots.
    pub(crate) fn mask(&self) -> u64 {
        self.queued
    }

    /// Queued slots in ascending order.
    pub(crate) fn queued_slots(&self) -> Vec<usize> {
        slots_in(self.queued)
    }
}

/// Slot indices set in `mask`, in ascending order.
pub(crate) fn slots_in(mask: u64) -> Vec<usize> {
    (0..MAX_SLOTS).filter(|&slot| mask & (1 << slot) != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_full() {
        let mut pool = BufferPool::new(7);
        for expected in 0..7 {
            assert_eq!(pool.acquire(), Some(expected));
        }
        assert_eq!(pool.acquire(), None);
        assert_eq!(pool.queued_count(), 7);
    }

    #[test]
    fn test_release_reuses_lowest_slot() {
        let mut pool = BufferPool::new(7);
        for _ in 0..4 {
            pool.acquire();
        }
        assert!(pool.release(1));
        assert!(!pool.release(1));
        assert_eq!(pool.acquire(), Some(1));
        assert_eq!(pool.acquire(), Some(4));
    }

    #[test]
    fn test_release_out_of_range() {
        let mut pool = BufferPool::new(3);
        assert!(!pool.release(10));
        assert!(!pool.is_queued(10));
    }

    #[test]
    fn test_retain_and_slots() {
        let mut pool = BufferPool::new(7);
        for _ in 0..5 {
            pool.acquire();
        }
        pool.retain(0b1_0110);
        assert_eq!(pool.queued_slots(), vec![1, 2, 4]);
        assert_eq!(pool.mask(), 0b1_0110);

        pool.release_all();
        assert_eq!(pool.queued_count(), 0);
    }

    #[test]
    fn test_size_is_capped() {
        assert_eq!(BufferPool::new(100).size(), MAX_SLOTS);
    }
}
