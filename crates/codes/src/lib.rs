//! Bitmap code allocation.
//!
//! Codes handed out by [`CodeAllocator`] start at [`CODE_BASE`] so they never
//! collide with the small codes callers pick for their own bitmaps. Slot
//! occupancy lives in a bit vector that grows in [`GROW_SLOTS`] steps and is
//! never shrunk; released slots are recycled instead.

use bitvec::prelude::{BitVec, Lsb0};
use static_assertions::const_assert;

/// First code issued by the allocator. Codes below this value belong to callers.
pub const CODE_BASE: i32 = 1000;
/// Number of slots added every time the allocator runs out of free slots.
pub const GROW_SLOTS: usize = 256;
/// Slots inspected per word while searching for a free slot.
pub const BLOCK_BITS: usize = u32::BITS as usize;

const_assert!(GROW_SLOTS % BLOCK_BITS == 0);

#[derive(Debug, Clone, Default)]
pub struct CodeAllocator {
    // slots.len() is always a multiple of BLOCK_BITS
    slots: BitVec<u32, Lsb0>,
    last: usize,
    in_use: usize,
}

impl CodeAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Returns true when `code` was issued by an allocator (it is in the
    /// reserved range), regardless of whether it is currently in use.
    pub fn is_managed(code: i32) -> bool {
        code >= CODE_BASE
    }

    pub fn is_in_use(&self, code: i32) -> bool {
        slot_for_code(code)
            .and_then(|slot| self.slots.get(slot).map(|bit| *bit))
            .unwrap_or(false)
    }

    /// Issues a fresh code.
    ///
    /// The slot under the cursor is tried first. When it is taken, 32-slot
    /// blocks are scanned from the cursor's block to the end and then from
    /// the start up to the cursor's block, skipping full blocks. Only when
    /// every slot is occupied does the allocator grow.
    pub fn acquire(&mut self) -> i32 {
        let capacity = self.slots.len();
        if self.last < capacity && !self.slots[self.last] {
            return self.take(self.last);
        }

        let block_count = capacity / BLOCK_BITS;
        let mut start = if self.last < capacity {
            self.last / BLOCK_BITS
        } else {
            0
        };
        let mut end = block_count;
        loop {
            if let Some(slot) = self.scan_blocks(start, end) {
                return self.take(slot);
            }
            if start == 0 {
                break;
            }
            end = start;
            start = 0;
        }

        self.grow()
    }

    /// Returns `code` to the pool. Codes outside the reserved range and codes
    /// that are not currently in use are ignored and report `false`.
    pub fn release(&mut self, code: i32) -> bool {
        let Some(slot) = slot_for_code(code) else {
            return false;
        };
        if slot >= self.slots.len() || !self.slots[slot] {
            return false;
        }
        self.slots.set(slot, false);
        self.in_use -= 1;
        // Rewinding the cursor hands low codes out again before higher ones.
        if slot < self.last {
            self.last = slot;
        }
        true
    }

    fn scan_blocks(&self, start: usize, end: usize) -> Option<usize> {
        let words = self.slots.as_raw_slice();
        for (offset, word) in words[start..end].iter().enumerate() {
            if *word == u32::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            return Some((start + offset) * BLOCK_BITS + bit);
        }
        None
    }

    fn grow(&mut self) -> i32 {
        let slot = self.slots.len();
        self.slots.resize(slot + GROW_SLOTS, false);
        log::debug!(
            "code allocator grew to {} slots ({} in use)",
            self.slots.len(),
            self.in_use
        );
        self.take(slot)
    }

    fn take(&mut self, slot: usize) -> i32 {
        self.slots.set(slot, true);
        self.in_use += 1;
        self.last = slot + 1;
        code_for_slot(slot)
    }
}

fn slot_for_code(code: i32) -> Option<usize> {
    code.checked_sub(CODE_BASE)
        .and_then(|slot| usize::try_from(slot).ok())
}

fn code_for_slot(slot: usize) -> i32 {
    let slot = i32::try_from(slot).unwrap_or_else(|_| panic!("code slot {slot} overflows i32"));
    CODE_BASE
        .checked_add(slot)
        .unwrap_or_else(|| panic!("code for slot {slot} overflows i32"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{CODE_BASE, CodeAllocator, GROW_SLOTS};

    #[test]
    fn first_code_is_code_base_and_grows_once() {
        let mut codes = CodeAllocator::new();
        assert_eq!(codes.capacity(), 0);
        assert_eq!(codes.acquire(), CODE_BASE);
        assert_eq!(codes.capacity(), GROW_SLOTS);
        assert_eq!(codes.acquire(), CODE_BASE + 1);
        assert_eq!(codes.in_use(), 2);
    }

    #[test]
    fn release_then_acquire_returns_the_same_code() {
        let mut codes = CodeAllocator::new();
        let code = codes.acquire();
        assert!(codes.release(code));
        assert_eq!(codes.acquire(), code);
        assert_eq!(codes.capacity(), GROW_SLOTS);
    }

    #[test]
    fn release_ignores_caller_codes_and_unused_slots() {
        let mut codes = CodeAllocator::new();
        let code = codes.acquire();
        assert!(!codes.release(0));
        assert!(!codes.release(-2));
        assert!(!codes.release(CODE_BASE - 1));
        assert!(!codes.release(code + 1));
        assert!(!codes.release(CODE_BASE + 10_000));
        assert!(codes.release(code));
        assert!(!codes.release(code));
        assert_eq!(codes.in_use(), 0);
    }

    #[test]
    fn churn_reuses_released_codes_before_growing() {
        let mut codes = CodeAllocator::new();
        let issued = (0..=GROW_SLOTS).map(|_| codes.acquire()).collect::<Vec<_>>();
        assert_eq!(issued.len(), GROW_SLOTS + 1);
        assert_eq!(codes.capacity(), GROW_SLOTS * 2);

        let released = issued[..GROW_SLOTS].iter().copied().collect::<HashSet<_>>();
        for code in &released {
            assert!(codes.release(*code));
        }

        let next = codes.acquire();
        assert!(released.contains(&next));

        // Every remaining slot, released or never issued, is handed out before
        // the allocator grows again.
        let free_before_growth = codes.capacity() - codes.in_use();
        for _ in 0..free_before_growth {
            codes.acquire();
        }
        assert_eq!(codes.capacity(), GROW_SLOTS * 2);
        assert_eq!(codes.in_use(), GROW_SLOTS * 2);

        assert_eq!(codes.acquire(), CODE_BASE + (GROW_SLOTS * 2) as i32);
        assert_eq!(codes.capacity(), GROW_SLOTS * 3);
    }

    #[test]
    fn scan_skips_full_blocks_and_wraps_to_the_start() {
        let mut codes = CodeAllocator::new();
        let issued = (0..GROW_SLOTS).map(|_| codes.acquire()).collect::<Vec<_>>();
        assert_eq!(codes.capacity(), GROW_SLOTS);

        // Free one slot deep in the first block and one in the last block.
        assert!(codes.release(issued[3]));
        assert!(codes.release(issued[200]));
        assert_eq!(codes.acquire(), issued[3]);
        // Cursor now sits at slot 4 which is taken; the scan starts at block 0
        // and finds slot 200 after skipping the full blocks in between.
        assert_eq!(codes.acquire(), issued[200]);
        assert_eq!(codes.capacity(), GROW_SLOTS);
    }

    #[test]
    fn issued_codes_are_unique_while_in_use() {
        let mut codes = CodeAllocator::new();
        let mut live = HashSet::new();
        for round in 0..600 {
            let code = codes.acquire();
            assert!(live.insert(code), "code {code} issued twice");
            if round % 3 == 0 {
                let victim = *live.iter().min().expect("live code");
                live.remove(&victim);
                assert!(codes.release(victim));
            }
        }
        for code in &live {
            assert!(codes.is_in_use(*code));
        }
        assert_eq!(codes.in_use(), live.len());
    }
}
