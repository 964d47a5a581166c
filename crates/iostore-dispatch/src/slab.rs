//! Fixed-block slab allocator for hot-path request objects.
//!
//! Elements live in boxed blocks of `block_size` slots that are never moved
//! or reallocated, so an element stays at the same address for its whole
//! lifetime. Vacant slots are threaded onto an intrusive free list. Callers
//! address elements through generational [`SlotHandle`]s: a handle to a freed
//! slot never reaches whatever is allocated there next.
//!
//! The whole allocator sits behind one lock, which is the only point of
//! serialization on the allocation path.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// Stable, generation-checked reference to an element of a [`BlockAllocator`].
pub struct SlotHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SlotHandle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index, stable for the lifetime of the element.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for SlotHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotHandle<T> {}

impl<T> PartialEq for SlotHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for SlotHandle<T> {}

impl<T> Hash for SlotHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for SlotHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotHandle({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

struct SlabState<T> {
    blocks: Vec<Box<[Slot<T>]>>,
    free_head: Option<u32>,
    live: usize,
    /// Generation given to slots of freshly allocated blocks.
    generation_floor: u32,
}

impl<T> SlabState<T> {
    fn slot_mut(&mut self, index: u32, block_size: usize) -> Option<&mut Slot<T>> {
        let index = index as usize;
        self.blocks
            .get_mut(index / block_size)
            .map(|block| &mut block[index % block_size])
    }

    fn slot(&self, index: u32, block_size: usize) -> Option<&Slot<T>> {
        let index = index as usize;
        self.blocks
            .get(index / block_size)
            .map(|block| &block[index % block_size])
    }

    /// Append one block, link all of its slots onto the free list and
    /// return the index of its first slot.
    fn grow(&mut self, block_size: usize) -> u32 {
        let base = self.blocks.len() * block_size;
        let generation = self.generation_floor;
        let tail = self.free_head;
        let block: Box<[Slot<T>]> = (0..block_size)
            .map(|i| Slot::Vacant {
                generation,
                next_free: if i + 1 < block_size {
                    Some((base + i + 1) as u32)
                } else {
                    tail
                },
            })
            .collect();
        self.blocks.push(block);
        self.free_head = Some(base as u32);
        debug!(blocks = self.blocks.len(), block_size, "slab grew");
        base as u32
    }
}

/// Allocation counters for a [`BlockAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    pub block_size: usize,
    /// Blocks currently held.
    pub blocks: usize,
    /// Slots across all blocks.
    pub capacity: usize,
    /// Occupied slots.
    pub live: usize,
}

/// Thread-safe pool of `T` carved from fixed-size blocks.
pub struct BlockAllocator<T> {
    block_size: usize,
    state: Mutex<SlabState<T>>,
}

impl<T> BlockAllocator<T> {
    /// An empty allocator; no block is allocated until the first `alloc`.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            state: Mutex::new(SlabState {
                blocks: Vec::new(),
                free_head: None,
                live: 0,
                generation_floor: 0,
            }),
        }
    }

    /// Move `value` into a free slot, growing by one block if none is free.
    pub fn alloc(&self, value: T) -> SlotHandle<T> {
        let block_size = self.block_size;
        let mut state = self.state.lock();
        let index = match state.free_head {
            Some(index) => index,
            None => state.grow(block_size),
        };
        let Some(slot) = state.slot_mut(index, block_size) else {
            unreachable!("free list points outside the slab");
        };
        let (generation, next_free) = match &*slot {
            Slot::Vacant {
                generation,
                next_free,
            } => (*generation, *next_free),
            Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };
        *slot = Slot::Occupied { generation, value };
        state.free_head = next_free;
        state.live += 1;
        SlotHandle::new(index, generation)
    }

    /// Return the slot to the free list and hand back its value.
    ///
    /// Returns `None` for a stale handle. Memory is kept for reuse; see
    /// [`trim`](Self::trim).
    pub fn free(&self, handle: SlotHandle<T>) -> Option<T> {
        let block_size = self.block_size;
        let mut state = self.state.lock();
        let free_head = state.free_head;
        let slot = state.slot_mut(handle.index, block_size)?;
        match &*slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
            next_free: free_head,
        };
        let value = match std::mem::replace(slot, vacant) {
            Slot::Occupied { value, .. } => value,
            Slot::Vacant { .. } => unreachable!(),
        };
        state.free_head = Some(handle.index);
        state.live -= 1;
        Some(value)
    }

    /// Run `f` on the element, or return `None` for a stale handle.
    pub fn with<R>(&self, handle: SlotHandle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        let state = self.state.lock();
        match state.slot(handle.index, self.block_size)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(f(value))
            }
            _ => None,
        }
    }

    /// Run `f` on the element mutably, or return `None` for a stale handle.
    pub fn with_mut<R>(&self, handle: SlotHandle<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut state = self.state.lock();
        match state.slot_mut(handle.index, self.block_size)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(f(value))
            }
            _ => None,
        }
    }

    pub fn contains(&self, handle: SlotHandle<T>) -> bool {
        self.with(handle, |_| ()).is_some()
    }

    /// Release every block if no element is live. Returns the number of
    /// blocks released.
    ///
    /// Meant to be called on a low-memory notification. Does nothing while
    /// any element is still allocated.
    pub fn trim(&self) -> usize {
        let mut state = self.state.lock();
        if state.live != 0 || state.blocks.is_empty() {
            return 0;
        }
        // Every slot is vacant and carries a generation newer than any handle
        // issued for it; start fresh blocks above all of them.
        let floor = state
            .blocks
            .iter()
            .flat_map(|block| block.iter())
            .map(|slot| match slot {
                Slot::Vacant { generation, .. } | Slot::Occupied { generation, .. } => *generation,
            })
            .max()
            .unwrap_or(0);
        state.generation_floor = state.generation_floor.max(floor);
        let released = state.blocks.len();
        state.blocks = Vec::new();
        state.free_head = None;
        debug!(released, "slab trimmed");
        released
    }

    pub fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        AllocatorStats {
            block_size: self.block_size,
            blocks: state.blocks.len(),
            capacity: state.blocks.len() * self.block_size,
            live: state.live,
        }
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().live
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl<T> fmt::Debug for BlockAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("BlockAllocator")
            .field("block_size", &stats.block_size)
            .field("blocks", &stats.blocks)
            .field("live", &stats.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_alloc_creates_one_block() {
        let slab = BlockAllocator::new(4);
        assert_eq!(slab.block_count(), 0);
        let h = slab.alloc("a");
        assert_eq!(slab.block_count(), 1);
        assert_eq!(slab.with(h, |v| *v), Some("a"));
        assert_eq!(
            slab.stats(),
            AllocatorStats {
                block_size: 4,
                blocks: 1,
                capacity: 4,
                live: 1
            }
        );
    }

    #[test]
    fn reuse_within_block_size_never_grows() {
        let slab = BlockAllocator::new(8);
        for round in 0..100 {
            let handles: Vec<_> = (0..8).map(|i| slab.alloc(round * 8 + i)).collect();
            for h in handles {
                assert!(slab.free(h).is_some());
            }
        }
        assert_eq!(slab.block_count(), 1);
        assert_eq!(slab.live_count(), 0);
    }

    #[test]
    fn grows_by_whole_blocks() {
        let slab = BlockAllocator::new(3);
        let handles: Vec<_> = (0..7).map(|i| slab.alloc(i)).collect();
        assert_eq!(slab.block_count(), 3);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(slab.with(*h, |v| *v), Some(i));
        }
    }

    #[test]
    fn free_returns_value_once() {
        let slab = BlockAllocator::new(2);
        let h = slab.alloc(String::from("payload"));
        assert_eq!(slab.free(h).as_deref(), Some("payload"));
        assert!(slab.free(h).is_none());
        assert!(!slab.contains(h));
    }

    #[test]
    fn stale_handle_does_not_reach_reused_slot() {
        let slab = BlockAllocator::new(1);
        let old = slab.alloc(1);
        slab.free(old);
        let new = slab.alloc(2);
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(slab.with(old, |v| *v).is_none());
        assert!(slab.with_mut(old, |v| *v = 9).is_none());
        assert_eq!(slab.with(new, |v| *v), Some(2));
    }

    #[test]
    fn with_mut_updates_in_place() {
        let slab = BlockAllocator::new(4);
        let h = slab.alloc(vec![1]);
        slab.with_mut(h, |v| v.push(2));
        assert_eq!(slab.free(h), Some(vec![1, 2]));
    }

    #[test]
    fn trim_requires_no_live_elements() {
        let slab = BlockAllocator::new(2);
        let a = slab.alloc(1);
        let b = slab.alloc(2);
        let c = slab.alloc(3);
        assert_eq!(slab.block_count(), 2);

        slab.free(a);
        assert_eq!(slab.trim(), 0);
        assert_eq!(slab.block_count(), 2);

        slab.free(b);
        slab.free(c);
        assert_eq!(slab.trim(), 2);
        assert_eq!(slab.block_count(), 0);
        assert_eq!(slab.stats().capacity, 0);
        assert_eq!(slab.trim(), 0);
    }

    #[test]
    fn handles_stay_stale_across_trim() {
        let slab = BlockAllocator::new(2);
        let old = slab.alloc(1);
        slab.free(old);
        slab.trim();
        let new = slab.alloc(2);
        assert_eq!(old.index(), new.index());
        assert!(slab.with(old, |v| *v).is_none());
        assert_eq!(slab.with(new, |v| *v), Some(2));
    }

    #[test]
    fn concurrent_alloc_free() {
        let slab = BlockAllocator::new(16);
        std::thread::scope(|s| {
            for t in 0..4 {
                let slab = &slab;
                s.spawn(move || {
                    for i in 0..500 {
                        let h = slab.alloc(t * 1000 + i);
                        assert_eq!(slab.free(h), Some(t * 1000 + i));
                    }
                });
            }
        });
        assert_eq!(slab.live_count(), 0);
        assert!(slab.block_count() <= 1);
    }
}
