use crate::{
    arena::Arena,
    block::{Block, MIN_BLOCK_SIZE},
};

/// Number of size classes, including the final unbounded one.
pub(crate) const CLASS_COUNT: usize = 16;

/// Upper bound (inclusive) of each bounded size class, in total block bytes.
/// Fine granularity where small allocations cluster, doubling afterwards.
/// Together with the implicit last class this partitions
/// `[MIN_BLOCK_SIZE, +inf)` without gaps, and [`class_of`] is monotonic over
/// it, which the validator relies on when it re-derives bucket membership.
const CLASS_LIMITS: [usize; CLASS_COUNT - 1] = [
    32, 64, 96, 128, 160, 192, 224, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768,
];

/// Maps a total block size to the index of the free list that should hold
/// blocks of that size. Total and monotonic: a larger size never maps to a
/// smaller index.
pub(crate) fn class_of(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK_SIZE);

    CLASS_LIMITS
        .iter()
        .position(|limit| size <= *limit)
        .unwrap_or(CLASS_COUNT - 1)
}

/// The segregated free list index: one intrusive doubly linked list head per
/// size class. The lists themselves live inside the free blocks (see
/// [`crate::block`]); only the heads live here, which is exactly the part of
/// the structure that moves out of the arena and into the allocator handle.
///
/// A free block is owned by exactly one list, always the one matching
/// `class_of` of its *current* size. Whoever changes a block's size while it
/// is free must remove it first and reinsert it afterwards; both operations
/// here are O(1).
pub(crate) struct FreeListIndex {
    heads: [Option<Block>; CLASS_COUNT],
}

impl FreeListIndex {
    pub const fn new() -> Self {
        Self {
            heads: [None; CLASS_COUNT],
        }
    }

    /// Head of list `class`, if any. The validator walks lists through this.
    #[inline]
    pub fn head(&self, class: usize) -> Option<Block> {
        self.heads[class]
    }

    /// Pushes `block` to the head of the list for its size class (LIFO, no
    /// ordering within a list). The block must already carry its final size
    /// and be marked free.
    pub fn insert(&mut self, arena: &mut Arena, block: Block) {
        debug_assert!(!block.is_allocated(arena));

        let class = class_of(block.size(arena));
        let head = self.heads[class];

        block.set_prev_free(arena, None);
        block.set_next_free(arena, head);

        if let Some(head) = head {
            head.set_prev_free(arena, Some(block));
        }

        self.heads[class] = Some(block);
    }

    /// Unlinks `block` from wherever it sits in its list, whether sole
    /// member, head, tail or interior.
    pub fn remove(&mut self, arena: &mut Arena, block: Block) {
        let class = class_of(block.size(arena));
        let prev = block.prev_free(arena);
        let next = block.next_free(arena);

        match prev {
            Some(prev) => prev.set_next_free(arena, next),
            None => {
                debug_assert_eq!(self.heads[class], Some(block));
                self.heads[class] = next;
            }
        }

        if let Some(next) = next {
            next.set_prev_free(arena, prev);
        }
    }

    /// Find-fit policy: scan classes from `class_of(size)` upwards and take
    /// the first block big enough within each list, in insertion order.
    /// First-fit per class, never global best-fit; waste is confined to at
    /// most one class above the ideal while the search stays cheap.
    pub fn find_fit(&self, arena: &Arena, size: usize) -> Option<Block> {
        for class in class_of(size)..CLASS_COUNT {
            let mut cursor = self.heads[class];

            while let Some(block) = cursor {
                if block.size(arena) >= size {
                    return Some(block);
                }

                cursor = block.next_free(arena);
            }
        }

        None
    }
}
