use crate::{align::WORD, arena::Arena};

/// Header and footer overhead of every block, one word each.
pub(crate) const TAG_OVERHEAD: usize = 2 * WORD;

/// Minimum block size in bytes: header, the two intrusive links a free block
/// needs, and footer. Nothing smaller can ever be split off.
pub(crate) const MIN_BLOCK_SIZE: usize = 4 * WORD;

/// Low bit of a boundary tag. Sizes are word multiples, so it is always free.
const ALLOCATED_BIT: usize = 1;

/// Mask selecting the size part of a boundary tag.
const SIZE_MASK: usize = !(WORD - 1);

/// Handle to one heap cell: the offset of its *content* from the arena base.
/// This is the central entity of the allocator, and its in-memory shape is:
///
/// ```text
///                 +----------------------------+
///  offset - WORD  | header: size | alloc bit   |
///                 +----------------------------+
///  offset         | prev free link \           |  <- content starts here;
///                 +-----------------> only     |     the caller's payload
///  offset + WORD  | next free link / while free|     when allocated
///                 +----------------------------+
///                 |            ...             |
///                 +----------------------------+
///  offset + size  | footer: size | alloc bit   |
///   - TAG_OVERHEAD+----------------------------+
/// ```
///
/// `size` counts the entire block, header and footer included, and is stored
/// identically in both tags. The duplicated footer is what makes
/// [`Block::prev_physical`] O(1): the word right before our header is the
/// previous block's footer. The two link words only mean anything while the
/// block is free and sitting in exactly one free list; reading them on an
/// allocated block would hand back caller data, so nothing here does.
///
/// Handles are plain integers and every accessor goes through the bounds
/// checked word primitives of [`Arena`], which keeps this whole layer and
/// everything above it safe code.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Block(pub usize);

/// Offset of the prologue sentinel: one padding word, then its header. The
/// padding word keeps offset 0 unused so it can serve as the nil link, same
/// trick as a null pointer.
pub(crate) const PROLOGUE: Block = Block(2 * WORD);

/// Offset of the first real block, right after the prologue.
pub(crate) const FIRST_BLOCK: Block = Block(2 * WORD + TAG_OVERHEAD);

/// Bytes of arena the initial sentinels occupy: padding word, prologue
/// header and footer, epilogue header.
pub(crate) const SENTINEL_OVERHEAD: usize = 4 * WORD;

impl Block {
    /// Total size of the block, boundary tags included.
    #[inline]
    pub fn size(self, arena: &Arena) -> usize {
        arena.word(self.0 - WORD) & SIZE_MASK
    }

    /// Bytes available to the caller: everything between the tags.
    #[inline]
    pub fn payload_size(self, arena: &Arena) -> usize {
        self.size(arena) - TAG_OVERHEAD
    }

    /// Whether the block is currently owned by the caller.
    #[inline]
    pub fn is_allocated(self, arena: &Arena) -> bool {
        arena.word(self.0 - WORD) & ALLOCATED_BIT != 0
    }

    /// Writes matching header and footer in one go. No code path ever
    /// updates one tag without the other, which is what keeps the boundary
    /// tag invariant trivially true outside of actual corruption.
    #[inline]
    pub fn set(self, arena: &mut Arena, size: usize, allocated: bool) {
        let tag = size | allocated as usize;
        arena.set_word(self.0 - WORD, tag);
        arena.set_word(self.0 + size - TAG_OVERHEAD, tag);
    }

    /// The block immediately after this one in the physical chain. For the
    /// last real block this is the epilogue sentinel.
    #[inline]
    pub fn next_physical(self, arena: &Arena) -> Block {
        Block(self.0 + self.size(arena))
    }

    /// The block immediately before this one, derived from its footer. Only
    /// valid when a predecessor exists, which the prologue sentinel
    /// guarantees for every real block.
    #[inline]
    pub fn prev_physical(self, arena: &Arena) -> Block {
        Block(self.0 - (arena.word(self.0 - TAG_OVERHEAD) & SIZE_MASK))
    }

    /// Previous neighbour in the free list this block belongs to. Only
    /// meaningful while the block is free.
    #[inline]
    pub fn prev_free(self, arena: &Arena) -> Option<Block> {
        match arena.word(self.0) {
            0 => None,
            offset => Some(Block(offset)),
        }
    }

    /// Next neighbour in the free list this block belongs to. Only
    /// meaningful while the block is free.
    #[inline]
    pub fn next_free(self, arena: &Arena) -> Option<Block> {
        match arena.word(self.0 + WORD) {
            0 => None,
            offset => Some(Block(offset)),
        }
    }

    pub fn set_prev_free(self, arena: &mut Arena, prev: Option<Block>) {
        arena.set_word(self.0, prev.map_or(0, |block| block.0));
    }

    pub fn set_next_free(self, arena: &mut Arena, next: Option<Block>) {
        arena.set_word(self.0 + WORD, next.map_or(0, |block| block.0));
    }
}

/// Handle to the epilogue sentinel: the zero sized allocated "block" whose
/// lone header is the last word of the formatted heap.
#[inline]
pub(crate) fn epilogue(arena: &Arena) -> Block {
    Block(arena.high_water())
}

/// (Re)writes the epilogue header at the current end of the heap. Called
/// once at initialization and again after every arena growth, which is what
/// "relocates" the sentinel to the new end.
pub(crate) fn write_epilogue(arena: &mut Arena) {
    let offset = arena.high_water() - WORD;
    arena.set_word(offset, ALLOCATED_BIT);
}

/// Writes the initial sentinel structure: padding word, zero payload
/// prologue, epilogue header. The arena must have exactly
/// [`SENTINEL_OVERHEAD`] bytes formatted.
pub(crate) fn write_sentinels(arena: &mut Arena) {
    debug_assert_eq!(arena.high_water(), SENTINEL_OVERHEAD);

    arena.set_word(0, 0);
    PROLOGUE.set(arena, TAG_OVERHEAD, true);
    write_epilogue(arena);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-formats a heap with sentinels plus blocks of the given sizes and
    /// allocation states, in physical order.
    fn build_heap(blocks: &[(usize, bool)]) -> (Arena, Vec<Block>) {
        let mut arena = Arena::init(1 << 16).unwrap();
        arena.grow(SENTINEL_OVERHEAD).unwrap();
        write_sentinels(&mut arena);

        let mut handles = Vec::new();
        let mut offset = FIRST_BLOCK.0;

        for &(size, allocated) in blocks {
            arena.grow(size).unwrap();
            let block = Block(offset);
            block.set(&mut arena, size, allocated);
            handles.push(block);
            offset += size;
        }

        write_epilogue(&mut arena);

        (arena, handles)
    }

    #[test]
    fn tags_encode_size_and_state() {
        let (mut arena, handles) = build_heap(&[(64, true), (32, false)]);

        assert_eq!(handles[0].size(&arena), 64);
        assert_eq!(handles[0].payload_size(&arena), 64 - TAG_OVERHEAD);
        assert!(handles[0].is_allocated(&arena));
        assert!(!handles[1].is_allocated(&arena));

        handles[0].set(&mut arena, 64, false);
        assert!(!handles[0].is_allocated(&arena));
        assert_eq!(handles[0].size(&arena), 64);
    }

    #[test]
    fn physical_chain_is_derivable_from_tags() {
        let (arena, handles) = build_heap(&[(64, true), (32, false), (48, true)]);

        assert_eq!(PROLOGUE.next_physical(&arena), handles[0]);
        assert_eq!(handles[0].next_physical(&arena), handles[1]);
        assert_eq!(handles[1].next_physical(&arena), handles[2]);
        assert_eq!(handles[2].next_physical(&arena), epilogue(&arena));

        assert_eq!(handles[2].prev_physical(&arena), handles[1]);
        assert_eq!(handles[1].prev_physical(&arena), handles[0]);
        assert_eq!(handles[0].prev_physical(&arena), PROLOGUE);
    }

    #[test]
    fn sentinels_bracket_the_heap() {
        let (arena, _) = build_heap(&[(64, false)]);

        assert!(PROLOGUE.is_allocated(&arena));
        assert_eq!(PROLOGUE.size(&arena), TAG_OVERHEAD);

        let end = epilogue(&arena);
        assert!(end.is_allocated(&arena));
        assert_eq!(end.size(&arena), 0);
    }

    #[test]
    fn links_store_and_clear() {
        let (mut arena, handles) = build_heap(&[(64, false), (32, false)]);
        let (a, b) = (handles[0], handles[1]);

        a.set_next_free(&mut arena, Some(b));
        b.set_prev_free(&mut arena, Some(a));
        a.set_prev_free(&mut arena, None);
        b.set_next_free(&mut arena, None);

        assert_eq!(a.next_free(&arena), Some(b));
        assert_eq!(b.prev_free(&arena), Some(a));
        assert_eq!(a.prev_free(&arena), None);
        assert_eq!(b.next_free(&arena), None);
    }
}
