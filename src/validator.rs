use thiserror::Error;

use crate::{
    align::{self, WORD},
    arena::Arena,
    block::{self, Block, FIRST_BLOCK, MIN_BLOCK_SIZE, PROLOGUE, TAG_OVERHEAD},
    freelist::{class_of, FreeListIndex, CLASS_COUNT},
};

/// One structural invariant found broken. Everything the checker reports is
/// re-derived from the raw heap, never from the allocator's own bookkeeping,
/// so a bug in either shows up as a disagreement here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("prologue sentinel corrupted (size {size}, allocated {allocated})")]
    BadPrologue { size: usize, allocated: bool },

    #[error("epilogue sentinel corrupted at offset {offset} (size {size}, allocated {allocated})")]
    BadEpilogue {
        offset: usize,
        size: usize,
        allocated: bool,
    },

    #[error("block at offset {block} has unwalkable size {size}")]
    BadSize { block: usize, size: usize },

    #[error("block at offset {block} extends past the heap end {high_water}")]
    OutOfBounds { block: usize, high_water: usize },

    #[error("block at offset {block} is not word aligned")]
    Misaligned { block: usize },

    #[error("block at offset {block}: header {header:#x} and footer {footer:#x} disagree")]
    TagMismatch {
        block: usize,
        header: usize,
        footer: usize,
    },

    #[error("adjacent free blocks at offsets {block} and {next} were never coalesced")]
    Uncoalesced { block: usize, next: usize },

    #[error("free list {class}: block at offset {block} is marked allocated")]
    AllocatedInFreeList { class: usize, block: usize },

    #[error("free list {class}: link of block at offset {block} does not reciprocate")]
    BrokenLink { class: usize, block: usize },

    #[error("free list {class}: block at offset {block} of size {size} belongs in class {expected}")]
    WrongClass {
        class: usize,
        block: usize,
        size: usize,
        expected: usize,
    },

    #[error("free list {class} does not terminate, cycle suspected")]
    Cycle { class: usize },

    #[error("free block counts disagree: {chain} via physical chain, {lists} via free lists")]
    CountMismatch { chain: usize, lists: usize },
}

/// Walks the whole heap twice, once along the physical block chain and once
/// through every free list, re-deriving each invariant from the boundary
/// tags and links themselves. Returns every violation found; an empty vector
/// means the heap is consistent. Reads everything, mutates nothing.
pub(crate) fn check(arena: &Arena, index: &FreeListIndex) -> Vec<Violation> {
    let mut violations = Vec::new();

    check_sentinels(arena, &mut violations);
    let chain = check_chain(arena, &mut violations);
    let lists = check_lists(arena, index, &mut violations);

    // A block missing from its list or filed twice shows up here even when
    // every individual node looked fine.
    if chain != lists {
        violations.push(Violation::CountMismatch { chain, lists });
    }

    violations
}

/// The two permanent sentinels must still be allocated, correctly sized and
/// where they were created; every neighbour lookup in the allocator leans on
/// them.
fn check_sentinels(arena: &Arena, violations: &mut Vec<Violation>) {
    let size = PROLOGUE.size(arena);
    let allocated = PROLOGUE.is_allocated(arena);
    if size != TAG_OVERHEAD || !allocated {
        violations.push(Violation::BadPrologue { size, allocated });
    } else if arena.word(PROLOGUE.0 - WORD) != arena.word(PROLOGUE.0) {
        // Zero payload, so the footer sits right at the content offset.
        violations.push(Violation::TagMismatch {
            block: PROLOGUE.0,
            header: arena.word(PROLOGUE.0 - WORD),
            footer: arena.word(PROLOGUE.0),
        });
    }

    let end = block::epilogue(arena);
    let size = end.size(arena);
    let allocated = end.is_allocated(arena);
    if size != 0 || !allocated {
        violations.push(Violation::BadEpilogue {
            offset: end.0,
            size,
            allocated,
        });
    }
}

/// Linear walk from the first real block to the epilogue, driven purely by
/// the sizes stored in headers. Returns the number of free blocks seen.
/// Stops early when a size is garbage, since every further step would be
/// derived from it.
fn check_chain(arena: &Arena, violations: &mut Vec<Violation>) -> usize {
    let high_water = arena.high_water();
    let mut free_count = 0;
    let mut previous_free: Option<usize> = None;
    let mut block = FIRST_BLOCK;

    while block.0 < high_water {
        if !align::is_aligned(block.0) {
            violations.push(Violation::Misaligned { block: block.0 });
            break;
        }

        let size = block.size(arena);
        if size < MIN_BLOCK_SIZE || !align::is_aligned(size) {
            violations.push(Violation::BadSize {
                block: block.0,
                size,
            });
            break;
        }

        match block.0.checked_add(size) {
            Some(end) if end <= high_water => {}
            _ => {
                violations.push(Violation::OutOfBounds {
                    block: block.0,
                    high_water,
                });
                break;
            }
        }

        let header = arena.word(block.0 - WORD);
        let footer = arena.word(block.0 + size - TAG_OVERHEAD);
        if header != footer {
            violations.push(Violation::TagMismatch {
                block: block.0,
                header,
                footer,
            });
        }

        if block.is_allocated(arena) {
            previous_free = None;
        } else {
            if let Some(previous) = previous_free {
                violations.push(Violation::Uncoalesced {
                    block: previous,
                    next: block.0,
                });
            }
            previous_free = Some(block.0);
            free_count += 1;
        }

        block = Block(block.0 + size);
    }

    free_count
}

/// Walks every free list node by node, validating each against the raw heap
/// before trusting its links. Returns the total number of entries seen
/// across all lists.
fn check_lists(arena: &Arena, index: &FreeListIndex, violations: &mut Vec<Violation>) -> usize {
    let high_water = arena.high_water();
    // No heap can hold more free blocks than this; a longer walk means the
    // links loop.
    let max_nodes = high_water / MIN_BLOCK_SIZE + 1;
    let mut total = 0;

    for class in 0..CLASS_COUNT {
        let mut steps = 0;
        let mut previous: Option<Block> = None;
        let mut cursor = index.head(class);

        while let Some(node) = cursor {
            steps += 1;
            if steps > max_nodes {
                violations.push(Violation::Cycle { class });
                break;
            }

            // Bounds and alignment first; nothing below is safe to read
            // until the handle itself checks out.
            if !align::is_aligned(node.0) {
                violations.push(Violation::Misaligned { block: node.0 });
                break;
            }
            if node.0 < FIRST_BLOCK.0 || node.0 + TAG_OVERHEAD > high_water {
                violations.push(Violation::OutOfBounds {
                    block: node.0,
                    high_water,
                });
                break;
            }

            if node.is_allocated(arena) {
                violations.push(Violation::AllocatedInFreeList {
                    class,
                    block: node.0,
                });
                break;
            }

            let size = node.size(arena);
            if size < MIN_BLOCK_SIZE || !align::is_aligned(size) {
                violations.push(Violation::BadSize {
                    block: node.0,
                    size,
                });
                break;
            }

            let expected = class_of(size);
            if expected != class {
                violations.push(Violation::WrongClass {
                    class,
                    block: node.0,
                    size,
                    expected,
                });
            }

            // B's prev must point back at A exactly when A's next points at
            // B; the head's prev must be nil.
            if node.prev_free(arena) != previous {
                violations.push(Violation::BrokenLink {
                    class,
                    block: node.0,
                });
                break;
            }

            total += 1;
            previous = Some(node);
            cursor = node.next_free(arena);
        }
    }

    total
}
