use crate::{
    align,
    arena::Arena,
    block::{self, Block, MIN_BLOCK_SIZE, SENTINEL_OVERHEAD, TAG_OVERHEAD},
    diag::{AllocOp, DiagnosticSink, TraceEvent},
    freelist::FreeListIndex,
    validator::{self, Violation},
    AllocError, AllocResult, Pointer,
};

/// Default size of the reservation backing a new arena. Virtual address
/// space only; the kernel commits pages as they are touched.
pub(crate) const DEFAULT_ARENA_LIMIT: usize = 64 * 1024 * 1024;

/// Default increment the heap grows by when no free block fits. Requests
/// larger than this grow by exactly what they need.
pub(crate) const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Tunables for one allocator instance, consumed by
/// [`Segalloc::with_config`].
pub struct Config {
    /// Size of the arena reservation, the hard ceiling on heap growth.
    /// Rounded up to a whole number of pages.
    pub arena_limit: usize,
    /// Minimum heap extension per growth, in bytes.
    pub chunk_size: usize,
    /// Run the heap validator after every mutating operation and panic on
    /// any finding. Pure overhead when disabled; invaluable while hunting
    /// allocator bugs.
    pub debug_check: bool,
    /// Receiver for one [`TraceEvent`] per mutating operation, plus
    /// validator findings when `debug_check` is on.
    pub sink: Option<Box<dyn DiagnosticSink>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            arena_limit: DEFAULT_ARENA_LIMIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            debug_check: false,
            sink: None,
        }
    }
}

/// The allocator: a single growable arena formatted as a linear chain of
/// boundary-tagged blocks, with free blocks additionally threaded through
/// the segregated lists of a [`FreeListIndex`]. Once you've read
/// [`crate::arena`], [`crate::block`] and [`crate::freelist`], this is where
/// the circle gets completed:
///
/// ```text
///           arena
/// +-----+----------+-------+--------+-------+--------+-------+----------+
/// | pad | prologue | Block | Free   | Block | Free   | Block | epilogue |
/// +-----+----------+-------+--|-----+-------+--|-----+-------+----------+
///                      ^      |         ^      |
///                      |      |         |      |    heads, one per
///  physical chain via  |      |         |      |    size class
///  boundary tags       |   +--+---------|------+      |
///                      |   |  +---------+        <----+
///                      |   v
/// +-------+    +-------+---+---+
/// | Block | -> | Free list view|   two independent views of
/// +-------+    +---------------+   the same memory
/// ```
///
/// Allocation searches the index (lowest fitting class first, first-fit
/// within a class), splits when the leftover is worth keeping, and grows the
/// arena when nothing fits. Freeing coalesces with both physical neighbours
/// before reinserting. Every operation runs to completion on the caller's
/// thread; wrap the instance in a lock if you need to share it.
///
/// Distinct instances are fully independent, each with its own arena, so
/// tests can create as many as they like without interference.
pub struct Segalloc {
    pub(crate) arena: Arena,
    pub(crate) index: FreeListIndex,
    chunk_size: usize,
    debug_check: bool,
    sink: Option<Box<dyn DiagnosticSink>>,
}

/// Total block size needed to serve a `size` byte request: payload plus both
/// tags, word aligned, floored at the minimum block size. `None` when the
/// computation wraps, which no arena could ever satisfy anyway.
fn required_block_size(size: usize) -> Option<usize> {
    let total = size.checked_add(TAG_OVERHEAD + align::WORD - 1)?;
    Some((total & !(align::WORD - 1)).max(MIN_BLOCK_SIZE))
}

impl Segalloc {
    /// Builds an allocator with the default configuration.
    pub fn new() -> Result<Self, AllocError> {
        Self::with_config(Config::default())
    }

    /// Builds an allocator from `config`: reserves the arena, writes the
    /// prologue and epilogue sentinels that bracket the heap for the life of
    /// the instance, and formats one chunk as the initial free block.
    pub fn with_config(mut config: Config) -> Result<Self, AllocError> {
        let mut arena = Arena::init(config.arena_limit)?;
        arena.grow(SENTINEL_OVERHEAD)?;
        block::write_sentinels(&mut arena);

        let mut allocator = Self {
            arena,
            index: FreeListIndex::new(),
            chunk_size: config.chunk_size.max(MIN_BLOCK_SIZE),
            debug_check: config.debug_check,
            sink: config.sink.take(),
        };

        allocator.extend(allocator.chunk_size)?;
        allocator.emit(AllocOp::Init, 0, allocator.arena.high_water(), false);
        allocator.check_after_mutation();

        Ok(allocator)
    }

    /// Allocates a block whose payload can hold `size` bytes and returns its
    /// address, stable until the matching [`Segalloc::deallocate`]. A zero
    /// `size` deterministically returns `None` and mutates nothing.
    ///
    /// When no free block fits, the arena grows by the larger of the request
    /// and the configured chunk and placement is retried once; a declined
    /// growth reports [`AllocError::OutOfMemory`] with the heap untouched.
    pub fn allocate(&mut self, size: usize) -> AllocResult {
        if size == 0 {
            return Ok(None);
        }

        let Some(asize) = required_block_size(size) else {
            return Err(AllocError::OutOfMemory);
        };

        let block = match self.index.find_fit(&self.arena, asize) {
            Some(block) => block,
            None => self.extend(asize.max(self.chunk_size))?,
        };

        self.place(block, asize);
        self.emit(AllocOp::Allocate, block.0, block.size(&self.arena), true);
        self.check_after_mutation();

        Ok(Some(self.arena.pointer_to(block.0)))
    }

    /// Releases the block behind `ptr`, coalescing it with whichever
    /// physical neighbours are free before filing it under its final size
    /// class. `None` is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this instance and not deallocated
    /// since; the caller must no longer read or write through it.
    pub unsafe fn deallocate(&mut self, ptr: Pointer<u8>) {
        let Some(address) = ptr else { return };

        let block = Block(self.arena.offset_of(address));
        let size = block.size(&self.arena);
        block.set(&mut self.arena, size, false);

        let block = self.coalesce(block);
        self.index.insert(&mut self.arena, block);

        self.emit(AllocOp::Deallocate, block.0, block.size(&self.arena), false);
        self.check_after_mutation();
    }

    /// Moves the allocation behind `ptr` to a block that can hold `size`
    /// bytes, preserving the first `min(old payload, size)` bytes. `None`
    /// behaves like [`Segalloc::allocate`] and a zero `size` like
    /// [`Segalloc::deallocate`] (returning `None`). No in-place growth is
    /// attempted; correctness never depends on it.
    ///
    /// # Safety
    ///
    /// Same contract as [`Segalloc::deallocate`]: on success the old
    /// address is gone.
    pub unsafe fn resize(&mut self, ptr: Pointer<u8>, size: usize) -> AllocResult {
        let Some(address) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            unsafe { self.deallocate(ptr) };
            return Ok(None);
        }

        let old_block = Block(self.arena.offset_of(address));
        let old_payload = old_block.payload_size(&self.arena);

        let new_address = match self.allocate(size)? {
            Some(address) => address,
            // A non-zero request either fails or returns an address.
            None => unreachable!(),
        };

        let new_block = Block(self.arena.offset_of(new_address));
        self.arena
            .copy(old_block.0, new_block.0, old_payload.min(size));

        unsafe { self.deallocate(ptr) };

        self.emit(AllocOp::Resize, new_block.0, new_block.size(&self.arena), true);

        Ok(Some(new_address))
    }

    /// Allocates room for `count` elements of `size` bytes and zero-fills
    /// exactly `count * size` bytes. A wrapping product reports
    /// [`AllocError::Overflow`] instead of allocating garbage.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> AllocResult {
        let total = count.checked_mul(size).ok_or(AllocError::Overflow)?;

        let ptr = self.allocate(total)?;

        if let Some(address) = ptr {
            let offset = self.arena.offset_of(address);
            self.arena.fill_zero(offset, total);
            self.emit(AllocOp::ZeroAllocate, offset, total, true);
        }

        Ok(ptr)
    }

    /// Runs the heap validator and returns every violation it found, empty
    /// when the heap is consistent. Read-only; never fixes anything.
    pub fn check_heap(&self) -> Vec<Violation> {
        validator::check(&self.arena, &self.index)
    }

    /// Grows the heap by at least `bytes`, formats the new region as one
    /// free block and files it. The old epilogue header becomes the new
    /// block's header and a fresh epilogue is written at the new end, so the
    /// sentinels keep bracketing the heap across every growth.
    fn extend(&mut self, bytes: usize) -> Result<Block, AllocError> {
        let bytes = align::align_up(bytes.max(MIN_BLOCK_SIZE));
        let offset = self.arena.grow(bytes)?;

        let block = Block(offset);
        block.set(&mut self.arena, bytes, false);
        block::write_epilogue(&mut self.arena);

        self.index.insert(&mut self.arena, block);
        self.emit(AllocOp::Extend, offset, bytes, false);

        Ok(block)
    }

    /// Turns the free `block` into an allocated block of `asize` bytes,
    /// splitting off the remainder as a new free block when it is big enough
    /// to ever be allocated; otherwise the whole block is used and the slack
    /// becomes internal fragmentation.
    fn place(&mut self, block: Block, asize: usize) {
        let total = block.size(&self.arena);
        self.index.remove(&mut self.arena, block);

        if total - asize >= MIN_BLOCK_SIZE {
            block.set(&mut self.arena, asize, true);
            let remainder = block.next_physical(&self.arena);
            remainder.set(&mut self.arena, total - asize, false);
            self.index.insert(&mut self.arena, remainder);
        } else {
            block.set(&mut self.arena, total, true);
        }
    }

    /// Merges `block` with whichever physical neighbours are free and
    /// returns the handle of the merged span, which is the predecessor's
    /// when it took part. Neighbours leave their lists *before* any size
    /// changes, so class bookkeeping always works on real sizes. The caller
    /// reinserts the result.
    fn coalesce(&mut self, block: Block) -> Block {
        let prev = block.prev_physical(&self.arena);
        let next = block.next_physical(&self.arena);

        let mut start = block;
        let mut size = block.size(&self.arena);

        if !next.is_allocated(&self.arena) {
            self.index.remove(&mut self.arena, next);
            size += next.size(&self.arena);
        }

        if !prev.is_allocated(&self.arena) {
            self.index.remove(&mut self.arena, prev);
            size += prev.size(&self.arena);
            start = prev;
        }

        // Any merge grew the span; one tag pair rewrite covers it.
        if size != block.size(&self.arena) {
            start.set(&mut self.arena, size, false);
        }

        start
    }

    fn emit(&mut self, op: AllocOp, offset: usize, size: usize, allocated: bool) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.record(TraceEvent {
                op,
                offset,
                size,
                allocated,
            });
        }
    }

    /// Post-condition hook of the diagnostic configuration: validate the
    /// whole heap, report findings through the sink, and die loudly rather
    /// than let corruption propagate.
    fn check_after_mutation(&mut self) {
        if !self.debug_check {
            return;
        }

        let violations = self.check_heap();
        if violations.is_empty() {
            return;
        }

        if let Some(sink) = self.sink.as_deref_mut() {
            for violation in &violations {
                sink.violation(violation);
            }
        }

        panic!("heap corrupted: {violations:?}");
    }
}
