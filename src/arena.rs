use std::ptr::NonNull;

use crate::{
    align::{self, WORD},
    platform, AllocError,
};

/// The one contiguous memory region the allocator manages. The entire
/// reservation is mapped once at creation, but only the prefix below
/// `high_water` is formatted as heap blocks; growing the heap just advances
/// the mark, so every address ever handed out stays valid and in place for
/// the life of the arena.
///
/// This is also the only module that touches raw memory. Everything above it
/// manipulates *offsets* from the arena base, and the accessors here bounds
/// check each one, so the rest of the allocator is ordinary safe code. The
/// unsafe blocks below are the audited core: they rely on `base` pointing to
/// a live mapping of `limit` bytes, which [`Arena::init`] established and
/// nothing ever changes.
pub(crate) struct Arena {
    /// Start of the mapping. Offset 0 addresses this byte.
    base: NonNull<u8>,
    /// Bytes currently formatted as heap blocks. Grows, never shrinks.
    high_water: usize,
    /// Size of the reservation. `grow` fails beyond this.
    limit: usize,
}

impl Arena {
    /// Reserves a mapping of at least `limit` bytes (rounded up to the page
    /// size) with an empty heap. Fails with [`AllocError::OutOfMemory`] if
    /// the underlying request is declined.
    pub fn init(limit: usize) -> Result<Self, AllocError> {
        let page = platform::page_size();
        let limit = page * limit.div_ceil(page).max(1);

        let Some(base) = (unsafe { platform::request_memory(limit) }) else {
            return Err(AllocError::OutOfMemory);
        };

        Ok(Self {
            base,
            high_water: 0,
            limit,
        })
    }

    /// Extends the formatted heap by `extra` bytes and returns the offset of
    /// the newly available region, which starts exactly where the previous
    /// region ended. The caller is responsible for formatting it.
    pub fn grow(&mut self, extra: usize) -> Result<usize, AllocError> {
        debug_assert!(align::is_aligned(extra));

        let Some(grown) = self.high_water.checked_add(extra) else {
            return Err(AllocError::OutOfMemory);
        };

        if grown > self.limit {
            return Err(AllocError::OutOfMemory);
        }

        let offset = self.high_water;
        self.high_water = grown;

        Ok(offset)
    }

    /// Current end of the formatted heap. Every block lies in
    /// `[0, high_water)`.
    #[inline]
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Size of the reservation backing this arena.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Reads the word stored at `offset`.
    #[inline]
    pub fn word(&self, offset: usize) -> usize {
        assert!(align::is_aligned(offset) && offset + WORD <= self.high_water);

        unsafe { self.base.as_ptr().add(offset).cast::<usize>().read() }
    }

    /// Writes `value` to the word at `offset`.
    #[inline]
    pub fn set_word(&mut self, offset: usize, value: usize) {
        assert!(align::is_aligned(offset) && offset + WORD <= self.high_water);

        unsafe { self.base.as_ptr().add(offset).cast::<usize>().write(value) }
    }

    /// Zeroes `length` bytes starting at `offset`.
    pub fn fill_zero(&mut self, offset: usize, length: usize) {
        assert!(offset + length <= self.high_water);

        unsafe { self.base.as_ptr().add(offset).write_bytes(0, length) }
    }

    /// Copies `length` bytes from `src` to `dst`. The two ranges must not
    /// overlap; the allocator only uses this to move payloads between
    /// distinct blocks.
    pub fn copy(&mut self, src: usize, dst: usize, length: usize) {
        assert!(src + length <= self.high_water && dst + length <= self.high_water);
        debug_assert!(src + length <= dst || dst + length <= src);

        unsafe {
            let base = self.base.as_ptr();
            base.add(dst).copy_from_nonoverlapping(base.add(src), length);
        }
    }

    /// Materializes the address of `offset` for handing out to the caller.
    #[inline]
    pub fn pointer_to(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.high_water);

        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    /// Recovers the offset a previously returned address refers to. Panics
    /// if the address was never ours, which turns the worst misuse into a
    /// loud failure instead of silent corruption.
    #[inline]
    pub fn offset_of(&self, address: NonNull<u8>) -> usize {
        let offset = (address.as_ptr() as usize).wrapping_sub(self.base.as_ptr() as usize);
        assert!(align::is_aligned(offset) && offset < self.high_water);

        offset
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { platform::return_memory(self.base, self.limit) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::page_size;

    #[test]
    fn limit_rounds_to_pages() {
        let arena = Arena::init(1).unwrap();
        assert_eq!(arena.limit(), page_size());
        assert_eq!(arena.high_water(), 0);

        let arena = Arena::init(page_size() + 1).unwrap();
        assert_eq!(arena.limit(), page_size() * 2);
    }

    #[test]
    fn grow_appends_until_limit() {
        let mut arena = Arena::init(page_size()).unwrap();

        assert_eq!(arena.grow(WORD * 4), Ok(0));
        assert_eq!(arena.high_water(), WORD * 4);

        assert_eq!(arena.grow(WORD * 2), Ok(WORD * 4));
        assert_eq!(arena.high_water(), WORD * 6);

        // Exhaust the reservation, then one more word must fail.
        let remaining = arena.limit() - arena.high_water();
        assert!(arena.grow(remaining).is_ok());
        assert_eq!(arena.grow(WORD), Err(AllocError::OutOfMemory));
        assert_eq!(arena.high_water(), arena.limit());
    }

    #[test]
    fn words_round_trip() {
        let mut arena = Arena::init(page_size()).unwrap();
        arena.grow(WORD * 8).unwrap();

        arena.set_word(0, 69);
        arena.set_word(WORD * 7, usize::MAX);

        assert_eq!(arena.word(0), 69);
        assert_eq!(arena.word(WORD * 7), usize::MAX);
    }

    #[test]
    fn addresses_translate_both_ways() {
        let mut arena = Arena::init(page_size()).unwrap();
        arena.grow(WORD * 8).unwrap();

        let address = arena.pointer_to(WORD * 3);
        assert_eq!(arena.offset_of(address), WORD * 3);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_read_is_rejected() {
        let mut arena = Arena::init(page_size()).unwrap();
        arena.grow(WORD * 2).unwrap();

        arena.word(WORD * 2);
    }
}
