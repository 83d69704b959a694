use std::{ptr::NonNull, sync::atomic::{AtomicUsize, Ordering}};

use crate::Pointer;

/// Abstraction for platform specific memory handling. The arena only needs
/// one contiguous reservation for its whole lifetime and returns it in one
/// piece when it is torn down, so the surface is deliberately tiny: request,
/// return, page size.
trait PlatformSpecificMemory {
    /// Requests a memory region from the kernel where `length` bytes can be
    /// written safely. `length` must be a multiple of the page size.
    unsafe fn request_memory(length: usize) -> Pointer<u8>;

    /// Returns `length` bytes starting from `address` to the underlying
    /// kernel. `address` must have been obtained from
    /// [`Self::request_memory`] with the same `length`.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    unsafe fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
pub(crate) struct Platform;

/// Virtual memory page size, 4096 bytes on most computers. We only know the
/// value at runtime, so the first call caches it here and every call after
/// that is a relaxed load.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

#[inline]
pub(crate) fn page_size() -> usize {
    let mut cached = PAGE_SIZE.load(Ordering::Relaxed);

    if cached == 0 {
        cached = unsafe { Platform::page_size() };
        PAGE_SIZE.store(cached, Ordering::Relaxed);
    }

    cached
}

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Pointer<u8> {
    unsafe { Platform::request_memory(length) }
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    unsafe { Platform::return_memory(address, length) }
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any
            // file. The kernel commits pages lazily, so reserving a large
            // arena up front costs virtual address space only.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            let address =
                unsafe { libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) };

            if address == libc::MAP_FAILED {
                None
            } else {
                Some(unsafe { NonNull::new_unchecked(address) }.cast())
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            // On failure the mapping stays alive until the process exits;
            // there is nothing sensible to do about it here.
            unsafe { libc::munmap(address.cast().as_ptr(), length) };
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(miri)]
mod miri {
    //! When using Miri, we can't rely on system calls such as `mmap` because
    //! there's no FFI support, so instead we'll use the global allocator to
    //! mock low level memory management. This is also useful for detecting
    //! leaks of the arena mapping itself.

    use std::{alloc, ptr::NonNull};

    use super::{page_size, Platform, PlatformSpecificMemory};
    use crate::Pointer;

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, page_size()).unwrap()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Pointer<u8> {
            NonNull::new(unsafe { alloc::alloc(to_layout(length)) })
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            unsafe { alloc::dealloc(address.as_ptr(), to_layout(length)) };
        }

        unsafe fn page_size() -> usize {
            4096
        }
    }
}
