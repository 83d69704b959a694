//! A general purpose memory allocator built on a single growable arena. The
//! heap is a linear chain of boundary-tagged blocks bracketed by two
//! permanently allocated sentinels, free blocks are threaded through an array
//! of intrusive lists segregated by size class, and a read-only validator can
//! re-derive every structural invariant on demand. Read the modules in this
//! order to understand the whole picture: [`arena`], [`block`], [`freelist`],
//! [`allocator`] and finally [`validator`].

use std::ptr::NonNull;

use thiserror::Error;

mod align;
mod allocator;
mod arena;
mod block;
mod diag;
mod freelist;
mod platform;
mod validator;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler will yell at us if we don't write code for the `None`
/// case. It doubles as the "designated empty result": zero sized allocations
/// yield `None` and deallocating `None` is a no-op.
pub type Pointer<T> = Option<NonNull<T>>;

/// Ways an allocation request can fail. These are the only failures the
/// allocator reports to callers; validator findings travel separately as
/// [`Violation`] records.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The arena declined to grow, either because the underlying mapping
    /// could not be created or because the configured limit was reached.
    #[error("arena growth declined, out of memory")]
    OutOfMemory,
    /// A size computation would wrap around `usize`.
    #[error("requested size overflows usize")]
    Overflow,
}

/// Shorter syntax for allocation/reallocation return types.
pub(crate) type AllocResult = Result<Pointer<u8>, AllocError>;

pub use allocator::{Config, Segalloc};
pub use diag::{AllocOp, DiagnosticSink, TraceEvent};
pub use validator::Violation;
