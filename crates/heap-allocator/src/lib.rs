//! Bounded, coalescing heap allocator for a bare-metal kernel.
//!
//! The kernel heap occupies a single contiguous region that begins at the
//! first page boundary after the kernel image and extends to the end of the
//! usable memory range containing it. This crate manages that region.
//!
//! # Components
//!
//! - [`HeapAllocator`]: the allocator core. Best-fit placement through a
//!   size-ordered free-block index, block splitting and eager coalescing of
//!   neighbours. It never halts; every failure is a [`HeapError`].
//! - [`memory_map`]: reads the boot loader's physical memory table and keeps
//!   the usable ranges.
//! - [`global`]: the kernel-facing hooks. [`KernelHeap`](global::KernelHeap)
//!   wraps the allocator in a spin lock, implements
//!   [`GlobalAlloc`](core::alloc::GlobalAlloc) and halts the machine with a
//!   diagnostic report on failure.
//!
//! # Memory Layout
//!
//! Each block is a header followed by its payload. Headers link to their
//! address-order neighbours; payload sizes are derived from the next
//! header's address. Requests are padded to [`WORD_SIZE`] and payloads are
//! [`WORD_SIZE`]-aligned.
//!
//! # Usage
//!
//! ```rust
//! use heap_allocator::{HeapAllocator, MemoryRange};
//!
//! #[repr(align(4096))]
//! struct Arena([u8; 16384]);
//!
//! let mut arena = Box::new(Arena([0; 16384]));
//! let start = arena.0.as_mut_ptr().expose_provenance();
//!
//! let mut heap = HeapAllocator::<64>::new();
//! unsafe { heap.initialize(start, &[MemoryRange::new(start as u64, 16384)])? };
//!
//! let ptr = heap.allocate(100)?;
//! assert!(ptr.addr().get() > start);
//! unsafe { heap.free(ptr.as_ptr())? };
//!
//! assert_eq!(heap.stats().free_block_count, 1);
//! # Ok::<(), heap_allocator::HeapError>(())
//! ```

#![feature(error_generic_member_access)]
#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

#[macro_use]
mod log;

mod block;
mod error;
pub mod global;
mod heap;
mod inspect;
pub mod memory_map;

pub use self::{
    block::{HEADER_SIZE, WORD_SIZE},
    error::{HeapError, HeapErrorKind},
    heap::{FREE_INDEX_CAPACITY, HeapAllocator, PAGE_SIZE},
    inspect::{BlockInfo, Blocks, HeapStats},
    memory_map::{MemoryMap, MemoryRange},
};
