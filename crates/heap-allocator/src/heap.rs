//! Bounded best-fit heap allocator.
//!
//! The heap is one contiguous region carved into blocks that form an
//! address-ordered, doubly linked chain.
//! Free blocks are additionally tracked in a size-ordered [`SortedIndex`] so
//! that the smallest block able to hold a request is found by binary search.
//!
//! # Algorithm
//!
//! - **Allocation**: Pads the request to [`WORD_SIZE`], takes the first free
//!   block whose size is at least the padded size, and splits off the tail as
//!   a new free block when more than [`HEADER_SIZE`] bytes would remain
//! - **Deallocation**: Marks the block free, merges it with a free successor
//!   and then with a free predecessor, and registers the result in the index
//! - **Coalescing**: Eager. No two adjacent blocks are ever both free
//!
//! # Limits
//!
//! The free-block index has a fixed capacity (`CAP`, [`FREE_INDEX_CAPACITY`]
//! by default). It bounds the number of non-adjacent free fragments, not the
//! amount of free memory. A `free` that would need one more slot than the
//! index has fails with [`HeapErrorKind::CapacityExceeded`] and leaves the
//! heap untouched.
//!
//! [`HeapErrorKind::CapacityExceeded`]: crate::HeapErrorKind::CapacityExceeded

use core::{ops::Range, ptr::{self, NonNull}};

use snafu::{OptionExt as _, ResultExt as _, ensure};
use sorted_index::SortedIndex;

use crate::{
    block::{Block, HEADER_SIZE, WORD_SIZE},
    error::{
        AlreadyInitializedSnafu, CapacityExceededSnafu, DoubleFreeSnafu, ForeignPointerSnafu,
        HeapError, HeapTooSmallSnafu, InternalInconsistencySnafu, NoUsableRegionSnafu,
        OutOfMemorySnafu, UninitializedSnafu, ZeroSizeAllocationSnafu,
    },
    memory_map::MemoryRange,
};

/// Page size used to align the heap base.
pub const PAGE_SIZE: usize = 4096;

/// Default capacity of the free-block index.
pub const FREE_INDEX_CAPACITY: usize = 2048;

/// Bounds and chain ends of an initialized heap.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeapRegion {
    pub(crate) base: usize,
    pub(crate) end: usize,
    pub(crate) head: Block,
    pub(crate) tail: Block,
}

impl HeapRegion {
    /// Returns `true` if `addr` could be the payload of one of our blocks.
    fn owns_payload(&self, addr: usize) -> bool {
        addr >= self.base + HEADER_SIZE && addr < self.end && addr.is_multiple_of(WORD_SIZE)
    }
}

/// Key used to order the free-block index.
pub(crate) fn size_key(heap_end: usize) -> impl Fn(&Block) -> usize + Copy {
    move |block| block.size(heap_end)
}

/// A heap allocator managing one contiguous memory region.
///
/// The allocator is created empty and must be handed its memory with
/// [`initialize`](Self::initialize) before use. Calls made before that fail
/// with [`HeapErrorKind::Uninitialized`](crate::HeapErrorKind::Uninitialized).
///
/// # Thread Safety
///
/// This allocator is `Send` but not `Sync`. It performs no locking; wrap it
/// (as [`KernelHeap`](crate::global::KernelHeap) does) for shared access.
pub struct HeapAllocator<const CAP: usize = FREE_INDEX_CAPACITY> {
    pub(crate) region: Option<HeapRegion>,
    pub(crate) free_blocks: SortedIndex<Block, CAP>,
}

unsafe impl<const CAP: usize> Send for HeapAllocator<CAP> {}

impl<const CAP: usize> Default for HeapAllocator<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> HeapAllocator<CAP> {
    /// Creates an uninitialized allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            region: None,
            free_blocks: SortedIndex::new(),
        }
    }

    /// Returns `true` once [`initialize`](Self::initialize) has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.region.is_some()
    }

    /// Returns the managed address range, if initialized.
    #[must_use]
    pub fn heap_range(&self) -> Option<Range<usize>> {
        self.region.map(|region| region.base..region.end)
    }

    /// Takes ownership of the heap memory.
    ///
    /// The heap starts at the first page boundary at or above `kernel_end`
    /// and extends to the end of the usable range that contains it. The
    /// whole extent becomes a single free block.
    ///
    /// # Errors
    ///
    /// - [`AlreadyInitialized`](HeapError::AlreadyInitialized) on a second call
    /// - [`NoUsableRegion`](HeapError::NoUsableRegion) if no range contains the
    ///   heap base
    /// - [`HeapTooSmall`](HeapError::HeapTooSmall) if that range cannot hold a
    ///   header and one word of payload
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `usable_ranges` describes memory that is valid and writable
    /// - The heap extent is not used by any other code, and stays valid for
    ///   the lifetime of this allocator
    pub unsafe fn initialize(
        &mut self,
        kernel_end: usize,
        usable_ranges: &[MemoryRange],
    ) -> Result<(), HeapError> {
        ensure!(self.region.is_none(), AlreadyInitializedSnafu);

        let heap_base = kernel_end
            .checked_next_multiple_of(PAGE_SIZE)
            .context(NoUsableRegionSnafu {
                heap_base: kernel_end,
            })?;
        let heap_end = usable_ranges
            .iter()
            .map(MemoryRange::addr_range)
            .find(|range| range.contains(&heap_base))
            .context(NoUsableRegionSnafu { heap_base })?
            .end;
        ensure!(
            heap_end - heap_base >= HEADER_SIZE + WORD_SIZE,
            HeapTooSmallSnafu {
                heap_base,
                heap_end
            }
        );
        let base_ptr = NonNull::new(ptr::with_exposed_provenance_mut::<u8>(heap_base))
            .context(NoUsableRegionSnafu { heap_base })?;

        let head = unsafe { Block::write(base_ptr, None, None) };
        self.free_blocks
            .insert_sorted(head, size_key(heap_end))
            .context(CapacityExceededSnafu)?;
        self.region = Some(HeapRegion {
            base: heap_base,
            end: heap_end,
            head,
            tail: head,
        });
        Ok(())
    }

    /// Allocates at least `size` bytes and returns the payload pointer.
    ///
    /// The returned pointer is aligned to [`WORD_SIZE`] and valid for
    /// `size` rounded up to a multiple of [`WORD_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// - [`Uninitialized`](HeapError::Uninitialized) before `initialize`
    /// - [`ZeroSizeAllocation`](HeapError::ZeroSizeAllocation) if `size == 0`
    /// - [`OutOfMemory`](HeapError::OutOfMemory) if no free block is large
    ///   enough
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        let Self {
            region,
            free_blocks,
        } = self;
        let region = region.as_mut().context(UninitializedSnafu)?;
        ensure!(size > 0, ZeroSizeAllocationSnafu);

        let padded_size = size
            .checked_next_multiple_of(WORD_SIZE)
            .context(OutOfMemorySnafu { size })?;
        let key = size_key(region.end);
        let index = free_blocks.find_first_at_least(&padded_size, key);
        ensure!(index < free_blocks.len(), OutOfMemorySnafu { size });

        let block = free_blocks.remove(index);
        block.set_in_use(true);

        if block.size(region.end) - padded_size > HEADER_SIZE {
            let remainder = unsafe { block.split_at(padded_size) };
            if remainder.next().is_none() {
                region.tail = remainder;
            }
            // a slot was freed by the removal above, so this cannot fail
            free_blocks
                .insert_sorted(remainder, key)
                .context(CapacityExceededSnafu)?;
        }

        Ok(block.payload())
    }

    /// Returns the block owning `ptr` to the heap.
    ///
    /// Freeing a null pointer is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Uninitialized`](HeapError::Uninitialized) before `initialize`
    /// - [`ForeignPointer`](HeapError::ForeignPointer) if `ptr` cannot be a
    ///   payload of this heap (a range and alignment check only)
    /// - [`DoubleFree`](HeapError::DoubleFree) if the block is already free
    /// - [`CapacityExceeded`](HeapError::CapacityExceeded) if the freed block
    ///   has no free neighbour and the index is full; the block stays
    ///   allocated
    /// - [`InternalInconsistency`](HeapError::InternalInconsistency) if a free
    ///   neighbour is missing from the index
    ///
    /// On error the heap is left exactly as it was and the block stays
    /// allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by
    /// [`allocate`](Self::allocate) on this allocator. The memory must not be
    /// accessed after it has been freed.
    pub unsafe fn free(&mut self, ptr: *mut u8) -> Result<(), HeapError> {
        let Some(payload) = NonNull::new(ptr) else {
            return Ok(());
        };
        let Self {
            region,
            free_blocks,
        } = self;
        let region = region.as_mut().context(UninitializedSnafu)?;

        let addr = payload.addr().get();
        ensure!(region.owns_payload(addr), ForeignPointerSnafu { addr });
        let block = unsafe { Block::from_payload(payload) };
        ensure!(block.in_use(), DoubleFreeSnafu { addr });

        let key = size_key(region.end);
        let next = block.next().filter(|next| !next.in_use());
        let previous = block.previous().filter(|previous| !previous.in_use());

        // Both neighbours leave the index before anything is spliced, so a
        // missing entry can be reported with the heap unchanged.
        if let Some(next) = next {
            free_blocks
                .remove_exact(&next, key)
                .context(InternalInconsistencySnafu { addr: next.addr() })?;
        }
        if let Some(previous) = previous
            && let Err(source) = free_blocks.remove_exact(&previous, key)
        {
            if let Some(next) = next {
                // reuses the slot vacated just above
                let _ = free_blocks.insert_sorted(next, key);
            }
            return Err(source).context(InternalInconsistencySnafu {
                addr: previous.addr(),
            });
        }

        block.set_in_use(false);
        let mut merged = block;
        if next.is_some() {
            merged.absorb_next();
        }
        if let Some(previous) = previous {
            previous.absorb_next();
            merged = previous;
        }

        if merged.next().is_none() {
            region.tail = merged;
        }

        // The index can only be full if nothing was merged, in which case the
        // chain is untouched and restoring the flag undoes the whole call.
        free_blocks
            .insert_sorted(merged, key)
            .inspect_err(|_| merged.set_in_use(true))
            .context(CapacityExceededSnafu)?;

        Ok(())
    }
}
