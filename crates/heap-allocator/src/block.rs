//! Block headers and the accessors that touch them.
//!
//! Every block in the heap starts with a [`BlockHeader`] followed by its
//! payload. Headers are linked in address order through `previous`/`next`.
//! The payload size is never stored; it is the distance to the next header
//! (or to the heap end for the terminal block) minus the header itself.
//!
//! ```text
//! Heap Layout:
//! base                                                                end
//! ┌────────┬───────────────┬────────┬─────────────┬────────┬──────────┐
//! │ Header │ Payload       │ Header │ Payload     │ Header │ Payload  │
//! │ used   │               │ free   │             │ used   │          │
//! └────────┴───────────────┴────────┴─────────────┴────────┴──────────┘
//!     │ next ──────────────────▶│ next ────────────────▶│ next = None
//!     │◀────────────── previous │◀─────────────  previous
//! ```
//!
//! All address arithmetic in the allocator lives in this module. The rest of
//! the crate only follows links and flips flags through [`Block`].

use core::{fmt, ptr::NonNull};

/// Size of one block header in bytes.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Allocation granularity. Requests are padded to a multiple of this.
pub const WORD_SIZE: usize = size_of::<usize>();

const _: () = assert!(HEADER_SIZE.is_multiple_of(WORD_SIZE));
const _: () = assert!(align_of::<BlockHeader>() <= WORD_SIZE);

/// Per-block metadata stored directly in heap memory.
#[repr(C)]
struct BlockHeader {
    /// Adjacent block at a lower address, `None` for the first block.
    previous: Option<Block>,
    /// Adjacent block at a higher address, `None` for the last block.
    next: Option<Block>,
    in_use: bool,
}

/// Handle to a block header inside the managed heap.
///
/// A `Block` is only ever created by [`Block::write`] or
/// [`Block::from_payload`], both of which require the caller to guarantee that
/// the header lives inside a heap owned by the allocator. The safe accessors
/// below rely on that: as long as the handle exists, the header memory is
/// valid and nothing else reads or writes it.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<BlockHeader>);

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:#x})", self.addr())
    }
}

impl Block {
    /// Writes a fresh free header at `at` and returns its handle.
    ///
    /// # Safety
    ///
    /// - `at` must be aligned to [`WORD_SIZE`]
    /// - `at..at + HEADER_SIZE` must be valid, writable heap memory owned by
    ///   the allocator
    /// - `previous` and `next`, if present, must be blocks of the same heap
    pub(crate) unsafe fn write(at: NonNull<u8>, previous: Option<Self>, next: Option<Self>) -> Self {
        let header = at.cast::<BlockHeader>();
        debug_assert!(header.is_aligned(), "block header must be aligned");
        unsafe {
            header.write(BlockHeader {
                previous,
                next,
                in_use: false,
            });
        }
        Self(header)
    }

    /// Recovers the block that owns `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must be a pointer previously returned by [`Block::payload`]
    /// for a block that is still part of the heap.
    pub(crate) unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self(unsafe { payload.byte_sub(HEADER_SIZE) }.cast())
    }

    /// Returns the address of the header.
    pub(crate) fn addr(self) -> usize {
        self.0.addr().get()
    }

    /// Returns the pointer to the first payload byte.
    pub(crate) fn payload(self) -> NonNull<u8> {
        unsafe { self.0.byte_add(HEADER_SIZE) }.cast()
    }

    pub(crate) fn previous(self) -> Option<Self> {
        unsafe { (*self.0.as_ptr()).previous }
    }

    pub(crate) fn next(self) -> Option<Self> {
        unsafe { (*self.0.as_ptr()).next }
    }

    fn set_previous(self, previous: Option<Self>) {
        unsafe { (*self.0.as_ptr()).previous = previous }
    }

    fn set_next(self, next: Option<Self>) {
        unsafe { (*self.0.as_ptr()).next = next }
    }

    pub(crate) fn in_use(self) -> bool {
        unsafe { (*self.0.as_ptr()).in_use }
    }

    pub(crate) fn set_in_use(self, in_use: bool) {
        unsafe { (*self.0.as_ptr()).in_use = in_use }
    }

    /// Returns the payload size in bytes.
    ///
    /// `heap_end` is only consulted for the terminal block.
    pub(crate) fn size(self, heap_end: usize) -> usize {
        let end = self.next().map_or(heap_end, Self::addr);
        end - self.addr() - HEADER_SIZE
    }

    /// Carves a new free block out of this block's payload.
    ///
    /// The new header is placed `payload_size` bytes into the payload and
    /// takes over everything after it, including this block's `next` link.
    ///
    /// # Safety
    ///
    /// `payload_size` must be a multiple of [`WORD_SIZE`] and
    /// `payload_size + HEADER_SIZE` must not exceed this block's size.
    pub(crate) unsafe fn split_at(self, payload_size: usize) -> Self {
        let next = self.next();
        let at = unsafe { self.payload().byte_add(payload_size) };
        let remainder = unsafe { Self::write(at, Some(self), next) };
        if let Some(next) = next {
            next.set_previous(Some(remainder));
        }
        self.set_next(Some(remainder));
        remainder
    }

    /// Splices the following block out of the chain, growing this block to
    /// cover it.
    ///
    /// Does nothing if this is the terminal block.
    pub(crate) fn absorb_next(self) {
        let Some(next) = self.next() else {
            return;
        };
        let after = next.next();
        if let Some(after) = after {
            after.set_previous(Some(self));
        }
        self.set_next(after);
    }
}
