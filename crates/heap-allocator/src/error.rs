use snafu::Snafu;
use snafu_utils::Location;
use sorted_index::{CapacityExceededError, NotFoundError};

/// Errors returned by [`HeapAllocator`](crate::HeapAllocator) operations.
///
/// The allocator never halts on its own; every failure is reported through
/// this type and the caller decides whether it is fatal. Use
/// [`HeapError::kind`] to classify an error without matching on variants.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeapError {
    #[snafu(display("heap allocator used before initialization"))]
    #[snafu(provide(ref, priority, Location => location))]
    Uninitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("heap allocator is already initialized"))]
    #[snafu(provide(ref, priority, Location => location))]
    AlreadyInitialized {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("zero-sized allocation requested"))]
    #[snafu(provide(ref, priority, Location => location))]
    ZeroSizeAllocation {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unsupported allocation alignment: {align}"))]
    #[snafu(provide(ref, priority, Location => location))]
    UnsupportedAlignment {
        align: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// The pointer lies outside the heap, inside the first header, or off
    /// word alignment.
    ///
    /// This is a range check, not a full validation. A word-aligned pointer
    /// into the middle of a live payload passes it, and `free` then reads a
    /// header out of payload bytes. That is undefined behaviour, which the
    /// safety contract of [`HeapAllocator::free`](crate::HeapAllocator::free)
    /// rules out.
    #[snafu(display("pointer {addr:#x} was not allocated from this heap"))]
    #[snafu(provide(ref, priority, Location => location))]
    ForeignPointer {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {addr:#x} is already free (double free or corruption)"))]
    #[snafu(provide(ref, priority, Location => location))]
    DoubleFree {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no usable memory range contains heap base {heap_base:#x}"))]
    #[snafu(provide(ref, priority, Location => location))]
    NoUsableRegion {
        heap_base: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("usable memory {heap_base:#x}..{heap_end:#x} cannot hold a single block"))]
    #[snafu(provide(ref, priority, Location => location))]
    HeapTooSmall {
        heap_base: usize,
        heap_end: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("out of memory: no free block can hold {size} bytes"))]
    #[snafu(provide(ref, priority, Location => location))]
    OutOfMemory {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free-block index capacity exceeded"))]
    #[snafu(provide(ref, priority, Location => location))]
    CapacityExceeded {
        #[snafu(source)]
        source: CapacityExceededError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block at {addr:#x} is missing from the free-block index"))]
    #[snafu(provide(ref, priority, Location => location))]
    InternalInconsistency {
        addr: usize,
        #[snafu(source)]
        source: NotFoundError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Coarse classification of a [`HeapError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum HeapErrorKind {
    /// `allocate`/`free` before `initialize`.
    Uninitialized,
    /// Bad request: zero size, unsupported alignment, double free, foreign
    /// pointer or a second `initialize`.
    InvalidArgument,
    /// No usable memory at the computed heap base.
    NoUsableRegion,
    /// No free block is large enough. The caller may free memory and retry.
    OutOfMemory,
    /// Too many non-adjacent free fragments to track.
    CapacityExceeded,
    /// The block chain and the free-block index disagree.
    InternalInconsistency,
}

impl HeapError {
    #[must_use]
    pub fn kind(&self) -> HeapErrorKind {
        match self {
            Self::Uninitialized { .. } => HeapErrorKind::Uninitialized,
            Self::AlreadyInitialized { .. }
            | Self::ZeroSizeAllocation { .. }
            | Self::UnsupportedAlignment { .. }
            | Self::ForeignPointer { .. }
            | Self::DoubleFree { .. } => HeapErrorKind::InvalidArgument,
            Self::NoUsableRegion { .. } | Self::HeapTooSmall { .. } => HeapErrorKind::NoUsableRegion,
            Self::OutOfMemory { .. } => HeapErrorKind::OutOfMemory,
            Self::CapacityExceeded { .. } => HeapErrorKind::CapacityExceeded,
            Self::InternalInconsistency { .. } => HeapErrorKind::InternalInconsistency,
        }
    }

    /// Returns `true` if freeing other memory could make a retry succeed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            HeapErrorKind::OutOfMemory | HeapErrorKind::CapacityExceeded
        )
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = UninitializedSnafu.build();
        assert!(err.kind().is_uninitialized());
        assert!(!err.is_recoverable());

        let err = DoubleFreeSnafu { addr: 0x1000_usize }.build();
        assert_eq!(err.kind(), HeapErrorKind::InvalidArgument);

        let err = HeapTooSmallSnafu {
            heap_base: 0x1000_usize,
            heap_end: 0x1008_usize,
        }
        .build();
        assert!(err.kind().is_no_usable_region());

        let err = OutOfMemorySnafu { size: 64_usize }.build();
        assert!(err.kind().is_out_of_memory());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = ForeignPointerSnafu { addr: 0xdead_usize }.build();
        assert_eq!(err.to_string(), "pointer 0xdead was not allocated from this heap");

        let err = OutOfMemorySnafu { size: 100_usize }.build();
        assert_eq!(err.to_string(), "out of memory: no free block can hold 100 bytes");
    }
}
