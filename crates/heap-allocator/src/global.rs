//! Kernel-facing allocation hooks.
//!
//! [`HeapAllocator`] reports every failure as a [`HeapError`] and leaves the
//! decision to the caller. [`KernelHeap`] is that caller for a kernel: it
//! serialises access with a spin lock, treats any failure as fatal, writes a
//! diagnostic report to the platform console and halts.
//!
//! ```ignore
//! struct Board;
//!
//! impl Platform for Board {
//!     type Console = SerialPort;
//!     fn console() -> SerialPort { SerialPort::com1() }
//!     fn halt() -> ! { loop { hlt() } }
//! }
//!
//! #[global_allocator]
//! static HEAP: KernelHeap<Board> = KernelHeap::new();
//! ```

use core::{
    alloc::{GlobalAlloc, Layout},
    fmt::{self, Write as _},
    marker::PhantomData,
    ptr::NonNull,
};

use snafu_utils::Report;
use spin::Mutex;

use crate::{
    block::WORD_SIZE,
    error::{HeapError, UnsupportedAlignmentSnafu},
    heap::{FREE_INDEX_CAPACITY, HeapAllocator},
    inspect::HeapStats,
    memory_map::MemoryMap,
};

/// Text sink for diagnostics.
///
/// Only [`fmt::Write::write_str`] is required. The remaining methods have
/// defaults built on it.
pub trait Console: fmt::Write {
    /// Returns `true` if the sink interprets ANSI escape sequences.
    fn supports_color(&self) -> bool {
        false
    }

    fn write_string(&mut self, s: &str) -> fmt::Result {
        self.write_str(s)
    }

    fn write_hex(&mut self, value: usize) -> fmt::Result {
        write!(self, "{value:#x}")
    }

    fn write_decimal(&mut self, value: usize) -> fmt::Result {
        write!(self, "{value}")
    }
}

/// Services the hooks need from the surrounding kernel.
pub trait Platform {
    type Console: Console;

    /// Returns a handle to the diagnostic console.
    ///
    /// Called while handling an allocation failure, so it must not allocate.
    fn console() -> Self::Console;

    /// Stops the machine.
    fn halt() -> !;
}

/// Lock-protected heap with halt-on-failure hooks.
pub struct KernelHeap<P, const CAP: usize = FREE_INDEX_CAPACITY> {
    allocator: Mutex<HeapAllocator<CAP>>,
    _platform: PhantomData<fn() -> P>,
}

impl<P, const CAP: usize> Default for KernelHeap<P, CAP>
where
    P: Platform,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, const CAP: usize> KernelHeap<P, CAP>
where
    P: Platform,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocator: Mutex::new(HeapAllocator::new()),
            _platform: PhantomData,
        }
    }

    /// Places the heap after the kernel image.
    ///
    /// Logs the usable ranges and the resulting heap extent. Unlike the
    /// allocation hooks this returns errors, since the caller may have a
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns the error from [`HeapAllocator::initialize`].
    ///
    /// # Safety
    ///
    /// Same contract as [`HeapAllocator::initialize`].
    pub unsafe fn init(
        &self,
        kernel_end: usize,
        memory_map: &MemoryMap,
    ) -> Result<HeapStats, HeapError> {
        let mut console = P::console();
        if memory_map.is_empty() {
            warn!(&mut console, "boot memory map has no usable ranges");
        }
        for range in memory_map.usable_ranges() {
            info!(&mut console, "usable memory: {range}");
        }

        let mut allocator = self.allocator.lock();
        unsafe { allocator.initialize(kernel_end, memory_map.usable_ranges()) }?;
        let stats = allocator.stats();
        info!(
            &mut console,
            "heap: {:#x} - {:#x} ({} bytes free)",
            stats.heap_start,
            stats.heap_end,
            stats.free_bytes
        );
        Ok(stats)
    }

    /// Allocates `size` bytes, halting on failure.
    pub fn kmalloc(&self, size: usize) -> NonNull<u8> {
        let result = self.allocator.lock().allocate(size);
        match result {
            Ok(ptr) => ptr,
            Err(err) => self.fail(err, format_args!("failed to allocate {size} bytes")),
        }
    }

    /// Frees a pointer returned by [`kmalloc`](Self::kmalloc), halting on
    /// failure.
    ///
    /// # Safety
    ///
    /// Same contract as [`HeapAllocator::free`].
    pub unsafe fn kfree(&self, ptr: *mut u8) {
        let result = unsafe { self.allocator.lock().free(ptr) };
        if let Err(err) = result {
            self.fail(err, format_args!("failed to free address {ptr:p}"));
        }
    }

    /// Runs `f` with shared access to the allocator.
    pub fn with_allocator<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&HeapAllocator<CAP>) -> R,
    {
        f(&self.allocator.lock())
    }

    #[cold]
    fn fail(&self, err: HeapError, message: fmt::Arguments) -> ! {
        let mut console = P::console();
        let color = console.supports_color();
        error!(&mut console, "{message}");
        let _ = write!(console, "{}", Report::new(err).colored(color));

        // the failing call has released the lock; another holder means we
        // are nested inside it and must not wait
        if let Some(allocator) = self.allocator.try_lock() {
            let _ = writeln!(console);
            let _ = allocator.dump_state(&mut console, color);
            let stats = allocator.stats();
            let _ = write_summary(&mut console, &stats);
        }
        P::halt()
    }
}

fn write_summary<C>(console: &mut C, stats: &HeapStats) -> fmt::Result
where
    C: Console,
{
    console.write_string("\nfree: ")?;
    console.write_decimal(stats.free_bytes)?;
    console.write_string(" bytes, largest free block: ")?;
    console.write_decimal(stats.largest_free_block)?;
    console.write_string(" bytes, heap end: ")?;
    console.write_hex(stats.heap_end)?;
    console.write_string("\n")
}

unsafe impl<P, const CAP: usize> GlobalAlloc for KernelHeap<P, CAP>
where
    P: Platform,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > WORD_SIZE {
            let err = UnsupportedAlignmentSnafu {
                align: layout.align(),
            }
            .build();
            self.fail(
                err,
                format_args!("failed to allocate {} bytes", layout.size()),
            );
        }
        self.kmalloc(layout.size()).as_ptr()
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.kfree(ptr) }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::{cell::RefCell, panic};

    use platform_cast::CastFrom as _;

    use super::*;
    use crate::{HeapErrorKind, heap::tests::with_test_heap, memory_map::MemoryMapEntry};

    std::thread_local! {
        static OUTPUT: RefCell<String> = const { RefCell::new(String::new()) };
    }

    struct TestConsole;

    impl fmt::Write for TestConsole {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            OUTPUT.with_borrow_mut(|out| out.push_str(s));
            Ok(())
        }
    }

    impl Console for TestConsole {}

    struct TestPlatform;

    impl Platform for TestPlatform {
        type Console = TestConsole;

        fn console() -> TestConsole {
            TestConsole
        }

        fn halt() -> ! {
            panic!("halted");
        }
    }

    type TestHeap = KernelHeap<TestPlatform, 16>;

    fn take_output() -> String {
        OUTPUT.with_borrow_mut(core::mem::take)
    }

    fn memory_map(start: usize, size: usize) -> MemoryMap {
        MemoryMap::from_entries(&[
            MemoryMapEntry::new(u64::cast_from(start), u64::cast_from(size), 1),
            MemoryMapEntry::TERMINATOR,
        ])
    }

    fn with_kernel_heap<F>(test_fn: F)
    where
        F: FnOnce(&TestHeap, usize),
    {
        with_test_heap(4096, |start, size| unsafe {
            let heap = TestHeap::new();
            heap.init(start, &memory_map(start, size)).unwrap();
            take_output();
            test_fn(&heap, start);
        });
    }

    fn assert_halts<F>(f: F) -> String
    where
        F: FnOnce(),
    {
        let result = panic::catch_unwind(panic::AssertUnwindSafe(f));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"halted"));
        take_output()
    }

    #[test]
    fn test_init_logs_ranges() {
        with_test_heap(4096, |start, size| unsafe {
            take_output();
            let heap = TestHeap::new();
            let stats = heap.init(start, &memory_map(start, size)).unwrap();
            assert_eq!(stats.heap_start, start);
            assert_eq!(stats.free_block_count, 1);

            let output = take_output();
            assert!(output.contains("[heap]  INFO usable memory: "));
            assert!(output.contains(&format!("heap: {start:#x} - {:#x}", start + size)));

            let err = heap.init(start, &memory_map(start, size)).unwrap_err();
            assert!(matches!(err, HeapError::AlreadyInitialized { .. }));
        });
    }

    #[test]
    fn test_init_empty_map() {
        take_output();
        let heap = TestHeap::new();
        let err = unsafe { heap.init(0x10_0000, &MemoryMap::default()) }.unwrap_err();
        assert_eq!(err.kind(), HeapErrorKind::NoUsableRegion);
        assert!(take_output().contains(" WARN boot memory map has no usable ranges"));
    }

    #[test]
    fn test_kmalloc_kfree() {
        with_kernel_heap(|heap, start| unsafe {
            let ptr = heap.kmalloc(100);
            assert_eq!(ptr.addr().get(), start + crate::HEADER_SIZE);
            heap.with_allocator(|allocator| {
                assert_eq!(allocator.stats().used_bytes, 104);
            });
            heap.kfree(ptr.as_ptr());
            heap.kfree(core::ptr::null_mut());
            heap.with_allocator(|allocator| assert_eq!(allocator.stats().used_bytes, 0));
            assert_eq!(take_output(), "");
        });
    }

    #[test]
    fn test_kmalloc_failure_halts() {
        with_kernel_heap(|heap, _start| {
            let output = assert_halts(|| {
                heap.kmalloc(8192);
            });
            assert!(output.contains("ERROR failed to allocate 8192 bytes"));
            assert!(output.contains("Error: out of memory: no free block can hold 8192 bytes"));
            assert!(output.contains("Blocks\n------\n"));
            assert!(output.contains("Free Blocks\n------------\n"));
            assert!(output.contains("largest free block: "));
        });
    }

    #[test]
    fn test_kmalloc_uninitialized_halts() {
        let heap = TestHeap::new();
        take_output();
        let output = assert_halts(|| {
            heap.kmalloc(8);
        });
        assert!(output.contains("used before initialization"));
        assert!(output.contains("heap not initialized"));
    }

    #[test]
    fn test_kfree_failure_halts() {
        with_kernel_heap(|heap, _start| {
            let ptr = heap.kmalloc(16);
            unsafe {
                heap.kfree(ptr.as_ptr());
            }
            let output = assert_halts(|| unsafe { heap.kfree(ptr.as_ptr()) });
            assert!(output.contains(&format!("failed to free address {:p}", ptr.as_ptr())));
            assert!(output.contains("already free"));
        });
    }

    #[test]
    fn test_global_alloc() {
        with_kernel_heap(|heap, _start| unsafe {
            let layout = Layout::new::<[u64; 4]>();
            let ptr = heap.alloc(layout);
            assert!(!ptr.is_null());
            assert!(ptr.addr().is_multiple_of(layout.align()));
            ptr.write_bytes(0xab, layout.size());
            heap.dealloc(ptr, layout);
            heap.with_allocator(|allocator| assert_eq!(allocator.free_blocks().count(), 1));
        });
    }

    #[test]
    fn test_global_alloc_overaligned_halts() {
        with_kernel_heap(|heap, _start| {
            let layout = Layout::from_size_align(64, 64).unwrap();
            let output = assert_halts(|| unsafe {
                let _ = heap.alloc(layout);
            });
            assert!(output.contains("unsupported allocation alignment: 64"));
        });
    }
}
