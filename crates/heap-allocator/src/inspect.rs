//! Read-only views of the heap for diagnostics.

use core::fmt;

use ansi_term::{Color, WithFg};

use crate::{
    block::{Block, HEADER_SIZE},
    heap::HeapAllocator,
};

/// A snapshot of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display("Address: {addr:#x}, Size: {size}, Used: {in_use}")]
pub struct BlockInfo {
    /// Address of the block header.
    pub addr: usize,
    /// Payload size in bytes.
    pub size: usize,
    pub in_use: bool,
}

impl BlockInfo {
    fn of(block: Block, heap_end: usize) -> Self {
        Self {
            addr: block.addr(),
            size: block.size(heap_end),
            in_use: block.in_use(),
        }
    }
}

/// Iterator over the block chain in address order.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    next: Option<Block>,
    heap_end: usize,
    _heap: core::marker::PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        self.next = block.next();
        Some(BlockInfo::of(block, self.heap_end))
    }
}

/// Aggregate figures describing the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub heap_start: usize,
    pub heap_end: usize,
    pub block_count: usize,
    pub free_block_count: usize,
    /// Sum of payload sizes of all blocks.
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub largest_free_block: usize,
    pub free_index_capacity: usize,
}

impl<const CAP: usize> HeapAllocator<CAP> {
    /// Returns every block in address order.
    ///
    /// The iterator is empty before initialization.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            next: self.region.map(|region| region.head),
            heap_end: self.region.map_or(0, |region| region.end),
            _heap: core::marker::PhantomData,
        }
    }

    /// Returns the free blocks in index order, smallest first.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let heap_end = self.region.map_or(0, |region| region.end);
        self.free_blocks
            .iter()
            .map(move |&block| BlockInfo::of(block, heap_end))
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let Some(region) = self.region else {
            return HeapStats {
                free_index_capacity: CAP,
                ..HeapStats::default()
            };
        };

        let mut stats = HeapStats {
            heap_start: region.base,
            heap_end: region.end,
            free_index_capacity: CAP,
            ..HeapStats::default()
        };
        for block in self.blocks() {
            stats.block_count += 1;
            stats.total_bytes += block.size;
            if block.in_use {
                stats.used_bytes += block.size;
            } else {
                stats.free_block_count += 1;
                stats.free_bytes += block.size;
            }
        }
        stats.largest_free_block = self.free_blocks().last().map_or(0, |block| block.size);
        stats
    }

    /// Writes the block chain and the free-block index in human-readable
    /// form.
    pub fn dump_state<W>(&self, out: &mut W, color: bool) -> fmt::Result
    where
        W: fmt::Write,
    {
        let Some(region) = self.region else {
            return writeln!(out, "heap not initialized");
        };

        writeln!(
            out,
            "Heap: {:#x} - {:#x} ({} byte headers)",
            region.base, region.end, HEADER_SIZE
        )?;
        writeln!(out, "{}", WithFg::maybe(color, Color::Cyan, "Blocks"))?;
        writeln!(out, "------")?;
        for block in self.blocks() {
            writeln!(out, "{block}")?;
        }
        writeln!(out)?;
        writeln!(out, "{}", WithFg::maybe(color, Color::Cyan, "Free Blocks"))?;
        writeln!(out, "------------")?;
        for block in self.free_blocks() {
            writeln!(out, "{block}")?;
        }
        Ok(())
    }
}
