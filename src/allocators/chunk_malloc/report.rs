//! Structured snapshot of the heap and the text dump rendered from it.

use std::io::{self, Write};

use crate::header::HEADER_SIZE;

/// The state of one block as seen by a read-only traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    pub header: *const u8,
    pub next: *const u8,
    pub prev: *const u8,
    pub data: *const u8,
    pub capacity: usize,
    pub size: usize,
    pub is_free: bool,
}

impl BlockReport {
    /// Total bytes the block occupies on the heap, header included.
    #[inline]
    pub fn span(&self) -> usize {
        self.capacity + HEADER_SIZE
    }

    /// Bytes of the data region not in use by the occupant.
    #[inline]
    pub fn slack(&self) -> usize {
        self.capacity - self.size
    }
}

/// A point-in-time picture of the whole heap: every block in address order
/// plus the boundary addresses. Built by
/// [`ChunkMalloc::report`](super::ChunkMalloc::report) and rendered by
/// [`ChunkMalloc::dump`](super::ChunkMalloc::dump).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapReport {
    pub blocks: Vec<BlockReport>,
    pub lower: *const u8,
    pub upper: *const u8,
}

impl HeapReport {
    pub fn used_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| !b.is_free).count()
    }

    pub fn free_blocks(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_free).count()
    }

    pub fn total_span(&self) -> usize {
        self.blocks.iter().map(|b| b.span()).sum()
    }

    pub fn total_capacity(&self) -> usize {
        self.blocks.iter().map(|b| b.capacity).sum()
    }

    pub fn total_size(&self) -> usize {
        self.blocks.iter().map(|b| b.size).sum()
    }

    pub fn total_slack(&self) -> usize {
        self.blocks.iter().map(|b| b.slack()).sum()
    }

    /// Writes the heap map as one text line per block followed by the totals
    /// and a summary line.
    pub fn write_to(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "Heap map")?;
        writeln!(
            w,
            "  {:<6} {:<14} {:<14} {:<14} {:<14} {:>10} {:>10} {:>10} {:>10}  {}",
            "blk no",
            "header",
            "next",
            "prev",
            "data",
            "blk size",
            "capacity",
            "size",
            "slack",
            "status",
        )?;
        for (i, block) in self.blocks.iter().enumerate() {
            writeln!(
                w,
                "  {:<6} {:<14p} {:<14p} {:<14p} {:<14p} {:>10} {:>10} {:>10} {:>10}  {}",
                i,
                block.header,
                block.next,
                block.prev,
                block.data,
                block.span(),
                block.capacity,
                block.size,
                block.slack(),
                if block.is_free { "free  *" } else { "in use" },
            )?;
        }
        writeln!(
            w,
            "  {:<6} {:<14} {:<14} {:<14} {:<14} {:>10} {:>10} {:>10} {:>10}",
            "total",
            "",
            "",
            "",
            "",
            self.total_span(),
            self.total_capacity(),
            self.total_size(),
            self.total_slack(),
        )?;
        writeln!(
            w,
            "  Used blocks: {:4}  Free blocks: {:4}  Min heap: {:p}  Max heap: {:p}  Header size: {} bytes",
            self.used_blocks(),
            self.free_blocks(),
            self.lower,
            self.upper,
            HEADER_SIZE,
        )
    }
}
