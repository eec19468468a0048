//! A single-threaded chunk-growth memory allocator.
//
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// Every public operation keeps one ordering rule: the grower is consulted
// before the block list or the bounds are touched. A failed growth therefore
// leaves the bookkeeping exactly as it was, which is what makes the
// out-of-memory paths of alloc/realloc safe to retry.

use self::report::{BlockReport, HeapReport};
use self::util::growth_size;
use crate::block_list::BlockList;
use crate::bounds::HeapBounds;
use crate::growers::Grower;
use crate::header::{data_ptr, Header, HEADER_ALIGN, HEADER_SIZE};

use core::ptr::{self, NonNull};
use std::fmt::Debug;
use std::io::{self, Write};

use static_assertions::const_assert;
use tracing::{debug, error, instrument, Level};

pub mod report;
mod util;

/// The granularity of heap growth. Every allocation extends the heap by a
/// multiple of this many bytes, never by less.
pub const CHUNK_SIZE: usize = 1024;

// A single chunk must fit a header plus at least one data byte, and chunk
// multiples must preserve header alignment from one growth to the next.
const_assert!(CHUNK_SIZE > HEADER_SIZE);
const_assert!(CHUNK_SIZE % HEADER_ALIGN == 0);

/// A single-threaded memory allocator over a growable heap region.
///
/// Each call to [`allocate`](ChunkMalloc::allocate) extends the heap through
/// the grower and appends one block to the tail of the block list; freed
/// blocks are merged with free neighbors but never handed out again. See the
/// [`crate`] level documentation for the full picture.
#[repr(C)]
pub struct ChunkMalloc<T: Grower> {
    blocks: BlockList,
    bounds: HeapBounds,
    grower: T,
    verbose: bool,
    log_sink: Box<dyn Write>,
}

impl<T: Grower> Debug for ChunkMalloc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMalloc")
            .field("blocks", &self.blocks)
            .field("bounds", &self.bounds)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl<T: Grower> ChunkMalloc<T> {
    /// Creates an allocator instance with the specified grower.
    /// Diagnostics go to standard error until [`set_log_sink`](ChunkMalloc::set_log_sink)
    /// says otherwise.
    ///
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying memory for the lifetime of the returned allocator.
    pub unsafe fn with_grower(grower: T) -> Self {
        ChunkMalloc {
            blocks: BlockList::new(),
            bounds: HeapBounds::new(),
            grower,
            verbose: false,
            log_sink: Box::new(io::stderr()),
        }
    }

    /// Allocates `size` bytes and returns the address of the data region.
    ///
    /// A zero `size` is a no-op and yields `None` without touching the heap.
    /// `None` is also returned when the grower cannot extend the heap, in
    /// which case the block list is left exactly as it was.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            debug!("Zero-sized request, nothing to do.");
            return None;
        }
        unsafe {
            let block = self.grow_and_append(size).ok()?;
            Some(NonNull::new_unchecked(data_ptr(block.as_ptr())))
        }
    }

    /// Releases the block whose data region starts at `ptr`.
    ///
    /// A null `ptr`, an address this allocator never handed out, or a block
    /// that is already free make this a no-op; the reason is written to the
    /// log sink when verbose mode is on. A successful free marks the block,
    /// logs the address in verbose mode, and re-coalesces the heap.
    #[instrument(level = "info")]
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            self.note_ignored_free(ptr, "null address");
            return;
        }
        let Some(block) = (unsafe { self.blocks.find_by_data(ptr) }) else {
            self.note_ignored_free(ptr, "address not from this allocator");
            return;
        };
        let block = block.as_ptr();
        unsafe {
            if (*block).is_free {
                self.note_ignored_free(ptr, "block already free");
                return;
            }
            (*block).is_free = true;
            (*block).size = 0;
            debug!(?block, "Marked block free.");
            if self.verbose {
                let _ = writeln!(self.log_sink, "freed {ptr:p}");
            }
            self.blocks.coalesce();
        }
    }

    /// Allocates a zero-filled region for `count` elements of `elem_size`
    /// bytes each.
    ///
    /// Yields `None` if either argument is zero, if `count * elem_size`
    /// overflows, or if the heap cannot grow.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        if count == 0 || elem_size == 0 {
            debug!("Degenerate request, nothing to do.");
            return None;
        }
        let Some(total) = count.checked_mul(elem_size) else {
            error!("Requested array size overflows.");
            return None;
        };
        let data = self.allocate(total)?;
        unsafe { ptr::write_bytes(data.as_ptr(), 0, total) };
        Some(data)
    }

    /// Moves the occupant of `ptr` into a freshly allocated block of `size`
    /// bytes and frees the old one.
    ///
    /// A zero `size` is a no-op yielding `None`. A null `ptr` degenerates to a
    /// plain [`allocate`](ChunkMalloc::allocate). An unrecognized or already
    /// free `ptr` yields `None` without touching anything. Only the occupant's
    /// bytes are carried over: the copy length is the smaller of the old
    /// block's `size` and the new `size`. If the new allocation fails the old
    /// block stays valid and unfreed.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            debug!("Zero-sized request, nothing to do.");
            return None;
        }
        if ptr.is_null() {
            debug!("Null address, reallocating degenerates to a fresh allocation.");
            return self.allocate(size);
        }
        let Some(old_block) = (unsafe { self.blocks.find_by_data(ptr) }) else {
            debug!(?ptr, "Address not from this allocator, ignoring.");
            return None;
        };
        let old_block = old_block.as_ptr();
        unsafe {
            if (*old_block).is_free {
                debug!(?ptr, "Block already free, ignoring.");
                return None;
            }
            let old_size = (*old_block).size;

            let new_data = self.allocate(size)?;
            ptr::copy_nonoverlapping(ptr, new_data.as_ptr(), old_size.min(size));
            self.free(ptr);
            Some(new_data)
        }
    }

    /// Tears the whole heap down: hands every granted byte back through the
    /// grower and clears the block list and bounds to their initial state.
    ///
    /// Irreversible; every address this allocator ever returned is invalid
    /// afterwards.
    #[instrument(level = "info")]
    pub fn reset(&mut self) {
        let span = self.bounds.span();
        if span != 0 && unsafe { self.grower.shrink(span) }.is_err() {
            error!(span, "Heap release failed, clearing the bookkeeping anyway.");
        }
        self.blocks.clear();
        self.bounds.clear();
        debug!("Allocator returned to initial state.");
    }

    /// Takes a read-only snapshot of every block and the heap bounds.
    pub fn report(&self) -> HeapReport {
        let mut blocks = Vec::new();
        let mut block = self.blocks.head().map_or(ptr::null_mut(), |p| p.as_ptr());
        while !block.is_null() {
            unsafe {
                blocks.push(BlockReport {
                    header: block as *const u8,
                    next: (*block).next as *const u8,
                    prev: (*block).prev as *const u8,
                    data: data_ptr(block) as *const u8,
                    capacity: (*block).capacity,
                    size: (*block).size,
                    is_free: (*block).is_free,
                });
                block = (*block).next;
            }
        }
        HeapReport {
            blocks,
            lower: self
                .bounds
                .lower()
                .map_or(ptr::null(), |p| p.as_ptr() as *const u8),
            upper: self
                .bounds
                .upper()
                .map_or(ptr::null(), |p| p.as_ptr() as *const u8),
        }
    }

    /// Writes the heap map to the log sink. See
    /// [`HeapReport::write_to`](report::HeapReport::write_to) for the format.
    pub fn dump(&mut self) -> io::Result<()> {
        let report = self.report();
        report.write_to(&mut *self.log_sink)
    }

    /// Toggles verbose mode. When on, every free (successful or ignored) is
    /// logged to the sink.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Redirects the dump and verbose-mode output.
    pub fn set_log_sink(&mut self, sink: Box<dyn Write>) {
        self.log_sink = sink;
    }

    /// Computes the chunk-rounded growth for `size`, extends the heap, and
    /// carves a single occupied block out of the granted region. The block
    /// list and bounds are only touched once the grower has succeeded.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `size` is nonzero and
    /// that the grower hands out writable memory adjacent to its previous end.
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    unsafe fn grow_and_append(&mut self, size: usize) -> Result<NonNull<Header>, ()> {
        debug_assert_ne!(size, 0);

        let growth = match growth_size(size) {
            Some(g) => g,
            None => {
                error!("Growth failure, request size overflows.");
                return Err(());
            }
        };
        debug!(growth, "Computed chunk-rounded growth.");

        let old_end = match self.grower.grow(growth) {
            Ok(p) => p,
            Err(()) => {
                error!("Growth failure, no memory.");
                return Err(());
            }
        };
        debug_assert_eq!(old_end.as_ptr() as usize % HEADER_ALIGN, 0);

        let block: *mut Header = old_end.as_ptr().cast();
        block.write(Header::new_occupied(growth - HEADER_SIZE, size));
        self.blocks.append(block);
        self.bounds.record(old_end, growth);

        debug!(?block, "Carved new block at the old heap end.");
        Ok(NonNull::new_unchecked(block))
    }

    fn note_ignored_free(&mut self, ptr: *mut u8, reason: &str) {
        debug!(?ptr, reason, "Ignoring free request.");
        if self.verbose {
            let _ = writeln!(self.log_sink, "free of {ptr:p} ignored: {reason}");
        }
    }
}

impl<T: Grower> PartialEq for ChunkMalloc<T> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl<T: Grower> Eq for ChunkMalloc<T> {}

#[cfg(test)]
mod tests;
