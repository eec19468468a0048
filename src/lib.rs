//! A simple brk-backed memory allocator written in Rust.
//!
//! This crate manages a single heap region that only ever grows upward, in
//! fixed [`CHUNK_SIZE`] increments, and keeps its bookkeeping inline in the
//! heap itself. It is deliberately small: one block list, one growth rule,
//! one coalescing pass, and a heap dump for poking at the result.
//!
//! # Usage
//! To use this crate you can add `chunk_malloc` as a dependency in your project's `Cargo.toml`.
//! ```toml
//! [dependencies]
//! chunk_malloc = "0.1"
//! ```
//!
//! The allocator is generic over a [grower](#growers). For a self-contained
//! heap, hand it an [`ArenaGrower`] over any buffer you own:
//! ```
//! use chunk_malloc::growers::ArenaGrower;
//! use chunk_malloc::ChunkMalloc;
//!
//! let mut heap = vec![0_u8; 64 * 1024].into_boxed_slice();
//! let mut malloc = unsafe {
//!     ChunkMalloc::with_grower(ArenaGrower::new(heap.as_mut_ptr(), heap.len()))
//! };
//!
//! let p = malloc.allocate(100).unwrap();
//! unsafe { p.as_ptr().write_bytes(0xAB, 100) };
//! malloc.free(p.as_ptr());
//! ```
//!
//! For a real process heap, use [`BrkGrower`], which moves the program break
//! through [`libc::brk`]:
//! ```no_run
//! use chunk_malloc::growers::BrkGrower;
//! use chunk_malloc::ChunkMalloc;
//!
//! let mut malloc = unsafe { ChunkMalloc::with_grower(BrkGrower::new()) };
//! let p = malloc.allocate(100);
//! ```
//! Don't mix a [`BrkGrower`]-backed allocator with another allocator that also
//! manages the program break (which includes the default libc malloc in most
//! processes), the two will trample each other's memory.
//!
//! # Mode of operation
//! The allocator's behavior boils down to three rules:
//! - Every allocation grows the heap by the smallest multiple of
//!   [`CHUNK_SIZE`] that fits the request plus a header, and appends the new
//!   block at the tail of the block list. There is no search for a reusable
//!   free block; freed memory only shrinks the bookkeeping through merging,
//!   it is never handed out again.
//! - Every free marks its block and then runs a single coalescing pass that
//!   merges adjacent free blocks, so no two neighbors are ever both free.
//! - The whole heap can be handed back at once with
//!   [`reset`](ChunkMalloc::reset), and inspected at any point with
//!   [`dump`](ChunkMalloc::dump).
//!
//! Bellow is a list of the abstractions used by the allocator for operating on the heap:
//!
//! ## Blocks
//! The heap is divided into blocks. Each block is a [header](#headers)
//! followed by its data region, the span of bytes the caller gets to use.
//! A block is either occupied by an allocation or free.
//!
//! ## Headers
//! At the beginning of each block there is a header holding the block's
//! metadata: its capacity, the bytes currently in use, whether it is free,
//! and the links chaining all blocks into one address-ordered doubly linked
//! list.
//!
//! ## Block list
//! The block list threads every block on the heap, free and occupied alike,
//! in address order. It is what free-by-address lookup, coalescing, and the
//! heap dump walk.
//!
//! ## Growers
//! A grower is the allocator's window to the operating system: a region of
//! memory that can be extended at its end and handed back on teardown.
//! [`ChunkMalloc`] is generic over its grower, which means that anything
//! implementing [`Grower`] can serve as its heap. [`BrkGrower`] does it with
//! the process's data segment, [`ArenaGrower`] with a plain buffer.
//!
//! # Diagnostics
//! Internal state transitions are traced through the [`tracing`] crate at
//! debug level and growth failures at error level. Separately from that, the
//! user-facing diagnostics (the [`dump`](ChunkMalloc::dump) heap map and the
//! verbose free trail) go to a configurable log sink defaulting to standard
//! error, see [`set_log_sink`](ChunkMalloc::set_log_sink) and
//! [`set_verbose`](ChunkMalloc::set_verbose).
//!
//! [`ArenaGrower`]: growers::ArenaGrower
//! [`BrkGrower`]: growers::BrkGrower
//! [`Grower`]: growers::Grower
//! [`CHUNK_SIZE`]: allocators::chunk_malloc::CHUNK_SIZE

pub use crate::allocators::chunk_malloc::CHUNK_SIZE;
pub use crate::allocators::ChunkMalloc;
pub use crate::header::HEADER_SIZE;

pub mod allocators;
mod block_list;
mod bounds;
pub mod growers;
mod header;
mod util;
