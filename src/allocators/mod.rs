//! The [`ChunkMalloc`] allocator.

pub mod chunk_malloc;

pub use chunk_malloc::ChunkMalloc;
