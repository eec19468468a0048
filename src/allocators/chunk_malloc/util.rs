//! Utility functions specific to the [`ChunkMalloc`](super::ChunkMalloc) allocator.

use super::CHUNK_SIZE;
use crate::header::HEADER_SIZE;

/// Returns the amount of heap growth needed for a user request of `request`
/// bytes: the smallest multiple of [`CHUNK_SIZE`] strictly greater than
/// `request + HEADER_SIZE`, so the granted region always fits a header and
/// at least the requested data bytes.
///
/// Returns `None` if the computation overflows a `usize`.
#[inline]
pub fn growth_size(request: usize) -> Option<usize> {
    let total = request.checked_add(HEADER_SIZE)?;
    (total / CHUNK_SIZE).checked_add(1)?.checked_mul(CHUNK_SIZE)
}
