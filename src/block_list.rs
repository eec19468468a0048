//! Defines the [`BlockList`] struct and the coalescing pass that runs over it.

use core::ptr::{null_mut, NonNull};

use tracing::debug;

use super::header::{data_ptr, Header, HEADER_SIZE};

/// The address-ordered doubly linked sequence of all blocks carved out of the heap.
///
/// Blocks are appended in allocation order, which equals address order since
/// the heap only grows upward and blocks are never relocated. A block leaves
/// the list only by being absorbed into a neighbor during coalescing.
///
/// The cached tail pointer makes [`append`](BlockList::append) O(1); dropping
/// it and scanning from the head would be observably identical.
#[derive(Debug)]
#[repr(C)]
pub struct BlockList {
    head: *mut Header,
    tail: *mut Header,
}

impl BlockList {
    /// Creates an empty BlockList.
    #[inline]
    pub const fn new() -> Self {
        BlockList {
            head: null_mut(),
            tail: null_mut(),
        }
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[inline]
    pub fn head(&self) -> Option<NonNull<Header>> {
        NonNull::new(self.head)
    }

    /// Links `block` in at the tail of the list.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `block` points to a valid
    /// header that is not already part of the list.
    pub unsafe fn append(&mut self, block: *mut Header) {
        debug_assert_eq!(self.head.is_null(), self.tail.is_null());

        (*block).prev = self.tail;
        (*block).next = null_mut();
        match self.tail.is_null() {
            true => self.head = block,
            false => (*self.tail).next = block,
        }
        self.tail = block;
    }

    /// Removes `block` from the list by relinking its neighbors.
    /// Used only as a subroutine of merging.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `block` is part of the list.
    pub unsafe fn unlink(&mut self, block: *mut Header) {
        let prev = (*block).prev;
        let next = (*block).next;
        match prev.is_null() {
            true => self.head = next,
            false => (*prev).next = next,
        }
        match next.is_null() {
            true => self.tail = prev,
            false => (*next).prev = prev,
        }
    }

    /// Locates the block whose data region starts at `ptr`.
    ///
    /// The match is a plain equality of the block's data-start address with
    /// `ptr`, so addresses that were never handed out by the allocator come
    /// back as `None` without any unowned memory being read.
    /// This operation has a time complexity of *O*(n).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that every node in the list
    /// is a valid header.
    pub unsafe fn find_by_data(&self, ptr: *const u8) -> Option<NonNull<Header>> {
        let mut block = self.head;
        while !block.is_null() {
            if data_ptr(block) as *const u8 == ptr {
                return NonNull::new(block);
            }
            block = (*block).next;
        }
        None
    }

    /// Merges every run of adjacent free blocks into a single free block.
    ///
    /// A single left-to-right pass suffices: at each block a free predecessor
    /// is merged into first, then a free successor, so the "no two adjacent
    /// free blocks" invariant is restored incrementally as the walk advances.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that every node in the list
    /// is a valid header.
    pub unsafe fn coalesce(&mut self) {
        let mut block = self.head;
        while !block.is_null() {
            if (*block).is_free && !(*block).prev.is_null() && (*(*block).prev).is_free {
                block = self.merge((*block).prev, block);
            }
            if (*block).is_free && !(*block).next.is_null() && (*(*block).next).is_free {
                block = self.merge(block, (*block).next);
            }
            block = (*block).next;
        }
        debug_assert!(self.no_adjacent_free());
    }

    /// Absorbs `absorbed` into `survivor`, its list predecessor.
    /// The absorbed header's storage becomes usable capacity of the survivor,
    /// hence the extra `HEADER_SIZE`.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that both blocks are free list
    /// members and that `absorbed` directly follows `survivor`.
    unsafe fn merge(&mut self, survivor: *mut Header, absorbed: *mut Header) -> *mut Header {
        debug_assert!((*survivor).is_free && (*absorbed).is_free);
        debug_assert_eq!((*survivor).next, absorbed);
        debug_assert_eq!((*survivor).size, 0);
        debug_assert_eq!((*absorbed).size, 0);

        (*survivor).capacity += (*absorbed).capacity + HEADER_SIZE;
        self.unlink(absorbed);
        debug!(?survivor, ?absorbed, "Merged adjacent free blocks.");
        survivor
    }

    /// Drops every block from the list. The blocks themselves live in heap
    /// memory that the caller is about to release, nothing is deallocated here.
    #[inline]
    pub fn clear(&mut self) {
        self.head = null_mut();
        self.tail = null_mut();
    }

    /// Checks the coalescer's postcondition.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that every node in the list
    /// is a valid header.
    unsafe fn no_adjacent_free(&self) -> bool {
        let mut block = self.head;
        while !block.is_null() {
            let next = (*block).next;
            if !next.is_null() && (*block).is_free && (*next).is_free {
                return false;
            }
            block = next;
        }
        true
    }
}
