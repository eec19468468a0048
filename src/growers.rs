//! [`Grower`] trait and structures that implement it.
//!
//! The [`Grower`] trait is the allocator's single point of contact with the
//! operating system: everything in [`crate::allocators`] sits on top of the
//! "extend the heap, return the old boundary" primitive it models.

use super::header::HEADER_ALIGN;
use super::util::{checked_add, find_aligned};

use core::ptr::NonNull;

use libc::{brk, sbrk};

/// A trait for types that act as a contiguous heap region growable at one end.
///
/// # Safety
/// * copying, cloning, or moving the grower must not invalidate any pointers to
///   the region managed by the grower. This generally means that growers should
///   not own but reference their underlying memory.
/// * `grow` must return the previous end of the region and extend it by exactly
///   the requested amount, or fail without moving the boundary.
pub unsafe trait Grower {
    /// Grows the underlying region by exactly `size` bytes.
    /// Returns the old end of the region or `Err(())` if the growth failed.
    ///
    /// # Safety
    /// Implementors should ensure that `grow(0)` does not grow the region and
    /// only reports its current end.
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()>;

    /// Moves the end of the region back by `size` bytes, handing the memory
    /// back to its source. Used only for full heap teardown.
    ///
    /// # Safety
    /// Callers must ensure that `size` does not exceed the total amount grown
    /// and that nothing inside the released span is accessed afterwards.
    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()>;
}

/// A grower that internally uses [`libc::brk`] to operate
/// on the end of the process's data segment.
///
/// On failure `brk` leaves `errno` set, so out-of-memory conditions remain
/// observable to the caller through the usual platform channel.
#[derive(Debug)]
pub struct BrkGrower {
    heap_end: Option<NonNull<u8>>,
}

impl BrkGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        BrkGrower { heap_end: None }
    }

    /// Tries to initialize the grower by calling `sbrk(0)` to get the initial heap end.
    /// Returns `Err(())` if the grower could not be initialized.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that the grower
    /// wasn't previously initialized and that there aren't any other
    /// objects (growers or not) managing the program brake.
    unsafe fn try_init(&mut self) -> Result<(), ()> {
        debug_assert!(self.heap_end.is_none());
        let heap_end = unsafe { sbrk(0) };
        debug_assert_ne!(heap_end as isize, -1, "Calling sbrk(0) should never fail.");
        debug_assert_ne!(heap_end as usize, 0);
        unsafe {
            self.heap_end = Some(NonNull::new_unchecked(
                find_aligned(heap_end.cast(), HEADER_ALIGN).ok_or(())? as *mut u8,
            ))
        };
        Ok(())
    }
}

impl Default for BrkGrower {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Grower for BrkGrower {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        if self.heap_end.is_none() {
            unsafe { self.try_init()? };
        }
        let heap_end = self.heap_end.unwrap();
        if size == 0 {
            return Ok(heap_end);
        }
        let new_heap_end: *mut u8 = checked_add(heap_end.as_ptr(), size).ok_or(())? as _;
        if unsafe { brk(new_heap_end.cast()) == -1 } {
            return Err(());
        }
        self.heap_end = unsafe { Some(NonNull::new_unchecked(new_heap_end)) };
        Ok(heap_end)
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        let Some(heap_end) = self.heap_end else {
            return Err(());
        };
        debug_assert!(size <= heap_end.as_ptr() as usize);
        let new_heap_end = unsafe { heap_end.as_ptr().sub(size) };
        if unsafe { brk(new_heap_end.cast()) == -1 } {
            return Err(());
        }
        self.heap_end = unsafe { Some(NonNull::new_unchecked(new_heap_end)) };
        Ok(())
    }
}

/// A grower that operates on a fixed caller-provided arena.
///
/// The start of the buffer is aligned up to [`HEADER_ALIGN`] so headers can be
/// written at any boundary the allocator derives from it. Growth past the end
/// of the buffer fails like a real out-of-memory condition, which makes this
/// grower the deterministic stand-in for [`BrkGrower`] in tests.
#[derive(Debug)]
pub struct ArenaGrower {
    heap_end: *mut u8,
    arena_end: *mut u8,
}

impl ArenaGrower {
    /// Creates a new arena that operates on the provided buffer.
    ///
    /// # Safety
    /// Callers must guarantee that `buf` points to `size` writable bytes that
    /// outlive the grower and everything allocated through it.
    pub unsafe fn new(buf: *mut u8, size: usize) -> Self {
        let arena_end = buf.add(size);
        let heap_end = match find_aligned(buf, HEADER_ALIGN) {
            Some(p) if (p as usize) <= arena_end as usize => p as *mut u8,
            _ => arena_end,
        };
        ArenaGrower {
            heap_end,
            arena_end,
        }
    }
}

unsafe impl Grower for ArenaGrower {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let heap_end = self.heap_end;
        if size == 0 {
            return Ok(NonNull::new(heap_end).ok_or(())?);
        }
        let new_heap_end = checked_add(heap_end, size).ok_or(())? as *mut u8;
        if new_heap_end > self.arena_end {
            return Err(());
        }
        self.heap_end = new_heap_end;
        NonNull::new(heap_end).ok_or(())
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        debug_assert!(size <= self.heap_end as usize);
        self.heap_end = self.heap_end.sub(size);
        Ok(())
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        (*self).grow(size)
    }

    unsafe fn shrink(&mut self, size: usize) -> Result<(), ()> {
        (*self).shrink(size)
    }
}
