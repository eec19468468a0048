use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::growers::ArenaGrower;

use super::*;

#[repr(align(64))]
struct AlignedHeap<const N: usize>([u8; N]);

/// Builds an allocator over `buf`. The buffer must outlive the allocator and
/// everything allocated through it.
unsafe fn allocator_over<const N: usize>(buf: &mut AlignedHeap<N>) -> ChunkMalloc<ArenaGrower> {
    let grower = ArenaGrower::new(buf.0.as_mut_ptr(), N);
    ChunkMalloc::with_grower(grower)
}

/// A log sink the test can read back after handing it to the allocator.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl SharedSink {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_1() {
    // A single allocation carves exactly one in-use block out of one chunk.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p = allocator.allocate(100).unwrap();
    let report = allocator.report();

    assert_eq!(report.blocks.len(), 1);
    let block = &report.blocks[0];
    assert!(!block.is_free);
    assert_eq!(block.size, 100);
    assert_eq!(block.capacity, CHUNK_SIZE - HEADER_SIZE);
    assert_eq!(block.data, p.as_ptr() as *const u8);
    assert_eq!(block.header, report.lower);
    assert_eq!(block.data as usize, block.header as usize + HEADER_SIZE);
    assert_eq!(report.upper as usize, report.lower as usize + CHUNK_SIZE);
}

#[test]
fn test_2() {
    // Degenerate requests change nothing.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    assert!(allocator.allocate(0).is_none());
    assert!(allocator.zero_allocate(0, 8).is_none());
    assert!(allocator.zero_allocate(8, 0).is_none());
    assert!(allocator.reallocate(core::ptr::null_mut(), 0).is_none());

    let report = allocator.report();
    assert!(report.blocks.is_empty());
    assert!(report.lower.is_null());
    assert!(report.upper.is_null());
}

#[test]
fn test_3() {
    // The growth is the smallest chunk multiple strictly greater than
    // request + header.
    for (request, expected_capacity) in [
        (1, CHUNK_SIZE - HEADER_SIZE),
        (100, CHUNK_SIZE - HEADER_SIZE),
        (CHUNK_SIZE - HEADER_SIZE - 1, CHUNK_SIZE - HEADER_SIZE),
        (CHUNK_SIZE - HEADER_SIZE, 2 * CHUNK_SIZE - HEADER_SIZE),
        (3 * CHUNK_SIZE, 4 * CHUNK_SIZE - HEADER_SIZE),
    ] {
        let mut buf = AlignedHeap([0_u8; 16 * 1024]);
        let mut allocator = unsafe { allocator_over(&mut buf) };

        allocator.allocate(request).unwrap();
        let report = allocator.report();
        assert_eq!(report.blocks[0].capacity, expected_capacity, "request {request}");
        assert_eq!(report.blocks[0].size, request);
    }
}

#[test]
fn test_4() {
    // Blocks are appended in address order and sit back to back on the heap.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    allocator.allocate(10).unwrap();
    allocator.allocate(20).unwrap();
    allocator.allocate(30).unwrap();

    let report = allocator.report();
    assert_eq!(report.blocks.len(), 3);
    for pair in report.blocks.windows(2) {
        assert_eq!(
            pair[1].header as usize,
            pair[0].header as usize + pair[0].span()
        );
        assert_eq!(pair[0].next, pair[1].header);
        assert_eq!(pair[1].prev, pair[0].header);
    }
    assert!(report.blocks[0].prev.is_null());
    assert!(report.blocks[2].next.is_null());
}

#[test]
fn test_5() {
    // Freeing two adjacent blocks merges them, in either order.
    for first_then_second in [true, false] {
        let mut buf = AlignedHeap([0_u8; 16 * 1024]);
        let mut allocator = unsafe { allocator_over(&mut buf) };

        let p1 = allocator.allocate(100).unwrap().as_ptr();
        let p2 = allocator.allocate(200).unwrap().as_ptr();
        let caps: Vec<usize> = allocator.report().blocks.iter().map(|b| b.capacity).collect();

        if first_then_second {
            allocator.free(p1);
            allocator.free(p2);
        } else {
            allocator.free(p2);
            allocator.free(p1);
        }

        let report = allocator.report();
        assert_eq!(report.blocks.len(), 1);
        let merged = &report.blocks[0];
        assert!(merged.is_free);
        assert_eq!(merged.size, 0);
        assert_eq!(merged.capacity, caps[0] + caps[1] + HEADER_SIZE);
        assert_eq!(merged.header, report.lower);
    }
}

#[test]
fn test_6() {
    // Coalescing is order-independent: any free order of three consecutive
    // blocks converges to a single merged block.
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in orders {
        let mut buf = AlignedHeap([0_u8; 16 * 1024]);
        let mut allocator = unsafe { allocator_over(&mut buf) };

        let ptrs = [
            allocator.allocate(100).unwrap().as_ptr(),
            allocator.allocate(200).unwrap().as_ptr(),
            allocator.allocate(300).unwrap().as_ptr(),
        ];
        let total_capacity: usize = allocator.report().blocks.iter().map(|b| b.capacity).sum();

        for &i in &order {
            allocator.free(ptrs[i]);
        }

        let report = allocator.report();
        assert_eq!(report.blocks.len(), 1, "order {order:?}");
        let merged = &report.blocks[0];
        assert!(merged.is_free);
        assert_eq!(merged.capacity, total_capacity + 2 * HEADER_SIZE);
        assert_eq!(merged.span(), report.upper as usize - report.lower as usize);
    }
}

#[test]
fn test_7() {
    // Freeing a null, foreign, or already freed address is a no-op.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    let p2 = allocator.allocate(200).unwrap().as_ptr();
    allocator.free(p1);
    let before = allocator.report();

    allocator.free(core::ptr::null_mut());
    assert_eq!(allocator.report(), before);

    let mut foreign = 0_u8;
    allocator.free(&mut foreign as *mut u8);
    assert_eq!(allocator.report(), before);

    // An interior pointer is not a block's data start.
    allocator.free(unsafe { p2.add(1) });
    assert_eq!(allocator.report(), before);

    // Double free.
    allocator.free(p1);
    assert_eq!(allocator.report(), before);
}

#[test]
fn test_8() {
    // zero_allocate hands out an all-zero region even over recycled memory.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    buf.0.fill(0xAA);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let count = 16;
    let elem_size = 8;
    let p = allocator.zero_allocate(count, elem_size).unwrap().as_ptr();
    for i in 0..count * elem_size {
        assert_eq!(unsafe { p.add(i).read() }, 0);
    }

    let report = allocator.report();
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].size, count * elem_size);
}

#[test]
fn test_9() {
    // An overflowing element count is rejected before the heap is touched.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    assert!(allocator.zero_allocate(usize::MAX, 2).is_none());
    assert!(allocator.zero_allocate(2, usize::MAX).is_none());
    assert!(allocator.report().blocks.is_empty());
}

#[test]
fn test_10() {
    // Growing reallocation carries the old bytes and frees the old block.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let old_size = 64;
    let p1 = allocator.allocate(old_size).unwrap().as_ptr();
    for i in 0..old_size {
        unsafe { p1.add(i).write(i as u8) };
    }

    let p2 = allocator.reallocate(p1, 4 * old_size).unwrap().as_ptr();
    assert_ne!(p1, p2);
    for i in 0..old_size {
        assert_eq!(unsafe { p2.add(i).read() }, i as u8);
    }

    let report = allocator.report();
    assert_eq!(report.blocks.len(), 2);
    assert!(report.blocks[0].is_free);
    assert_eq!(report.blocks[1].size, 4 * old_size);
    assert_eq!(report.blocks[1].data, p2 as *const u8);
}

#[test]
fn test_11() {
    // Shrinking reallocation copies only the requested prefix.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    for i in 0..100 {
        unsafe { p1.add(i).write(i as u8) };
    }

    let p2 = allocator.reallocate(p1, 10).unwrap().as_ptr();
    for i in 0..10 {
        assert_eq!(unsafe { p2.add(i).read() }, i as u8);
    }
    assert_eq!(allocator.report().blocks[1].size, 10);
}

#[test]
fn test_12() {
    // Reallocating from null is a plain allocation of exactly `size` bytes.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p = allocator.reallocate(core::ptr::null_mut(), 100).unwrap();
    let report = allocator.report();
    assert_eq!(report.blocks.len(), 1);
    assert_eq!(report.blocks[0].size, 100);
    assert_eq!(report.blocks[0].capacity, CHUNK_SIZE - HEADER_SIZE);
    assert_eq!(report.blocks[0].data, p.as_ptr() as *const u8);
}

#[test]
fn test_13() {
    // Reallocating an unknown or already freed address is a no-op.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    let before = allocator.report();

    let mut foreign = 0_u8;
    assert!(allocator.reallocate(&mut foreign as *mut u8, 50).is_none());
    assert_eq!(allocator.report(), before);

    allocator.free(p1);
    let freed = allocator.report();
    assert!(allocator.reallocate(p1, 50).is_none());
    assert_eq!(allocator.report(), freed);
}

#[test]
fn test_14() {
    // A failed reallocation leaves the old block valid and unfreed.
    let mut buf = AlignedHeap([0_u8; CHUNK_SIZE + 64]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    unsafe { p1.write(42) };

    assert!(allocator.reallocate(p1, 2 * CHUNK_SIZE).is_none());

    let report = allocator.report();
    assert_eq!(report.blocks.len(), 1);
    assert!(!report.blocks[0].is_free);
    assert_eq!(report.blocks[0].size, 100);
    assert_eq!(unsafe { p1.read() }, 42);
}

#[test]
fn test_15() {
    // A failed allocation must not leave a partially linked block behind.
    let mut buf = AlignedHeap([0_u8; CHUNK_SIZE + 64]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    allocator.allocate(100).unwrap();
    let before = allocator.report();

    assert!(allocator.allocate(5000).is_none());
    assert_eq!(allocator.report(), before);
}

#[test]
fn test_16() {
    // Reset is a true return to the initial state: the next allocation looks
    // exactly like the first one ever made.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    allocator.allocate(100).unwrap();
    let pristine = allocator.report();
    allocator.allocate(200).unwrap();
    let p = allocator.allocate(300).unwrap().as_ptr();
    allocator.free(p);

    allocator.reset();
    let report = allocator.report();
    assert!(report.blocks.is_empty());
    assert!(report.lower.is_null());
    assert!(report.upper.is_null());

    allocator.allocate(100).unwrap();
    assert_eq!(allocator.report(), pristine);
}

#[test]
fn test_17() {
    // No reuse of freed space: a new allocation always grows the heap, even
    // when a freed block in the middle could hold it.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    allocator.allocate(200).unwrap();
    allocator.free(p1);

    let p3 = allocator.allocate(50).unwrap().as_ptr();
    let report = allocator.report();
    assert_eq!(report.blocks.len(), 3);
    assert!(report.blocks[0].is_free);
    assert!(!report.blocks[2].is_free);
    assert_eq!(report.blocks[2].data, p3 as *const u8);
    assert!(p3 > p1);
    assert_eq!(report.upper as usize, report.lower as usize + 3 * CHUNK_SIZE);
}

#[test]
fn test_18() {
    // The dump and the verbose free trail land in the configured sink.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let sink = SharedSink::default();
    allocator.set_log_sink(Box::new(sink.clone()));
    allocator.set_verbose(true);

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    allocator.allocate(200).unwrap();
    allocator.free(p1);
    allocator.free(p1);
    allocator.free(core::ptr::null_mut());
    allocator.dump().unwrap();

    let text = sink.text();
    assert!(text.contains(&format!("freed {p1:p}")));
    assert!(text.contains(&format!("free of {p1:p} ignored: block already free")));
    assert!(text.contains("ignored: null address"));
    assert!(text.contains("Heap map"));
    assert!(text.contains("free  *"));
    assert!(text.contains("in use"));
    assert!(text.contains("Used blocks:    1  Free blocks:    1"));
}

#[test]
fn test_19() {
    // Verbose mode off keeps the sink quiet outside of explicit dumps.
    let mut buf = AlignedHeap([0_u8; 16 * 1024]);
    let mut allocator = unsafe { allocator_over(&mut buf) };

    let sink = SharedSink::default();
    allocator.set_log_sink(Box::new(sink.clone()));

    let p1 = allocator.allocate(100).unwrap().as_ptr();
    allocator.free(p1);
    allocator.free(core::ptr::null_mut());

    assert!(sink.text().is_empty());
}
