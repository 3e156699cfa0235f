//! Deliberately leaks one of five allocations made at a single site,
//! so the shutdown dump shows exactly one record with ID 3.

use std::alloc::Layout;

use leakscope::{site, StdoutSink, TrackerBuilder};

fn main() {
    let guard = TrackerBuilder::new("leaky")
        .sink(Box::new(StdoutSink))
        .build_guarded();
    let tracker = guard.tracker();

    let layout = Layout::array::<u64>(16).unwrap();
    let mut blocks = Vec::new();
    for _ in 0..5 {
        blocks.push(unsafe { tracker.allocate(layout, site!()) });
    }

    for (i, ptr) in blocks.into_iter().enumerate() {
        // Keep the third allocation (sequence number 3) alive.
        if i != 2 {
            unsafe { tracker.deallocate(ptr, layout) };
        }
    }

    // Dumped on guard drop.
}
