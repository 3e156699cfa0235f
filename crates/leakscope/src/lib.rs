//! Per-call-site heap allocation tracking for hunting leaks.
//!
//! `leakscope` wraps a raw heap allocator and attributes every
//! allocation to the source location that requested it. Each site
//! keeps a monotonically increasing counter, so every allocation gets
//! a stable per-site sequence number: a leak report tells you not just
//! *where* a leaked block was allocated but *which* allocation at that
//! site it was, and the same run can then be replayed with a break
//! target to stop a debugger on the exact allocation that leaks.
//!
//! ```
//! use std::alloc::Layout;
//! use leakscope::{CallSite, TrackerBuilder};
//!
//! let guard = TrackerBuilder::new("main").build_guarded();
//! let tracker = guard.tracker();
//!
//! let layout = Layout::from_size_align(64, 8).unwrap();
//! let ptr = unsafe { tracker.allocate(layout, CallSite::here()) };
//! // ... anything not deallocated shows up in the dump on guard drop
//! unsafe { tracker.deallocate(ptr, layout) };
//! ```
//!
//! Tracking is bookkeeping only: it never changes whether or what the
//! underlying allocator returns, and once the tracker is shut down
//! every call passes straight through to the raw heap.

pub mod hooks;
pub mod report;
pub mod site;
pub mod table;
mod tracker;

pub use hooks::{
    DebugBreak, LogSink, NoBreak, OutputSink, RawAllocator, StderrSink, StdoutSink, SystemRaw,
};
pub use report::{
    Format, JsonPrettyReporter, JsonReporter, LeakReport, LeakRow, Reporter, TableReporter,
};
pub use site::{CallSite, SiteCounter, SiteKey, SiteRegistry};
pub use table::{ActiveRecord, ActiveTable};
pub use tracker::{Tracker, TrackerBuilder, TrackerGuard};
