//! The tracking engine: ties the site registry and the active table
//! together behind one re-entrant lock, wraps the raw allocator, and
//! owns the shutdown flag.

use std::alloc::Layout;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::hooks::{DebugBreak, NoBreak, OutputSink, RawAllocator, StderrSink, SystemRaw};
use crate::report::{reporter_for, Format, LeakReport, Reporter};
use crate::site::{CallSite, SiteRegistry};
use crate::table::{ActiveRecord, ActiveTable};

#[derive(Default)]
struct TrackerInner {
    sites: SiteRegistry,
    records: ActiveTable,
}

/// Per-call-site allocation tracker.
///
/// Every allocation routed through a `Tracker` is attributed to its
/// originating [`CallSite`], assigned that site's next sequence
/// number, and remembered until the matching [`deallocate`]. Whatever
/// is still remembered at [`dump`] time is a leak candidate, reported
/// with enough detail to rerun the program and break on the exact
/// allocation via [`allocate_with_break`].
///
/// The tracker is an explicit context object: build one with
/// [`TrackerBuilder`], share it (`Arc`) with whatever boundary layer
/// intercepts allocations, and tear it down once via [`shutdown`] --
/// or let a [`TrackerGuard`] dump and shut down on drop.
///
/// Bookkeeping never changes the outcome of the underlying allocation:
/// anomalies are reported through the configured [`OutputSink`] and
/// swallowed, and after shutdown every call degenerates to the raw
/// allocator.
///
/// [`deallocate`]: Tracker::deallocate
/// [`dump`]: Tracker::dump
/// [`allocate_with_break`]: Tracker::allocate_with_break
/// [`shutdown`]: Tracker::shutdown
pub struct Tracker {
    name: &'static str,
    tracking: bool,
    shut_down: AtomicBool,
    // One mutual-exclusion domain for registry + table. Re-entrant so
    // a sink or breaker that itself allocates through this tracker on
    // the same thread cannot deadlock; RefCell borrows are scoped to
    // single mutations so such a re-entrant call finds them released.
    state: ReentrantMutex<RefCell<TrackerInner>>,
    raw: Box<dyn RawAllocator>,
    breaker: Box<dyn DebugBreak>,
    sink: Box<dyn OutputSink>,
    reporter: Box<dyn Reporter>,
}

impl Tracker {
    pub fn builder(name: &'static str) -> TrackerBuilder {
        TrackerBuilder::new(name)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Allocates `layout` bytes attributed to `site`.
    ///
    /// # Safety
    ///
    /// Same contract as [`std::alloc::GlobalAlloc::alloc`]: `layout`
    /// must have non-zero size.
    pub unsafe fn allocate(&self, layout: Layout, site: CallSite) -> *mut u8 {
        // SAFETY: forwarded contract.
        unsafe { self.allocate_with_break(layout, site, None) }
    }

    /// Like [`allocate`](Tracker::allocate), but triggers the debugger
    /// break capability if this call turns out to be the `break_at`-th
    /// allocation at `site`.
    ///
    /// `None` (and, for symmetry with counters that start at 1,
    /// `Some(0)`) never triggers. The break fires after the sequence
    /// number for this call is assigned and before the record lands in
    /// the table, so the guilty allocation is uniquely identifiable
    /// from the debugger.
    ///
    /// # Safety
    ///
    /// Same contract as [`std::alloc::GlobalAlloc::alloc`].
    pub unsafe fn allocate_with_break(
        &self,
        layout: Layout,
        site: CallSite,
        break_at: Option<u64>,
    ) -> *mut u8 {
        if self.bypass() {
            // SAFETY: forwarded contract.
            return unsafe { self.raw.alloc(layout, site) };
        }

        let state = self.state.lock();

        let key = site.key();
        let sequence = state.borrow_mut().sites.increment(key, site);
        match break_at {
            Some(target) if target == sequence => self.breaker.trigger(),
            _ => {}
        }

        // SAFETY: forwarded contract.
        let ptr = unsafe { self.raw.alloc(layout, site) };
        if !ptr.is_null() {
            let displaced = state.borrow_mut().records.insert(ActiveRecord {
                addr: ptr as usize,
                site: key,
                sequence,
            });
            if let Some(old) = displaced {
                self.sink.emit_line(&format!(
                    "leakscope: raw allocator returned address 0x{:x} still tracked as live \
                     (ID: {}); replacing the record",
                    old.addr, old.sequence
                ));
            }
        }
        ptr
    }

    /// Frees an allocation made by [`allocate`](Tracker::allocate) and
    /// forgets its record.
    ///
    /// Addresses with no record are freed without complaint: the
    /// memory may predate tracking, or this may be a double free that
    /// already lost its record. Either way the raw free proceeds.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by an `allocate` call on this
    /// tracker with the same `layout`, and not freed since.
    pub unsafe fn deallocate(&self, ptr: *mut u8, layout: Layout) {
        if !self.bypass() {
            let state = self.state.lock();
            state.borrow_mut().records.remove(ptr as usize);
        }
        // SAFETY: forwarded contract.
        unsafe { self.raw.dealloc(ptr, layout) };
    }

    /// Emits a report of every allocation still outstanding.
    ///
    /// Read-only: the table is left untouched and `dump` may be called
    /// repeatedly, at any point in the run. After [`shutdown`] this is
    /// a no-op.
    ///
    /// [`shutdown`]: Tracker::shutdown
    pub fn dump(&self) {
        if self.is_shut_down() {
            return;
        }
        // The lock is held for the whole dump so the report reflects a
        // single point in time; the short borrow below keeps same-
        // thread re-entrant allocations (e.g. from the sink) legal.
        let state = self.state.lock();
        let report = {
            let inner = state.borrow();
            LeakReport::build(self.name, &inner.records.snapshot(), &inner.sites)
        };
        if let Err(e) = self.reporter.report(&report, self.sink.as_ref()) {
            eprintln!("leakscope: failed to emit leak report: {e}");
        }
    }

    /// Captures the current outstanding set without emitting anything.
    pub fn report(&self) -> LeakReport {
        let state = self.state.lock();
        let inner = state.borrow();
        LeakReport::build(self.name, &inner.records.snapshot(), &inner.sites)
    }

    /// Irreversibly stops bookkeeping.
    ///
    /// Subsequent allocate/deallocate calls still reach the raw
    /// allocator, so the host program's memory behavior is unaffected;
    /// only the registry, the table, and [`dump`](Tracker::dump) go
    /// quiet. Safe to call from any thread, any number of times.
    pub fn shutdown(&self) {
        self.shut_down.swap(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of allocations currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.state.lock().borrow().records.len()
    }

    /// Number of distinct call-sites seen so far.
    pub fn site_count(&self) -> usize {
        self.state.lock().borrow().sites.len()
    }

    fn bypass(&self) -> bool {
        !self.tracking || self.is_shut_down()
    }
}

enum ReporterConfig {
    Format(Format),
    Custom(Box<dyn Reporter>),
}

/// Builder for a [`Tracker`].
///
/// ```
/// use leakscope::{Format, TrackerBuilder};
///
/// let tracker = TrackerBuilder::new("main")
///     .format(Format::JsonPretty)
///     .build();
/// assert_eq!(tracker.name(), "main");
/// ```
pub struct TrackerBuilder {
    name: &'static str,
    tracking: bool,
    raw: Box<dyn RawAllocator>,
    breaker: Box<dyn DebugBreak>,
    sink: Box<dyn OutputSink>,
    reporter: ReporterConfig,
}

impl TrackerBuilder {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tracking: true,
            raw: Box::new(SystemRaw),
            breaker: Box::new(NoBreak),
            sink: Box::new(StderrSink),
            reporter: ReporterConfig::Format(Format::Table),
        }
    }

    /// Turns bookkeeping off entirely; every call goes straight to the
    /// raw allocator. The runtime equivalent of compiling the tracker
    /// out.
    pub fn tracking(mut self, enabled: bool) -> Self {
        self.tracking = enabled;
        self
    }

    /// Replaces the raw heap the tracker delegates to.
    pub fn raw_allocator(mut self, raw: Box<dyn RawAllocator>) -> Self {
        self.raw = raw;
        self
    }

    /// Replaces the debugger-break capability.
    pub fn debug_break(mut self, breaker: Box<dyn DebugBreak>) -> Self {
        self.breaker = breaker;
        self
    }

    /// Replaces the diagnostic output sink.
    pub fn sink(mut self, sink: Box<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the report format. Overridden by a custom
    /// [`reporter`](TrackerBuilder::reporter).
    pub fn format(mut self, format: Format) -> Self {
        self.reporter = ReporterConfig::Format(format);
        self
    }

    /// Sets a custom reporter for leak dumps.
    pub fn reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = ReporterConfig::Custom(reporter);
        self
    }

    pub fn build(self) -> Tracker {
        let reporter = match self.reporter {
            ReporterConfig::Format(format) => reporter_for(format),
            ReporterConfig::Custom(reporter) => reporter,
        };
        Tracker {
            name: self.name,
            tracking: self.tracking,
            shut_down: AtomicBool::new(false),
            state: ReentrantMutex::new(RefCell::new(TrackerInner::default())),
            raw: self.raw,
            breaker: self.breaker,
            sink: self.sink,
            reporter,
        }
    }

    /// Builds the tracker and wraps it in a [`TrackerGuard`] that
    /// dumps outstanding allocations and shuts the tracker down when
    /// dropped.
    pub fn build_guarded(self) -> TrackerGuard {
        TrackerGuard {
            tracker: Arc::new(self.build()),
        }
    }
}

/// Owns a [`Tracker`] for the duration of a scope.
///
/// On drop, dumps every still-outstanding allocation and then shuts
/// the tracker down, so allocation boundaries holding their own `Arc`
/// clones keep working (untracked) through whatever teardown runs
/// afterwards.
pub struct TrackerGuard {
    tracker: Arc<Tracker>,
}

impl TrackerGuard {
    /// A shared handle to the guarded tracker.
    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.dump();
        self.tracker.shutdown();
    }
}
