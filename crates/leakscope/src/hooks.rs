//! Capabilities the tracker consumes rather than implements: the raw
//! heap, the debugger break, and the diagnostic text stream. Each is a
//! narrow trait with a no-frills default so the core stays host
//! agnostic.

use std::alloc::{GlobalAlloc, Layout, System};

use crate::site::CallSite;

/// The real heap the tracker wraps.
///
/// The tracker treats returned pointers as opaque keys and never
/// inspects the memory behind them.
pub trait RawAllocator: Send + Sync {
    /// Allocates `layout` bytes. The call-site is passed through so
    /// debug heaps that tag allocations with source locations can use
    /// it; implementations are free to ignore it.
    ///
    /// # Safety
    ///
    /// Same contract as [`GlobalAlloc::alloc`]: `layout` must have
    /// non-zero size.
    unsafe fn alloc(&self, layout: Layout, site: CallSite) -> *mut u8;

    /// Frees an allocation made by this allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`RawAllocator::alloc`] on
    /// this allocator with the same `layout`, and not freed since.
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout);
}

/// Default raw allocator: the platform heap via [`System`].
pub struct SystemRaw;

impl RawAllocator for SystemRaw {
    unsafe fn alloc(&self, layout: Layout, _site: CallSite) -> *mut u8 {
        // SAFETY: caller upholds the GlobalAlloc contract.
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: ptr/layout come from a matching alloc on System.
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Debugger-break capability, invoked when an allocation matches a
/// caller-supplied break target.
///
/// Implementations must never panic or abort; on hosts without an
/// attached debugger the right behavior is to do nothing.
pub trait DebugBreak: Send + Sync {
    fn trigger(&self);
}

/// Default break capability: does nothing.
pub struct NoBreak;

impl DebugBreak for NoBreak {
    fn trigger(&self) {}
}

/// Diagnostic text stream. Report rows and bookkeeping anomalies go
/// through here, one line at a time; delivery is best effort and
/// failures are never propagated.
pub trait OutputSink: Send + Sync {
    fn emit_line(&self, line: &str);
}

/// Default sink: standard error.
pub struct StderrSink;

impl OutputSink for StderrSink {
    fn emit_line(&self, line: &str) {
        eprintln!("{line}");
    }
}

/// Sink writing to standard output, for reports meant to be consumed
/// by scripts or tests.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Sink routing tracker output through the `log` facade, so reports
/// and anomalies land wherever the host already sends its logs.
pub struct LogSink;

impl OutputSink for LogSink {
    fn emit_line(&self, line: &str) {
        log::info!(target: "leakscope", "{line}");
    }
}
