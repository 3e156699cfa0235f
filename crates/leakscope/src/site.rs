//! Call-site identity: where an allocation came from, and how many
//! allocations that place has made so far.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;

/// One allocation call-site: the source location that issued an
/// allocation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Captures the location of the caller.
    ///
    /// ```
    /// let site = leakscope::CallSite::here();
    /// assert!(site.file.ends_with(".rs"));
    /// ```
    #[track_caller]
    pub fn here() -> Self {
        let location = Location::caller();
        Self {
            file: location.file(),
            line: location.line(),
        }
    }

    /// The fingerprint identifying this site in the registry.
    pub fn key(&self) -> SiteKey {
        SiteKey::of(*self)
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.file, self.line)
    }
}

/// Builds a [`CallSite`] for the current file and line.
///
/// Equivalent to [`CallSite::here()`] for callers that prefer the
/// explicit `file!()`/`line!()` spelling inside a larger expression.
#[macro_export]
macro_rules! site {
    () => {
        $crate::CallSite::new(file!(), line!())
    };
}

/// Fingerprint of a call-site: a 32-bit hash of the file-name text
/// with the line number XOR-folded in.
///
/// Distinct (file, line) pairs can collide. When they do, the two
/// sites share one counter and their sequence numbers interleave;
/// individual allocations are still tracked and freed correctly. This
/// is a deliberate approximation kept from the original scheme --
/// widening the key would change the per-site sequence numbers that
/// break-on-count workflows depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SiteKey(u32);

impl SiteKey {
    pub fn of(site: CallSite) -> Self {
        // DefaultHasher with the default keys is deterministic across
        // runs, which keeps fingerprints stable between a leaky run
        // and the break-on-count rerun.
        let mut hasher = DefaultHasher::new();
        site.file.hash(&mut hasher);
        Self(hasher.finish() as u32 ^ site.line)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Per-site bookkeeping: descriptive metadata plus a running count of
/// allocations made from that site.
#[derive(Clone, Debug)]
pub struct SiteCounter {
    // Owned so the registry does not depend on how (or for how long)
    // the boundary layer materializes file-name strings.
    file: String,
    line: u32,
    count: u64,
}

impl SiteCounter {
    fn new(site: CallSite) -> Self {
        Self {
            file: site.file.to_owned(),
            line: site.line,
            count: 0,
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// How many allocations this site has made so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Registry of every call-site seen so far, keyed by fingerprint.
///
/// The registry only grows; counters are never removed or decremented.
/// Its size is bounded by the number of distinct allocation sites in
/// the program, which is static and small.
#[derive(Debug, Default)]
pub struct SiteRegistry {
    counters: HashMap<SiteKey, SiteCounter>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the counter for `key`, creating it on first sight, and
    /// returns the sequence number assigned to this allocation. The
    /// first allocation at a site observes 1.
    ///
    /// The file/line metadata in `site` is recorded when the counter
    /// is created and ignored on every later call, so a fingerprint
    /// collision keeps the metadata of whichever site came first.
    pub fn increment(&mut self, key: SiteKey, site: CallSite) -> u64 {
        let counter = self
            .counters
            .entry(key)
            .or_insert_with(|| SiteCounter::new(site));
        counter.count += 1;
        counter.count
    }

    pub fn get(&self, key: SiteKey) -> Option<&SiteCounter> {
        self.counters.get(&key)
    }

    /// Number of distinct sites registered.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
