//! Operation statistics counters.
//!
//! All counters use `Relaxed` ordering: they are observational only and not
//! used as synchronization primitives. The table lock and the structures'
//! seq/version protocols provide the ordering guarantees for correctness;
//! these counters are purely for monitoring. They are also process-local,
//! so two processes sharing a segment each see their own operation counts.
//!
//! # Usage
//!
//! ```ignore
//! let snap = rtipc::stats::snapshot();
//! println!("pushes: {}", snap.queue_pushes);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! each atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Segment lifecycle ----
    /// Segments created by this process.
    pub segment_creates: AtomicU64,
    /// Segments opened by this process.
    pub segment_opens: AtomicU64,
    /// Successful unlink calls (NotFound no-ops excluded).
    pub segment_unlinks: AtomicU64,
    /// Total bytes mapped by create and open.
    pub segment_bytes_mapped: AtomicU64,

    // ---- Table ----
    /// Successful entry additions.
    pub table_adds: AtomicU64,
    /// Successful name erasures.
    pub table_removes: AtomicU64,
    /// Bytes handed out by the bump allocator (after alignment).
    pub table_bytes_allocated: AtomicU64,
    /// Structure views constructed via create (arrays, queues, stacks).
    pub structures_created: AtomicU64,

    // ---- Queue ----
    /// Successful pushes.
    pub queue_pushes: AtomicU64,
    /// Successful pops.
    pub queue_pops: AtomicU64,
    /// Pushes that returned Full.
    pub queue_full_returns: AtomicU64,
    /// Pops that returned Empty.
    pub queue_empty_returns: AtomicU64,
    /// head/tail CAS attempts lost to another thread.
    pub queue_contention_retries: AtomicU64,

    // ---- Stack ----
    /// Successful pushes.
    pub stack_pushes: AtomicU64,
    /// Successful pops.
    pub stack_pops: AtomicU64,
    /// Pushes that returned Full.
    pub stack_full_returns: AtomicU64,
    /// Pops that returned Empty.
    pub stack_empty_returns: AtomicU64,
    /// top/version CAS attempts lost to another thread.
    pub stack_contention_retries: AtomicU64,

    // ---- Array ----
    /// Element CAS attempts.
    pub array_cas_attempts: AtomicU64,
    /// Element CAS attempts that observed a different value.
    pub array_cas_failures: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            segment_creates: AtomicU64::new(0),
            segment_opens: AtomicU64::new(0),
            segment_unlinks: AtomicU64::new(0),
            segment_bytes_mapped: AtomicU64::new(0),
            table_adds: AtomicU64::new(0),
            table_removes: AtomicU64::new(0),
            table_bytes_allocated: AtomicU64::new(0),
            structures_created: AtomicU64::new(0),
            queue_pushes: AtomicU64::new(0),
            queue_pops: AtomicU64::new(0),
            queue_full_returns: AtomicU64::new(0),
            queue_empty_returns: AtomicU64::new(0),
            queue_contention_retries: AtomicU64::new(0),
            stack_pushes: AtomicU64::new(0),
            stack_pops: AtomicU64::new(0),
            stack_full_returns: AtomicU64::new(0),
            stack_empty_returns: AtomicU64::new(0),
            stack_contention_retries: AtomicU64::new(0),
            array_cas_attempts: AtomicU64::new(0),
            array_cas_failures: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all operation statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Individual fields are each atomically read, but the snapshot as a whole
/// is not globally consistent: concurrent operations may race between
/// loads. For monitoring purposes this is always sufficient.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub segment_creates: u64,
    pub segment_opens: u64,
    pub segment_unlinks: u64,
    pub segment_bytes_mapped: u64,
    pub table_adds: u64,
    pub table_removes: u64,
    pub table_bytes_allocated: u64,
    pub structures_created: u64,
    pub queue_pushes: u64,
    pub queue_pops: u64,
    pub queue_full_returns: u64,
    pub queue_empty_returns: u64,
    pub queue_contention_retries: u64,
    pub stack_pushes: u64,
    pub stack_pops: u64,
    pub stack_full_returns: u64,
    pub stack_empty_returns: u64,
    pub stack_contention_retries: u64,
    pub array_cas_attempts: u64,
    pub array_cas_failures: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        segment_creates: s.segment_creates.load(Ordering::Relaxed),
        segment_opens: s.segment_opens.load(Ordering::Relaxed),
        segment_unlinks: s.segment_unlinks.load(Ordering::Relaxed),
        segment_bytes_mapped: s.segment_bytes_mapped.load(Ordering::Relaxed),
        table_adds: s.table_adds.load(Ordering::Relaxed),
        table_removes: s.table_removes.load(Ordering::Relaxed),
        table_bytes_allocated: s.table_bytes_allocated.load(Ordering::Relaxed),
        structures_created: s.structures_created.load(Ordering::Relaxed),
        queue_pushes: s.queue_pushes.load(Ordering::Relaxed),
        queue_pops: s.queue_pops.load(Ordering::Relaxed),
        queue_full_returns: s.queue_full_returns.load(Ordering::Relaxed),
        queue_empty_returns: s.queue_empty_returns.load(Ordering::Relaxed),
        queue_contention_retries: s.queue_contention_retries.load(Ordering::Relaxed),
        stack_pushes: s.stack_pushes.load(Ordering::Relaxed),
        stack_pops: s.stack_pops.load(Ordering::Relaxed),
        stack_full_returns: s.stack_full_returns.load(Ordering::Relaxed),
        stack_empty_returns: s.stack_empty_returns.load(Ordering::Relaxed),
        stack_contention_retries: s.stack_contention_retries.load(Ordering::Relaxed),
        array_cas_attempts: s.array_cas_attempts.load(Ordering::Relaxed),
        array_cas_failures: s.array_cas_failures.load(Ordering::Relaxed),
    }
}
