//! rtipc: lock-free IPC structures over POSIX shared memory.
//!
//! A named shared-memory segment becomes a self-describing container of
//! data structures usable concurrently by unrelated processes: a discovery
//! table at offset 0 maps names to bump-allocated regions, and typed views
//! (flat arrays, MPMC FIFO queues, LIFO stacks) operate on those regions
//! with atomic protocols. After the initial map there is no kernel
//! mediation and no copying beyond the elements themselves.
//!
//! # Segment layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Table header (16 B: magic, version, count, next_free)    │
//! ├──────────────────────────────────────────────────────────┤
//! │ Table entries (capacity × 40 B: name, offset, size)      │
//! ├──────────────────────────────────────────────────────────┤
//! │ Structure regions, 8-byte aligned, bump-allocated:       │
//! │   each a small header followed by its element buffer     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use rtipc::{Queue, Segment, SegmentOptions, Table};
//!
//! // Producer process.
//! let seg = Segment::create("/sensors", &SegmentOptions::new(1 << 20))?;
//! let table = Table::attach(&seg)?;
//! let queue = Queue::create(&table, "readings", 8, 1024)?;
//! queue.push(&42u64.to_le_bytes())?;
//!
//! // Any other process that knows the names attaches the same way.
//! let seg2 = Segment::open("/sensors")?;
//! let table2 = Table::attach(&seg2)?;
//! let queue2 = Queue::open(&table2, "readings", 8)?;
//! let mut out = [0u8; 8];
//! queue2.pop(&mut out)?;
//! # Ok::<(), rtipc::Error>(())
//! ```
//!
//! Elements are opaque bytes to this crate; cooperating processes agree on
//! their meaning out of band. Cleanup is explicit: dropping a [`Segment`]
//! unmaps, and the OS object lives until [`Segment::unlink`] (or a creator
//! handle configured with [`UnlinkPolicy::OnCreatorDrop`]).

// All header fields are written and read native-endian.
#[cfg(target_endian = "big")]
compile_error!("the on-segment format is little-endian; big-endian hosts are unsupported");

pub mod array;
pub mod error;
mod macros;
mod platform;
pub mod queue;
pub mod segment;
pub mod stack;
#[cfg(feature = "stats")]
pub mod stats;
mod sync;
pub mod table;

pub(crate) mod config {
    //! Build-time tunables resolved by build.rs from `rtipc.toml`.
    include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
}

pub use array::Array;
pub use config::DEFAULT_TABLE_CAPACITY;
pub use error::{Error, Result};
pub use queue::Queue;
pub use segment::{Segment, SegmentOptions, UnlinkPolicy};
pub use stack::Stack;
pub use table::{FORMAT_VERSION, MAGIC, MAX_NAME_LEN, Table, TableEntry};
