//! Segment lifecycle: a named, kernel-backed shared-memory object mapped
//! into this process's address space.
//!
//! A `Segment` owns exactly one mapping. Dropping the handle unmaps; the
//! underlying OS object lives on until someone calls [`Segment::unlink`]
//! (or the handle was created with [`UnlinkPolicy::OnCreatorDrop`]). The
//! structures in this crate are non-owning views computed from the
//! segment's base pointer; they borrow the `Segment` so a view can never
//! outlive its mapping.

use std::ffi::CString;

use log::debug;

use crate::config;
use crate::error::{Error, Result};
use crate::platform;
use crate::table;
use crate::{stat_add, stat_inc};

/// What happens to the OS object when the creating handle is dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnlinkPolicy {
    /// The object persists until an explicit [`Segment::unlink`].
    #[default]
    Manual,
    /// The creator's `Drop` also unlinks the name. Opened (non-creator)
    /// handles never unlink regardless of policy.
    OnCreatorDrop,
}

/// Creation-time parameters for [`Segment::create`].
#[derive(Clone, Debug)]
pub struct SegmentOptions {
    /// Total byte size of the segment.
    pub capacity: usize,
    /// Number of entry slots in the registry table.
    pub table_capacity: u32,
    /// Cleanup behavior of the creating handle.
    pub unlink_policy: UnlinkPolicy,
}

impl SegmentOptions {
    /// Options with the given capacity and the build-time defaults for
    /// everything else.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            table_capacity: config::DEFAULT_TABLE_CAPACITY,
            unlink_policy: UnlinkPolicy::Manual,
        }
    }

    pub fn table_capacity(mut self, table_capacity: u32) -> Self {
        self.table_capacity = table_capacity;
        self
    }

    pub fn unlink_policy(mut self, policy: UnlinkPolicy) -> Self {
        self.unlink_policy = policy;
        self
    }
}

/// A mapped shared-memory segment.
pub struct Segment {
    base: *mut u8,
    capacity: usize,
    name: CString,
    creator: bool,
    unlink_policy: UnlinkPolicy,
}

// SAFETY: the mapping is shared memory designed for concurrent access from
// many processes; everything mutable inside it is governed by the atomic
// protocols of the table and structure views. The handle's own fields are
// immutable after construction.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Create a new segment, size it, map it, and bootstrap the registry
    /// table at offset 0.
    ///
    /// Fails with [`Error::AlreadyExists`] if the OS object is present,
    /// [`Error::InvalidArgument`] if the name is malformed or `capacity`
    /// cannot hold the table region, [`Error::Io`] on OS failure.
    pub fn create(name: &str, opts: &SegmentOptions) -> Result<Self> {
        let c_name = validate_name(name)?;
        if opts.table_capacity == 0 {
            return Err(Error::InvalidArgument("table_capacity must be > 0"));
        }
        if opts.capacity > u32::MAX as usize {
            // Offsets and sizes travel as u32 in the on-segment format.
            return Err(Error::InvalidArgument("capacity exceeds u32 offsets"));
        }
        let table_region = table::region_size(opts.table_capacity);
        if opts.capacity < table_region {
            return Err(Error::InvalidArgument(
                "capacity is smaller than the table region",
            ));
        }

        let base = platform::shm_create(&c_name, opts.capacity)?;
        // SAFETY: fresh mapping of at least `table_region` zeroed bytes.
        unsafe { table::bootstrap(base, opts.table_capacity) };

        debug!(
            "created segment {name}: {} bytes, table capacity {}",
            opts.capacity, opts.table_capacity
        );
        stat_inc!(segment_creates);
        stat_add!(segment_bytes_mapped, opts.capacity);

        Ok(Self {
            base,
            capacity: opts.capacity,
            name: c_name,
            creator: true,
            unlink_policy: opts.unlink_policy,
        })
    }

    /// Map an existing segment. Its size is discovered from the OS object.
    ///
    /// Fails with [`Error::NotFound`] if absent, [`Error::Io`] otherwise.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = validate_name(name)?;
        let (base, capacity) = platform::shm_attach(&c_name)?;
        if capacity < table::HEADER_SIZE {
            // Not one of ours; a table attach would read out of bounds.
            // SAFETY: `base`/`capacity` came from shm_attach just above.
            unsafe { platform::shm_detach(base, capacity) };
            return Err(Error::InvalidArgument("segment below table overhead"));
        }

        debug!("opened segment {name}: {capacity} bytes");
        stat_inc!(segment_opens);
        stat_add!(segment_bytes_mapped, capacity);

        Ok(Self {
            base,
            capacity,
            name: c_name,
            creator: false,
            unlink_policy: UnlinkPolicy::Manual,
        })
    }

    /// Remove the OS object so no new open can find it. Existing mappings
    /// remain valid. Unlinking a name that does not exist is success.
    pub fn unlink(name: &str) -> Result<()> {
        let c_name = validate_name(name)?;
        match platform::shm_remove(&c_name) {
            Ok(()) => {
                stat_inc!(segment_unlinks);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Base address of the mapping in this process.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Byte capacity of the segment.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The OS-global name, including the leading `/`.
    pub fn name(&self) -> &str {
        // Names are validated UTF-8 (a subset of ASCII) at construction.
        self.name.to_str().expect("segment name is ASCII")
    }

    /// Whether this handle created the OS object.
    #[inline]
    pub fn is_creator(&self) -> bool {
        self.creator
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: `base`/`capacity` are the mapping this handle owns; no
        // view can outlive the handle (they borrow it).
        unsafe { platform::shm_detach(self.base, self.capacity) };
        if self.creator && self.unlink_policy == UnlinkPolicy::OnCreatorDrop {
            // A racing explicit unlink makes this a no-op; nothing to report.
            let _ = platform::shm_remove(&self.name);
        }
    }
}

fn validate_name(name: &str) -> Result<CString> {
    if !name.starts_with('/') || name.len() < 2 {
        return Err(Error::InvalidArgument(
            "segment name must be '/' followed by at least one character",
        ));
    }
    if name[1..].contains('/') {
        return Err(Error::InvalidArgument(
            "segment name may not contain an interior '/'",
        ));
    }
    if !name.is_ascii() {
        return Err(Error::InvalidArgument("segment name must be ASCII"));
    }
    CString::new(name).map_err(|_| Error::InvalidArgument("segment name may not contain NUL"))
}
