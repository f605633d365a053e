//! The registry table and bump allocator at the start of every segment.
//!
//! Byte format (little-endian, byte-exact across implementations):
//! - 16-byte header: magic, format version, entry count, next-free offset.
//! - `table_capacity` entries of 40 bytes each: a 32-byte NUL-terminated
//!   name, a region offset, and a region size.
//!
//! Entries are append-only. The bump allocator never reuses space, so an
//! offset handed to one process stays valid for the life of the segment.
//! `remove` only erases an entry's name; its slot and its region are not
//! reclaimed.
//!
//! # Concurrency protocol
//!
//! `add` and `remove` are serialized across processes by a one-bit spin lock
//! carried in bit 31 of the entry-count word ([`crate::sync::HeaderLock`]);
//! with the lock at rest, the word equals the plain count, so the byte image
//! stays exactly the published format. `find`, `count`, and `iter` are
//! wait-free: they acquire-load the entry count (which `add` release-stores
//! after the entry bytes are fully written) and read names as whole 8-byte
//! words. `remove` erases word 0 of the name first, so a scanner that
//! observes any later name word zeroed re-checks word 0 and skips the slot.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::marker::PhantomData;

use crate::config;
use crate::error::{Error, Result};
use crate::segment::Segment;
use crate::sync::HeaderLock;
use crate::{stat_add, stat_inc};

/// Magic at segment offset 0: "ZIPM" read as a little-endian u32.
pub const MAGIC: u32 = 0x5A49_504D;
/// On-segment format version.
pub const FORMAT_VERSION: u32 = 1;

/// Longest entry name in bytes, not counting the NUL terminator.
pub const MAX_NAME_LEN: usize = 31;

pub(crate) const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 40;
const NAME_FIELD: usize = 32;
const NAME_WORDS: usize = NAME_FIELD / 8;

/// Granularity of the bump allocator; every region offset and size is a
/// multiple of this.
pub(crate) const ALLOC_ALIGN: usize = 8;

/// Bit of the entry-count word that serializes add/remove.
const ADD_LOCK_BIT: u32 = 1 << 31;
const COUNT_MASK: u32 = !ADD_LOCK_BIT;

#[repr(C)]
struct RawHeader {
    magic: u32,
    version: u32,
    /// Live count in bits 0..31; bit 31 is the add lock (clear at rest).
    entry_count: AtomicU32,
    /// Bump-allocator cursor. Only mutated while the add lock is held.
    next_free: AtomicU32,
}

#[repr(C)]
struct RawEntry {
    /// NUL-terminated, NUL-padded ASCII. All-zero means "unused slot".
    name: [u8; NAME_FIELD],
    /// Region offset from the segment base.
    offset: u32,
    /// Region size in bytes, already rounded up to [`ALLOC_ALIGN`].
    size: u32,
}

const _: () = assert!(size_of::<RawHeader>() == HEADER_SIZE);
const _: () = assert!(size_of::<RawEntry>() == ENTRY_SIZE);
// Entries start 8-aligned and stay 8-aligned, so names can be read as words.
const _: () = assert!(HEADER_SIZE % 8 == 0 && ENTRY_SIZE % 8 == 0);

/// Round `n` up to the allocator granularity.
pub(crate) fn align_up(n: usize) -> usize {
    (n + (ALLOC_ALIGN - 1)) & !(ALLOC_ALIGN - 1)
}

/// Byte size of the table region (header plus entry vector) for a given
/// entry capacity. This is also the initial next-free offset.
pub fn region_size(table_capacity: u32) -> usize {
    align_up(HEADER_SIZE + ENTRY_SIZE * table_capacity as usize)
}

/// Write a fresh table header over a zeroed region.
///
/// # Safety
///
/// `base` must point to at least [`region_size`] zeroed, writable bytes that
/// no other process is accessing yet.
pub(crate) unsafe fn bootstrap(base: *mut u8, table_capacity: u32) {
    let header = base.cast::<RawHeader>();
    // SAFETY: caller guarantees an exclusive, sufficiently sized region.
    unsafe {
        (*header).magic = MAGIC;
        (*header).version = FORMAT_VERSION;
        (*header).entry_count = AtomicU32::new(0);
        (*header).next_free = AtomicU32::new(region_size(table_capacity) as u32);
    }
}

/// A snapshot of one live registry entry, as yielded by [`Table::iter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// A view over the registry of one mapped segment.
pub struct Table<'s> {
    header: *mut RawHeader,
    entries: *mut RawEntry,
    capacity: u32,
    base: *mut u8,
    seg_capacity: usize,
    _segment: PhantomData<&'s Segment>,
}

// SAFETY: all mutation of shared state goes through atomics (the header
// words and the name words); the view's own fields are immutable.
unsafe impl Send for Table<'_> {}
unsafe impl Sync for Table<'_> {}

impl<'s> Table<'s> {
    /// Attach to the table of a mapped segment, validating the header and
    /// deriving the entry capacity from the byte image.
    ///
    /// The capacity is not stored in the header: it is recovered from the
    /// first entry's offset (the bump allocator's starting point) or, for an
    /// empty table, from the next-free cursor.
    pub fn attach(segment: &'s Segment) -> Result<Self> {
        let base = segment.base();
        let seg_capacity = segment.capacity();
        let header = base.cast::<RawHeader>();

        // SAFETY: Segment::open/create guarantee at least HEADER_SIZE mapped
        // bytes; magic and version are immutable after bootstrap.
        let (magic, version) = unsafe { ((*header).magic, (*header).version) };
        if magic != MAGIC {
            return Err(Error::InvalidArgument("table magic mismatch"));
        }
        if version != FORMAT_VERSION {
            return Err(Error::InvalidArgument("table format version mismatch"));
        }

        // SAFETY: header is mapped; the loads are atomic.
        let (count, next_free) = unsafe {
            (
                (*header).entry_count.load(Ordering::Acquire) & COUNT_MASK,
                (*header).next_free.load(Ordering::Acquire) as usize,
            )
        };

        let table_end = if count > 0 {
            // Entry 0 exists, and bump allocation started right after the
            // entry vector, so its offset is the table region's end.
            // SAFETY: count > 0 means entry 0 was fully published.
            unsafe { (*base.add(HEADER_SIZE).cast::<RawEntry>()).offset as usize }
        } else {
            next_free
        };

        if table_end < HEADER_SIZE + ENTRY_SIZE || (table_end - HEADER_SIZE) % ENTRY_SIZE != 0 {
            return Err(Error::InvalidArgument("table region size is corrupt"));
        }
        let capacity = ((table_end - HEADER_SIZE) / ENTRY_SIZE) as u32;
        if count > capacity || table_end > seg_capacity || next_free > seg_capacity {
            return Err(Error::InvalidArgument("table header is corrupt"));
        }

        Ok(Self {
            header,
            entries: unsafe { base.add(HEADER_SIZE).cast::<RawEntry>() },
            capacity,
            base,
            seg_capacity,
            _segment: PhantomData,
        })
    }

    /// Allocate `size` bytes (rounded up to 8) and register them under
    /// `name`. Returns the region's offset from the segment base.
    ///
    /// Serialized across all attached processes; a failed add leaves the
    /// table byte-identical.
    pub fn add(&self, name: &str, size: usize) -> Result<u32> {
        self.add_with(name, size, |_, _| {})
    }

    /// Like [`add`](Table::add), but runs `init` over the fresh region
    /// before the entry is published. A process that finds the entry is
    /// therefore guaranteed to see the region fully initialized (the count's
    /// release store covers the `init` writes). Structure constructors use
    /// this to write their headers before registration becomes visible.
    pub(crate) fn add_with(
        &self,
        name: &str,
        size: usize,
        init: impl FnOnce(*mut u8, usize),
    ) -> Result<u32> {
        let padded = pad_name(name)?;
        if size == 0 {
            return Err(Error::InvalidArgument("size must be > 0"));
        }

        let lock = self.lock();
        let count = lock.acquire(config::ADD_SPIN_LIMIT);

        if count == self.capacity {
            lock.release(count);
            return Err(Error::TableFull);
        }
        if self.scan(&padded).is_some() {
            lock.release(count);
            return Err(Error::AlreadyExists);
        }

        let aligned = align_up(size);
        // SAFETY: header is mapped; we hold the add lock, the only mutator.
        let offset = unsafe { (*self.header).next_free.load(Ordering::Relaxed) } as usize;
        debug_assert_eq!(offset % ALLOC_ALIGN, 0);
        if offset.checked_add(aligned).is_none_or(|end| end > self.seg_capacity) {
            lock.release(count);
            return Err(Error::OutOfMemory);
        }

        // Initialize the region and write the entry in full, then publish by
        // bumping the count (release), then advance the allocator cursor.
        // Readers that see the new count therefore see a complete entry over
        // an initialized region, and a crash mid-add leaves at worst an
        // unpublished slot.
        // SAFETY: [offset, offset + aligned) is unallocated segment space.
        init(unsafe { self.base.add(offset) }, aligned);
        // SAFETY: count < capacity, so the slot is inside the entry vector
        // and unpublished; the add lock gives us exclusive write access.
        unsafe {
            let entry = self.entries.add(count as usize);
            (*entry).name = padded;
            (*entry).offset = offset as u32;
            (*entry).size = aligned as u32;
        }
        lock.store(count + 1);
        // SAFETY: header is mapped.
        unsafe {
            (*self.header)
                .next_free
                .store((offset + aligned) as u32, Ordering::Relaxed);
        }
        lock.release(count + 1);

        stat_inc!(table_adds);
        stat_add!(table_bytes_allocated, aligned);
        Ok(offset as u32)
    }

    /// Look up a live entry by name. Wait-free. Returns `(offset, size)`
    /// with the size as allocated (rounded up to 8).
    pub fn find(&self, name: &str) -> Result<(u32, u32)> {
        let padded = pad_name(name)?;
        match self.scan(&padded) {
            Some(i) => {
                // SAFETY: slot i was published (i < count) and offset/size
                // are never mutated after publication.
                let (offset, size) = unsafe {
                    let entry = self.entries.add(i as usize);
                    ((*entry).offset, (*entry).size)
                };
                // The name match may have raced a concurrent `remove` of a
                // longer name whose tail words were already erased. `remove`
                // erases word 0 first, so a live re-read of word 0 proves
                // the match was genuine.
                if self.name_word(i, 0).load(Ordering::Acquire)
                    != u64::from_ne_bytes(padded[..8].try_into().unwrap())
                {
                    return Err(Error::NotFound);
                }
                Ok((offset, size))
            }
            None => Err(Error::NotFound),
        }
    }

    /// Erase an entry's name, making its slot unused. The slot still counts
    /// against the table capacity and the region is never reclaimed, but the
    /// name becomes free for a later [`add`](Table::add).
    pub fn remove(&self, name: &str) -> Result<()> {
        let padded = pad_name(name)?;

        let lock = self.lock();
        let count = lock.acquire(config::ADD_SPIN_LIMIT);
        let found = self.scan(&padded);
        if let Some(i) = found {
            // Word 0 first: scanners treat a zero word 0 as "unused", so the
            // slot disappears atomically from their point of view. The
            // release stores pair with scanners' acquire loads, making the
            // erase order visible to the word-0 re-check in `find`.
            for w in 0..NAME_WORDS {
                self.name_word(i, w).store(0, Ordering::Release);
            }
        }
        lock.release(count);

        match found {
            Some(_) => {
                stat_inc!(table_removes);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Entry slots consumed so far, including slots whose name was erased.
    pub fn count(&self) -> u32 {
        // SAFETY: header is mapped.
        unsafe { (*self.header).entry_count.load(Ordering::Acquire) & COUNT_MASK }
    }

    /// Iterate over the live entries. Wait-free; entries published or
    /// removed during iteration may or may not be observed.
    pub fn iter(&self) -> impl Iterator<Item = TableEntry> + '_ {
        (0..self.count()).filter_map(|i| {
            let name = self.load_name(i);
            if name[0] == 0 {
                return None;
            }
            let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
            // SAFETY: slot i is published; offset/size are immutable.
            let (offset, size) = unsafe {
                let entry = self.entries.add(i as usize);
                ((*entry).offset, (*entry).size)
            };
            Some(TableEntry {
                name: String::from_utf8_lossy(&name[..len]).into_owned(),
                offset,
                size,
            })
        })
    }

    /// Entry capacity fixed at segment creation.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// First byte past the table region; the bump allocator's origin.
    #[inline]
    pub fn region_end(&self) -> u32 {
        region_size(self.capacity) as u32
    }

    /// Current bump-allocator cursor.
    pub fn next_free(&self) -> u32 {
        // SAFETY: header is mapped.
        unsafe { (*self.header).next_free.load(Ordering::Acquire) }
    }

    /// Segment base address, for constructing structure views.
    #[inline]
    pub(crate) fn base(&self) -> *mut u8 {
        self.base
    }

    /// Capacity of the underlying segment in bytes.
    #[inline]
    pub(crate) fn segment_capacity(&self) -> usize {
        self.seg_capacity
    }

    fn lock(&self) -> HeaderLock<'_> {
        // SAFETY: the header is mapped for as long as the view lives.
        HeaderLock::new(unsafe { &(*self.header).entry_count }, ADD_LOCK_BIT)
    }

    /// View of one 8-byte word of an entry's name field.
    fn name_word(&self, i: u32, w: usize) -> &AtomicU64 {
        debug_assert!(w < NAME_WORDS);
        // SAFETY: entries are 8-aligned, 40 bytes apart, and inside the
        // mapping for every i < capacity.
        unsafe {
            let entry = self.entries.add(i as usize);
            AtomicU64::from_ptr((&raw mut (*entry).name).cast::<u64>().add(w))
        }
    }

    /// Atomically assemble the 32-byte name image of slot `i`.
    fn load_name(&self, i: u32) -> [u8; NAME_FIELD] {
        let mut out = [0u8; NAME_FIELD];
        for w in 0..NAME_WORDS {
            let v = self.name_word(i, w).load(Ordering::Acquire);
            out[w * 8..(w + 1) * 8].copy_from_slice(&v.to_ne_bytes());
        }
        out
    }

    /// Index of the live entry whose padded name equals `padded`, if any.
    fn scan(&self, padded: &[u8; NAME_FIELD]) -> Option<u32> {
        (0..self.count()).find(|&i| {
            let name = self.load_name(i);
            name[0] != 0 && name == *padded
        })
    }
}

/// Shared creation-time validation for structure element parameters.
///
/// `elem_size` is capped at a fraction of the segment so one structure's
/// element stride cannot plausibly swallow the whole segment by accident.
pub(crate) fn check_elem(elem_size: u32, capacity: u32, seg_capacity: usize) -> Result<()> {
    if elem_size == 0 {
        return Err(Error::InvalidArgument("elem_size must be > 0"));
    }
    if capacity == 0 {
        return Err(Error::InvalidArgument("capacity must be > 0"));
    }
    if elem_size as usize > seg_capacity / config::ELEM_SIZE_CAP_DIVISOR as usize {
        return Err(Error::InvalidArgument(
            "elem_size exceeds the per-segment sanity cap",
        ));
    }
    Ok(())
}

/// Validate a structure name and pad it to the 32-byte field image.
fn pad_name(name: &str) -> Result<[u8; NAME_FIELD]> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArgument("name exceeds 31 bytes"));
    }
    // NUL is the terminator in the entry image, so it cannot appear in a
    // name; every other byte round-trips as-is.
    if name.bytes().any(|b| b == 0) {
        return Err(Error::InvalidArgument("name may not contain NUL"));
    }
    let mut padded = [0u8; NAME_FIELD];
    padded[..name.len()].copy_from_slice(name.as_bytes());
    Ok(padded)
}
