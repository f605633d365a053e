//! Fixed-capacity flat element storage with per-element compare-and-swap.
//!
//! Region layout: an 8-byte header `{elem_size, capacity}` followed by
//! `capacity * elem_size` element bytes. Plain `get`/`set` are racy by
//! contract; concurrent users coordinate through [`Array::cas`] or use the
//! queue/stack structures instead.

use core::sync::atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::segment::Segment;
use crate::stat_inc;
use crate::table::Table;

#[repr(C)]
struct ArrayHeader {
    elem_size: u32,
    capacity: u32,
}

const HEADER_SIZE: usize = size_of::<ArrayHeader>();
const _: () = assert!(HEADER_SIZE == 8);

/// A typed view over a table-allocated flat element region.
pub struct Array<'s> {
    header: *mut ArrayHeader,
    buf: *mut u8,
    elem_size: u32,
    capacity: u32,
    _segment: PhantomData<&'s Segment>,
}

// SAFETY: plain element access is racy by contract (the caller opted in);
// `cas` goes through atomics. The view's own fields are immutable.
unsafe impl Send for Array<'_> {}
unsafe impl Sync for Array<'_> {}

impl<'s> Array<'s> {
    /// Allocate and register a new array under `name`.
    pub fn create(table: &Table<'s>, name: &str, elem_size: u32, capacity: u32) -> Result<Self> {
        crate::table::check_elem(elem_size, capacity, table.segment_capacity())?;

        let region = (capacity as usize)
            .checked_mul(elem_size as usize)
            .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
            .ok_or(Error::OutOfMemory)?;
        // Header goes in before the entry is published so a concurrent open
        // never sees a half-built array.
        let offset = table.add_with(name, region, |ptr, _| {
            let header = ptr.cast::<ArrayHeader>();
            // SAFETY: the table hands us an exclusive region of at least
            // `region` bytes.
            unsafe {
                (*header).elem_size = elem_size;
                (*header).capacity = capacity;
            }
        })?;

        stat_inc!(structures_created);
        // SAFETY: `region` bytes were allocated and initialized above.
        Ok(unsafe { Self::from_region(table, offset, elem_size, capacity) })
    }

    /// Open an existing array, validating the recorded element size against
    /// what the caller assumes.
    pub fn open(table: &Table<'s>, name: &str, elem_size: u32) -> Result<Self> {
        let (offset, size) = table.find(name)?;
        if (size as usize) < HEADER_SIZE {
            return Err(Error::InvalidArgument("region below array header size"));
        }

        // SAFETY: the table guarantees [offset, offset + size) is inside the
        // segment; the header was fully written before registration.
        let header = unsafe { table.base().add(offset as usize).cast::<ArrayHeader>() };
        let (stored_elem, capacity) = unsafe { ((*header).elem_size, (*header).capacity) };
        if stored_elem != elem_size {
            return Err(Error::InvalidArgument("element size mismatch"));
        }
        let need = HEADER_SIZE as u64 + elem_size as u64 * capacity as u64;
        if need > size as u64 {
            return Err(Error::InvalidArgument("array header inconsistent with region"));
        }

        Ok(unsafe { Self::from_region(table, offset, elem_size, capacity) })
    }

    /// # Safety
    ///
    /// `offset` must denote a table-allocated region large enough for the
    /// header plus `capacity * elem_size` element bytes.
    unsafe fn from_region(table: &Table<'s>, offset: u32, elem_size: u32, capacity: u32) -> Self {
        let header = unsafe { table.base().add(offset as usize).cast::<ArrayHeader>() };
        Self {
            header,
            buf: unsafe { table.base().add(offset as usize + HEADER_SIZE) },
            elem_size,
            capacity,
            _segment: PhantomData,
        }
    }

    /// Copy element `i` into `out`. `out` must be exactly one element long.
    pub fn get(&self, i: u32, out: &mut [u8]) -> Result<()> {
        let ptr = self.elem_ptr(i, out.len())?;
        // SAFETY: `ptr` is a bounds-checked element inside the mapping.
        // Concurrent writers make this a racy read, which is the documented
        // contract of plain access.
        unsafe { std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), out.len()) };
        Ok(())
    }

    /// Overwrite element `i` with `value`, which must be exactly one
    /// element long.
    pub fn set(&self, i: u32, value: &[u8]) -> Result<()> {
        let ptr = self.elem_ptr(i, value.len())?;
        // SAFETY: as in `get`; racy by contract.
        unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), ptr, value.len()) };
        Ok(())
    }

    /// Atomically replace element `i` with `desired` if it currently equals
    /// `expected`. Returns whether the swap happened.
    ///
    /// Supported for element sizes 1, 2, 4, and 8 (the widths the host CPU
    /// can CAS); anything else fails with [`Error::Unsupported`].
    pub fn cas(&self, i: u32, expected: &[u8], desired: &[u8]) -> Result<bool> {
        if desired.len() != expected.len() {
            return Err(Error::InvalidArgument("expected/desired length mismatch"));
        }
        let ptr = self.elem_ptr(i, expected.len())?;

        stat_inc!(array_cas_attempts);
        // Element alignment follows from the 8-aligned buffer start: offsets
        // are i * elem_size, a multiple of every supported width.
        let swapped = match expected.len() {
            1 => {
                // SAFETY: in-bounds, properly aligned for the atomic width.
                let atom = unsafe { AtomicU8::from_ptr(ptr) };
                atom.compare_exchange(expected[0], desired[0], Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
            2 => {
                let exp = u16::from_ne_bytes(expected.try_into().unwrap());
                let des = u16::from_ne_bytes(desired.try_into().unwrap());
                // SAFETY: as above.
                let atom = unsafe { AtomicU16::from_ptr(ptr.cast()) };
                atom.compare_exchange(exp, des, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
            4 => {
                let exp = u32::from_ne_bytes(expected.try_into().unwrap());
                let des = u32::from_ne_bytes(desired.try_into().unwrap());
                // SAFETY: as above.
                let atom = unsafe { AtomicU32::from_ptr(ptr.cast()) };
                atom.compare_exchange(exp, des, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
            8 => {
                let exp = u64::from_ne_bytes(expected.try_into().unwrap());
                let des = u64::from_ne_bytes(desired.try_into().unwrap());
                // SAFETY: as above.
                let atom = unsafe { AtomicU64::from_ptr(ptr.cast()) };
                atom.compare_exchange(exp, des, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
            _ => return Err(Error::Unsupported),
        };
        if !swapped {
            stat_inc!(array_cas_failures);
        }
        Ok(swapped)
    }

    #[inline]
    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bounds- and length-check, then compute the element's address.
    fn elem_ptr(&self, i: u32, len: usize) -> Result<*mut u8> {
        if len != self.elem_size as usize {
            return Err(Error::InvalidArgument("buffer length != element size"));
        }
        if i >= self.capacity {
            return Err(Error::OutOfRange);
        }
        // SAFETY: i < capacity, and create/open validated that
        // capacity * elem_size element bytes fit in the region.
        Ok(unsafe { self.buf.add(i as usize * self.elem_size as usize) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentOptions;

    fn make_table(tag: &str) -> (String, Segment) {
        let name = format!("/rtipc_arr_{}_{tag}", std::process::id());
        let seg = Segment::create(&name, &SegmentOptions::new(1 << 16).table_capacity(8)).unwrap();
        (name, seg)
    }

    #[test]
    fn test_set_get_round_trip() {
        let (name, seg) = make_table("setget");
        let table = Table::attach(&seg).unwrap();
        let arr = Array::create(&table, "a", 4, 3).unwrap();

        for i in 0..3u32 {
            arr.set(i, &(i + 1).to_le_bytes()).unwrap();
        }
        let mut out = [0u8; 4];
        for i in 0..3u32 {
            arr.get(i, &mut out).unwrap();
            assert_eq!(u32::from_le_bytes(out), i + 1);
        }
        assert!(matches!(arr.set(3, &[0; 4]), Err(Error::OutOfRange)));
        assert!(matches!(arr.get(3, &mut out), Err(Error::OutOfRange)));

        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_open_validates_elem_size() {
        let (name, seg) = make_table("open");
        let table = Table::attach(&seg).unwrap();
        Array::create(&table, "a", 4, 8).unwrap();

        let reopened = Array::open(&table, "a", 4).unwrap();
        assert_eq!(reopened.capacity(), 8);
        assert!(matches!(
            Array::open(&table, "a", 8),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(Array::open(&table, "b", 4), Err(Error::NotFound)));

        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let (name, seg) = make_table("len");
        let table = Table::attach(&seg).unwrap();
        let arr = Array::create(&table, "a", 4, 2).unwrap();
        assert!(matches!(
            arr.set(0, &[1, 2]),
            Err(Error::InvalidArgument(_))
        ));
        let mut short = [0u8; 2];
        assert!(matches!(
            arr.get(0, &mut short),
            Err(Error::InvalidArgument(_))
        ));
        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_cas_word_sizes() {
        let (name, seg) = make_table("cas");
        let table = Table::attach(&seg).unwrap();

        for elem_size in [1u32, 2, 4, 8] {
            let arr_name = format!("w{elem_size}");
            let arr = Array::create(&table, &arr_name, elem_size, 4).unwrap();
            let zero = vec![0u8; elem_size as usize];
            let one = vec![1u8; elem_size as usize];

            assert!(arr.cas(0, &zero, &one).unwrap());
            // Second attempt sees the new value and fails.
            assert!(!arr.cas(0, &zero, &one).unwrap());
            let mut out = vec![0u8; elem_size as usize];
            arr.get(0, &mut out).unwrap();
            assert_eq!(out, one);
        }

        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_cas_unsupported_width() {
        let (name, seg) = make_table("wide");
        let table = Table::attach(&seg).unwrap();
        let arr = Array::create(&table, "a", 16, 2).unwrap();
        let buf = [0u8; 16];
        assert!(matches!(arr.cas(0, &buf, &buf), Err(Error::Unsupported)));
        // Plain access still works for wide elements.
        arr.set(0, &[7u8; 16]).unwrap();
        let mut out = [0u8; 16];
        arr.get(0, &mut out).unwrap();
        assert_eq!(out, [7u8; 16]);
        Segment::unlink(&name).unwrap();
    }

    #[test]
    fn test_concurrent_cas_counter() {
        let (name, seg) = make_table("contend");
        let table = Table::attach(&seg).unwrap();
        let arr = Array::create(&table, "ctr", 8, 1).unwrap();
        arr.set(0, &0u64.to_ne_bytes()).unwrap();

        let num_threads: u64 = 4;
        let per_thread = 1000u64;
        std::thread::scope(|s| {
            for _ in 0..num_threads {
                let arr = &arr;
                s.spawn(move || {
                    for _ in 0..per_thread {
                        loop {
                            let mut cur = [0u8; 8];
                            arr.get(0, &mut cur).unwrap();
                            let next = (u64::from_ne_bytes(cur) + 1).to_ne_bytes();
                            if arr.cas(0, &cur, &next).unwrap() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        let mut out = [0u8; 8];
        arr.get(0, &mut out).unwrap();
        assert_eq!(u64::from_ne_bytes(out), num_threads * per_thread);

        Segment::unlink(&name).unwrap();
    }
}
