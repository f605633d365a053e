//! Lock-free bounded LIFO.
//!
//! Region layout: a 16-byte header `{elem_size, capacity, top_and_version}`
//! followed by the element buffer. The packed word holds the index of the
//! next free slot in its low half and a version counter in its high half.
//!
//! # Algorithm
//!
//! Every mutation is a single CAS on the packed word, which is the
//! linearization point. The version increments on every successful push or
//! pop, so a thread that stalled between reading the word and attempting
//! its CAS cannot succeed against a stack that popped and re-pushed the
//! same top index in the meantime (the ABA hazard of naive index stacks).
//!
//! A push writes its element before the CAS commits ownership; a pop reads
//! its element before the CAS commits release. Both are safe because slots
//! at or above `top` belong to nobody until a CAS moves `top` past them.

use core::sync::atomic::{AtomicU64, Ordering};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::segment::Segment;
use crate::stat_inc;
use crate::table::{self, Table};

#[repr(C)]
struct StackHeader {
    elem_size: u32,
    capacity: u32,
    /// `(version << 32) | top`.
    top_and_version: AtomicU64,
}

const HEADER_SIZE: usize = size_of::<StackHeader>();
const _: () = assert!(HEADER_SIZE == 16);

fn pack(top: u32, version: u32) -> u64 {
    ((version as u64) << 32) | top as u64
}

fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// A typed view over a table-allocated LIFO region.
pub struct Stack<'s> {
    header: *mut StackHeader,
    buf: *mut u8,
    elem_size: u32,
    capacity: u32,
    _segment: PhantomData<&'s Segment>,
}

// SAFETY: the packed-word CAS protocol gives each element slot exactly one
// owner at a time; the view's own fields are immutable.
unsafe impl Send for Stack<'_> {}
unsafe impl Sync for Stack<'_> {}

impl<'s> Stack<'s> {
    /// Allocate and register a new stack under `name`.
    pub fn create(table: &Table<'s>, name: &str, elem_size: u32, capacity: u32) -> Result<Self> {
        table::check_elem(elem_size, capacity, table.segment_capacity())?;

        let region = region_size(elem_size, capacity)?;
        // Header before publication, as for the other structures.
        let offset = table.add_with(name, region, |ptr, _| {
            let header = ptr.cast::<StackHeader>();
            // SAFETY: the table hands us an exclusive region of at least
            // `region` bytes.
            unsafe {
                (*header).elem_size = elem_size;
                (*header).capacity = capacity;
                (*header).top_and_version = AtomicU64::new(pack(0, 0));
            }
        })?;

        stat_inc!(structures_created);
        // SAFETY: region_size bytes were allocated and initialized above.
        Ok(unsafe { Self::from_region(table, offset, elem_size, capacity) })
    }

    /// Open an existing stack, validating the recorded element size.
    pub fn open(table: &Table<'s>, name: &str, elem_size: u32) -> Result<Self> {
        let (offset, size) = table.find(name)?;
        if (size as usize) < HEADER_SIZE {
            return Err(Error::InvalidArgument("region below stack header size"));
        }

        // SAFETY: the table guarantees the region is inside the segment and
        // fully initialized before its entry became visible.
        let header = unsafe { table.base().add(offset as usize).cast::<StackHeader>() };
        let (stored_elem, capacity) = unsafe { ((*header).elem_size, (*header).capacity) };
        if stored_elem != elem_size {
            return Err(Error::InvalidArgument("element size mismatch"));
        }
        let need = region_size(elem_size, capacity)?;
        if need > size as usize {
            return Err(Error::InvalidArgument("stack header inconsistent with region"));
        }

        Ok(unsafe { Self::from_region(table, offset, elem_size, capacity) })
    }

    /// # Safety
    ///
    /// `offset` must denote a table-allocated region of at least
    /// [`region_size`] bytes.
    unsafe fn from_region(table: &Table<'s>, offset: u32, elem_size: u32, capacity: u32) -> Self {
        let base = unsafe { table.base().add(offset as usize) };
        Self {
            header: base.cast(),
            buf: unsafe { base.add(HEADER_SIZE) },
            elem_size,
            capacity,
            _segment: PhantomData,
        }
    }

    /// Push one element. Returns [`Error::Full`] at capacity; an ordinary
    /// outcome, not a failure.
    pub fn push(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.elem_size as usize {
            return Err(Error::InvalidArgument("value length != element size"));
        }

        let word = self.word();
        loop {
            let cur = word.load(Ordering::Acquire);
            let (top, version) = unpack(cur);
            if top == self.capacity {
                stat_inc!(stack_full_returns);
                return Err(Error::Full);
            }

            // Speculative: slot `top` is unowned until the CAS commits, so
            // a losing racer's write lands on bytes nobody is reading.
            // SAFETY: top < capacity, so the slot is inside the buffer.
            unsafe {
                std::ptr::copy_nonoverlapping(value.as_ptr(), self.slot_ptr(top), value.len());
            }

            // Success is the linearization point; release publishes the
            // element write to the consumer that eventually pops this slot.
            if word
                .compare_exchange_weak(
                    cur,
                    pack(top + 1, version.wrapping_add(1)),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                stat_inc!(stack_pushes);
                return Ok(());
            }
            stat_inc!(stack_contention_retries);
            core::hint::spin_loop();
        }
    }

    /// Pop the most recently pushed element into `out`. Returns
    /// [`Error::Empty`] when there is none; an ordinary outcome, not a
    /// failure. `out` is unspecified unless `Ok` is returned.
    pub fn pop(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.elem_size as usize {
            return Err(Error::InvalidArgument("buffer length != element size"));
        }

        let word = self.word();
        loop {
            let cur = word.load(Ordering::Acquire);
            let (top, version) = unpack(cur);
            if top == 0 {
                stat_inc!(stack_empty_returns);
                return Err(Error::Empty);
            }

            // Read before the CAS commits release: the acquire load of the
            // word that showed us `top` also made the pusher's bytes
            // visible, and the slot cannot be rewritten until some later
            // push observes our decrement.
            // SAFETY: 0 < top <= capacity, so slot top-1 is in the buffer.
            unsafe {
                std::ptr::copy_nonoverlapping(self.slot_ptr(top - 1), out.as_mut_ptr(), out.len());
            }

            if word
                .compare_exchange_weak(
                    cur,
                    pack(top - 1, version.wrapping_add(1)),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                stat_inc!(stack_pops);
                return Ok(());
            }
            stat_inc!(stack_contention_retries);
            core::hint::spin_loop();
        }
    }

    /// Current element count; exact only when no operation is in flight.
    pub fn len(&self) -> u32 {
        unpack(self.word().load(Ordering::Relaxed)).0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    #[inline]
    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn word(&self) -> &AtomicU64 {
        // SAFETY: header is mapped for the life of the view.
        unsafe { &(*self.header).top_and_version }
    }

    fn slot_ptr(&self, slot: u32) -> *mut u8 {
        // SAFETY: slot < capacity; the buffer holds capacity elements.
        unsafe { self.buf.add(slot as usize * self.elem_size as usize) }
    }
}

/// Total region bytes for a stack of the given geometry.
fn region_size(elem_size: u32, capacity: u32) -> Result<usize> {
    (capacity as usize)
        .checked_mul(elem_size as usize)
        .map(table::align_up)
        .and_then(|elems| elems.checked_add(HEADER_SIZE))
        .ok_or(Error::OutOfMemory)
}
