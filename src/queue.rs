//! Lock-free multi-producer multi-consumer bounded FIFO.
//!
//! Region layout: a 64-byte header `{elem_size, capacity, head, tail}`
//! (padded for cache friendliness), then `capacity` 8-byte sequence words,
//! then the element buffer (rounded up to 8 bytes).
//!
//! # Algorithm
//!
//! A bounded ring in the style of Vyukov's MPMC queue. `head` and `tail`
//! are monotonic u64 counters; the slot for logical index `i` is
//! `i % capacity`. Each slot carries a sequence word tracking whose turn it
//! is: `seq == i` means slot `i` is free for the producer of turn `i`,
//! `seq == i + 1` means it holds the value of turn `i`, and a consumer that
//! empties it stores `i + capacity`, handing it to the producer one lap
//! ahead. Slot state is carried by this monotonically increasing counter,
//! never by reused indices, so stalled threads cannot be fooled by a slot
//! returning to a previous state.
//!
//! Ordering is the minimum needed: acquire on sequence reads, release on
//! sequence writes (these carry the element bytes), relaxed on the
//! `head`/`tail` CAS (the successful CAS is the linearization point but
//! synchronizes nothing itself).

use core::sync::atomic::{AtomicU64, Ordering};
use std::marker::PhantomData;

use crate::error::{Error, Result};
use crate::segment::Segment;
use crate::stat_inc;
use crate::table::{self, Table};

#[repr(C)]
struct QueueHeader {
    elem_size: u32,
    capacity: u32,
    head: AtomicU64,
    tail: AtomicU64,
    _pad: [u8; 40],
}

const HEADER_SIZE: usize = size_of::<QueueHeader>();
const _: () = assert!(HEADER_SIZE == 64);

/// A typed view over a table-allocated MPMC FIFO region.
pub struct Queue<'s> {
    header: *mut QueueHeader,
    seq: *mut AtomicU64,
    buf: *mut u8,
    elem_size: u32,
    capacity: u32,
    _segment: PhantomData<&'s Segment>,
}

// SAFETY: every access to shared state follows the seq-word protocol above;
// element bytes are only touched by the thread that won the slot's turn.
unsafe impl Send for Queue<'_> {}
unsafe impl Sync for Queue<'_> {}

impl<'s> Queue<'s> {
    /// Allocate and register a new queue under `name`.
    pub fn create(table: &Table<'s>, name: &str, elem_size: u32, capacity: u32) -> Result<Self> {
        table::check_elem(elem_size, capacity, table.segment_capacity())?;

        let region = region_size(elem_size, capacity)?;
        // The header and sequence words are written before the entry is
        // published, so a concurrent open can never observe a half-built
        // queue.
        let offset = table.add_with(name, region, |ptr, _| {
            let header = ptr.cast::<QueueHeader>();
            // SAFETY: the table hands us an exclusive region of at least
            // `region` bytes; header and seq vector are in-bounds.
            unsafe {
                (*header).elem_size = elem_size;
                (*header).capacity = capacity;
                (*header).head = AtomicU64::new(0);
                (*header).tail = AtomicU64::new(0);
                // Every slot starts at its own turn.
                let seq = ptr.add(HEADER_SIZE).cast::<AtomicU64>();
                for i in 0..capacity as u64 {
                    *seq.add(i as usize) = AtomicU64::new(i);
                }
            }
        })?;

        stat_inc!(structures_created);
        // SAFETY: region_size bytes were allocated and initialized above.
        Ok(unsafe { Self::from_region(table, offset, elem_size, capacity) })
    }

    /// Open an existing queue, validating the recorded element size.
    pub fn open(table: &Table<'s>, name: &str, elem_size: u32) -> Result<Self> {
        let (offset, size) = table.find(name)?;
        if (size as usize) < HEADER_SIZE {
            return Err(Error::InvalidArgument("region below queue header size"));
        }

        // SAFETY: the table guarantees the region is inside the segment and
        // fully initialized before its entry became visible.
        let header = unsafe { table.base().add(offset as usize).cast::<QueueHeader>() };
        let (stored_elem, capacity) = unsafe { ((*header).elem_size, (*header).capacity) };
        if stored_elem != elem_size {
            return Err(Error::InvalidArgument("element size mismatch"));
        }
        let need = region_size(elem_size, capacity)?;
        if need > size as usize {
            return Err(Error::InvalidArgument("queue header inconsistent with region"));
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
            seq: unsafe { base.add(HEADER_SIZE).cast() },
            buf: unsafe { base.add(HEADER_SIZE + capacity as usize * 8) },
            elem_size,
            capacity,
            _segment: PhantomData,
        }
    }

    /// Enqueue one element. Returns [`Error::Full`] when no slot is free;
    /// that is an ordinary outcome, not a failure.
    pub fn push(&self, value: &[u8]) -> Result<()> {
        if value.len() != self.elem_size as usize {
            return Err(Error::InvalidArgument("value length != element size"));
        }

        let header = self.header;
        // SAFETY: header is mapped for the life of the view.
        let tail = unsafe { &(*header).tail };
        let mut t = tail.load(Ordering::Relaxed);
        loop {
            let slot = (t % self.capacity as u64) as usize;
            let s = self.seq(slot).load(Ordering::Acquire);
            let diff = s.wrapping_sub(t) as i64;

            if diff == 0 {
                // Our turn: claim the slot by advancing tail.
                match tail.compare_exchange_weak(t, t + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive ownership
                        // of the slot's bytes until the seq store below.
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                value.as_ptr(),
                                self.slot_ptr(slot),
                                value.len(),
                            );
                        }
                        // Publish: consumers' acquire load of seq sees the
                        // element bytes written above.
                        self.seq(slot).store(t + 1, Ordering::Release);
                        stat_inc!(queue_pushes);
                        return Ok(());
                    }
                    Err(cur) => {
                        stat_inc!(queue_contention_retries);
                        t = cur;
                    }
                }
            } else if diff < 0 {
                // The slot still holds a value from one lap ago.
                stat_inc!(queue_full_returns);
                return Err(Error::Full);
            } else {
                // Another producer claimed this turn; chase the tail.
                t = tail.load(Ordering::Relaxed);
            }
            core::hint::spin_loop();
        }
    }

    /// Dequeue one element into `out`. Returns [`Error::Empty`] when no
    /// element is ready; that is an ordinary outcome, not a failure.
    pub fn pop(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != self.elem_size as usize {
            return Err(Error::InvalidArgument("buffer length != element size"));
        }

        let header = self.header;
        // SAFETY: header is mapped for the life of the view.
        let head = unsafe { &(*header).head };
        let mut h = head.load(Ordering::Relaxed);
        loop {
            let slot = (h % self.capacity as u64) as usize;
            let s = self.seq(slot).load(Ordering::Acquire);
            let diff = s.wrapping_sub(h + 1) as i64;

            if diff == 0 {
                // A value of our turn is ready: claim it by advancing head.
                match head.compare_exchange_weak(h, h + 1, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => {
                        // SAFETY: winning the CAS grants exclusive ownership
                        // of the slot's bytes until the seq store below.
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                self.slot_ptr(slot),
                                out.as_mut_ptr(),
                                out.len(),
                            );
                        }
                        // Hand the slot to the producer one lap ahead.
                        self.seq(slot).store(h + self.capacity as u64, Ordering::Release);
                        stat_inc!(queue_pops);
                        return Ok(());
                    }
                    Err(cur) => {
                        stat_inc!(queue_contention_retries);
                        h = cur;
                    }
                }
            } else if diff < 0 {
                stat_inc!(queue_empty_returns);
                return Err(Error::Empty);
            } else {
                // Another consumer claimed this turn; chase the head.
                h = head.load(Ordering::Relaxed);
            }
            core::hint::spin_loop();
        }
    }

    /// Approximate occupancy; exact only when no operation is in flight.
    pub fn len(&self) -> u64 {
        // SAFETY: header is mapped.
        let (head, tail) = unsafe {
            (
                (*self.header).head.load(Ordering::Relaxed),
                (*self.header).tail.load(Ordering::Relaxed),
            )
        };
        tail.saturating_sub(head)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity as u64
    }

    #[inline]
    pub fn elem_size(&self) -> u32 {
        self.elem_size
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn seq(&self, slot: usize) -> &AtomicU64 {
        debug_assert!(slot < self.capacity as usize);
        // SAFETY: slot < capacity and the seq vector is in-bounds.
        unsafe { &*self.seq.add(slot) }
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        // SAFETY: slot < capacity; the buffer holds capacity elements.
        unsafe { self.buf.add(slot * self.elem_size as usize) }
    }
}

/// Total region bytes for a queue of the given geometry.
fn region_size(elem_size: u32, capacity: u32) -> Result<usize> {
    let elems = (capacity as usize)
        .checked_mul(elem_size as usize)
        .ok_or(Error::OutOfMemory)?;
    (capacity as usize)
        .checked_mul(8)
        .and_then(|seq| HEADER_SIZE.checked_add(seq))
        .and_then(|fixed| fixed.checked_add(table::align_up(elems)))
        .ok_or(Error::OutOfMemory)
}
