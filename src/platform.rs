//! OS abstraction for named shared memory.
//!
//! Provides create/attach/detach/remove over kernel-backed shared-memory
//! objects (`shm_open`/`mmap` on POSIX). Callers pass names already in the
//! OS convention (leading `/`); validation happens a layer up in `segment`.

use std::ffi::CStr;
use std::io;

cfg_if::cfg_if! {
    if #[cfg(miri)] {
        mod miri;
        use miri as imp;
    } else if #[cfg(unix)] {
        mod unix;
        use unix as imp;
    } else {
        compile_error!("rtipc requires a POSIX-like named shared-memory facility");
    }
}

/// Create a new named object of `size` bytes and map it read-write shared.
/// Fails with `AlreadyExists` kind if the name is taken. The mapping is
/// zero-filled by the OS.
#[inline]
pub(crate) fn shm_create(name: &CStr, size: usize) -> io::Result<*mut u8> {
    imp::shm_create(name, size)
}

/// Map an existing named object read-write shared. Returns the base pointer
/// and the object's current size. Fails with `NotFound` kind if absent.
#[inline]
pub(crate) fn shm_attach(name: &CStr) -> io::Result<(*mut u8, usize)> {
    imp::shm_attach(name)
}

/// Unmap a mapping obtained from [`shm_create`] or [`shm_attach`]. Failure is
/// logged, not surfaced; this runs on drop paths.
///
/// # Safety
///
/// `ptr`/`size` must be exactly what the create/attach call returned, and the
/// mapping must not be used afterwards.
#[inline]
pub(crate) unsafe fn shm_detach(ptr: *mut u8, size: usize) {
    unsafe { imp::shm_detach(ptr, size) }
}

/// Remove the name so no new attach can find the object. Existing mappings
/// stay valid. Fails with `NotFound` kind if the name does not exist.
#[inline]
pub(crate) fn shm_remove(name: &CStr) -> io::Result<()> {
    imp::shm_remove(name)
}
