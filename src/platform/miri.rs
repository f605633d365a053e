//! Miri-compatible platform shim using std::alloc as backing store.
//!
//! Miri can't execute real OS syscalls (shm_open/mmap), so named objects are
//! emulated with page-aligned heap allocations behind a process-local name
//! registry. This lets Miri check all the unsafe pointer logic in the
//! structure implementations. Attaching returns the same allocation the
//! creator got, which is a faithful model of MAP_SHARED within one process.
//!
//! Backing allocations are intentionally never freed (a removed name may
//! still be mapped somewhere, and the shim does not track mappings); run
//! Miri with `-Zmiri-ignore-leaks`.

use std::alloc::Layout;
use std::collections::HashMap;
use std::ffi::CStr;
use std::io;
use std::sync::{Mutex, OnceLock};

const PAGE_ALIGN: usize = 4096;

struct Object {
    addr: usize,
    size: usize,
}

fn registry() -> &'static Mutex<HashMap<Vec<u8>, Object>> {
    static REGISTRY: OnceLock<Mutex<HashMap<Vec<u8>, Object>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn shm_create(name: &CStr, size: usize) -> io::Result<*mut u8> {
    let mut reg = registry().lock().unwrap();
    if reg.contains_key(name.to_bytes()) {
        return Err(io::Error::from(io::ErrorKind::AlreadyExists));
    }

    let layout = Layout::from_size_align(size, PAGE_ALIGN)
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // SAFETY: layout has non-zero size (segment creation rejects sizes below
    // the table overhead before reaching the platform layer).
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(io::Error::from(io::ErrorKind::OutOfMemory));
    }

    reg.insert(
        name.to_bytes().to_vec(),
        Object {
            addr: ptr as usize,
            size,
        },
    );
    Ok(ptr)
}

pub fn shm_attach(name: &CStr) -> io::Result<(*mut u8, usize)> {
    let reg = registry().lock().unwrap();
    match reg.get(name.to_bytes()) {
        Some(obj) => Ok((obj.addr as *mut u8, obj.size)),
        None => Err(io::Error::from(io::ErrorKind::NotFound)),
    }
}

pub unsafe fn shm_detach(_ptr: *mut u8, _size: usize) {}

pub fn shm_remove(name: &CStr) -> io::Result<()> {
    let mut reg = registry().lock().unwrap();
    match reg.remove(name.to_bytes()) {
        Some(_) => Ok(()),
        None => Err(io::Error::from(io::ErrorKind::NotFound)),
    }
}
