//! POSIX shared memory via shm_open/ftruncate/mmap.

use std::ffi::CStr;
use std::io;
use std::mem::MaybeUninit;
use std::ptr;

use log::warn;

pub fn shm_create(name: &CStr, size: usize) -> io::Result<*mut u8> {
    // SAFETY: `name` is a valid NUL-terminated string. O_EXCL makes creation
    // fail (EEXIST) instead of silently reusing an existing object.
    let fd = unsafe {
        libc::shm_open(
            name.as_ptr(),
            libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
            0o600,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `fd` is the descriptor just opened. A freshly created object
    // has length 0; ftruncate extends it with zero bytes.
    let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        // The object was created by us and never published usable; take the
        // name back so a retry is not stuck on EEXIST.
        unsafe {
            libc::close(fd);
            libc::shm_unlink(name.as_ptr());
        }
        return Err(err);
    }

    match map_fd(fd, size) {
        Ok(ptr) => Ok(ptr),
        Err(err) => {
            // SAFETY: same cleanup rationale as the ftruncate failure path.
            unsafe { libc::shm_unlink(name.as_ptr()) };
            Err(err)
        }
    }
}

pub fn shm_attach(name: &CStr) -> io::Result<(*mut u8, usize)> {
    // SAFETY: `name` is a valid NUL-terminated string.
    let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // The object's size is whatever the creator truncated it to.
    let mut st = MaybeUninit::<libc::stat>::uninit();
    // SAFETY: `fd` is valid and `st` is a properly sized stat buffer.
    let ret = unsafe { libc::fstat(fd, st.as_mut_ptr()) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        // SAFETY: `fd` is valid and not used after this point.
        unsafe { libc::close(fd) };
        return Err(err);
    }
    // SAFETY: fstat succeeded, so the buffer is initialized.
    let size = unsafe { st.assume_init() }.st_size as usize;

    let ptr = map_fd(fd, size)?;
    Ok((ptr, size))
}

fn map_fd(fd: libc::c_int, size: usize) -> io::Result<*mut u8> {
    // SAFETY: null hint lets the kernel pick the address; `fd` is a valid
    // shm descriptor of at least `size` bytes; MAP_SHARED makes stores
    // visible to every process mapping the same object.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    let err = if ptr == libc::MAP_FAILED {
        Some(io::Error::last_os_error())
    } else {
        None
    };

    // The mapping holds its own reference to the object; the descriptor is
    // no longer needed either way.
    // SAFETY: `fd` is valid and not used after this point.
    unsafe { libc::close(fd) };

    match err {
        Some(err) => Err(err),
        None => Ok(ptr.cast()),
    }
}

pub unsafe fn shm_detach(ptr: *mut u8, size: usize) {
    // SAFETY: caller guarantees `ptr`/`size` came from map_fd.
    let ret = unsafe { libc::munmap(ptr.cast(), size) };
    if ret != 0 {
        warn!(
            "munmap failed: {}, addr {:p}, size {}",
            io::Error::last_os_error(),
            ptr,
            size
        );
    }
}

pub fn shm_remove(name: &CStr) -> io::Result<()> {
    // SAFETY: `name` is a valid NUL-terminated string.
    let ret = unsafe { libc::shm_unlink(name.as_ptr()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
