//! Advisory file locks around day files.
//!
//! The writer holds an exclusive lock on the file it appends to; readers take
//! shared locks for the duration of a read. Locks are advisory only: the
//! format's stop-at-last-complete-entry rule is what actually makes
//! concurrent reads of a growing file safe.

use std::fs::File;
use std::io;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Take an exclusive lock without blocking; fails with `WouldBlock` when
/// another writer already owns the file.
#[cfg(unix)]
pub fn lock_exclusive(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX | libc::LOCK_NB)
}

/// Take a shared lock, waiting for a concurrent exclusive holder if needed.
#[cfg(unix)]
pub fn lock_shared(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_SH)
}

/// Release a lock early; dropping the file releases it as well.
#[cfg(unix)]
pub fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

#[cfg(not(unix))]
pub fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn lock_shared(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
pub fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}
