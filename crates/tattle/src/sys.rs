//! Descriptor plumbing. Unix-only: handle identity is the file descriptor.

use std::fs::File;
use std::io;
use std::os::fd::IntoRawFd;

/// Closes a raw descriptor and surfaces the platform result.
pub(crate) fn close_fd(fd: i32) -> io::Result<()> {
    // SAFETY: the caller owns `fd`; it is not used again after this call.
    let rc = unsafe { libc::close(fd) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Closes an owned stream, reporting the platform result instead of
/// swallowing it the way `Drop` would.
pub(crate) fn close_stream(stream: File) -> io::Result<()> {
    close_fd(stream.into_raw_fd())
}

/// Redirects `dst` (a standard descriptor) onto the file behind `src`,
/// freopen-style. `src` remains open and owned by the caller.
pub(crate) fn dup_onto(src: &File, dst: i32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: both descriptors are valid for the duration of the call.
    let rc = unsafe { libc::dup2(src.as_raw_fd(), dst) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
