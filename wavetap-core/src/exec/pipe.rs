//! Anonymous pipes exposed to the child as numbered fds beyond stderr.
//!
//! The transcoder writes raw PCM to fd 3 and the encoded payload to fd 4
//! (`pipe:3` / `pipe:4` outputs). Standard library process plumbing only
//! covers fds 0-2, so the write ends are mapped into place with `dup2`
//! inside `pre_exec`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::net::unix::pipe;

/// One extra child output channel: the parent-side async reader plus the
/// write end held open until after the spawn.
#[derive(Debug)]
pub(crate) struct ChannelPipe {
    reader: pipe::Receiver,
    write: Option<OwnedFd>,
    target_fd: RawFd,
}

impl ChannelPipe {
    /// Creates a pipe whose write end the child will see as `target_fd`.
    pub fn new(target_fd: RawFd) -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // O_CLOEXEC keeps both ends out of the child; dup2 in pre_exec
        // clears the flag on the one fd the child is meant to inherit.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let read = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        set_nonblocking(read.as_raw_fd())?;
        let reader = pipe::Receiver::from_owned_fd(read)?;

        Ok(Self {
            reader,
            write: Some(write),
            target_fd,
        })
    }

    pub fn target_fd(&self) -> RawFd {
        self.target_fd
    }

    /// Raw write fd for the `pre_exec` dup2 mapping. Only valid while the
    /// write end is still held.
    pub fn write_fd(&self) -> Option<RawFd> {
        self.write.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Drops the parent's copy of the write end. Must happen after spawn,
    /// or the reader never sees end-of-input.
    pub fn close_write(&mut self) {
        self.write = None;
    }

    pub fn into_reader(self) -> pipe::Receiver {
        self.reader
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `pre_exec` hook mapping pipe write ends onto their target fds. Runs in
/// the forked child before exec, so only async-signal-safe calls. When a
/// write end already sits on its target, dup2 would be a no-op that keeps
/// close-on-exec set, so the flag is cleared directly instead.
pub(crate) fn dup_into_place(mappings: &[(RawFd, RawFd)]) -> io::Result<()> {
    for (source, target) in mappings {
        if source == target {
            let flags = unsafe { libc::fcntl(*source, libc::F_GETFD) };
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if unsafe { libc::fcntl(*source, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
                return Err(io::Error::last_os_error());
            }
        } else if unsafe { libc::dup2(*source, *target) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
