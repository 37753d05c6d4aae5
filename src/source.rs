use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::unix::AsyncFd;
use tokio::net::UnixStream;

/// The result of one readiness-driven read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    /// This many bytes were read into the buffer (never zero).
    Data(usize),
    /// The descriptor was reported ready but had nothing to read.
    WouldBlock,
    /// End of stream: the read returned zero bytes.
    Closed,
}

impl ReadOutcome {
    fn from_read(size: usize) -> Self {
        if size == 0 {
            Self::Closed
        } else {
            Self::Data(size)
        }
    }
}

/// A descriptor that can be waited on for readability and then read without blocking.
#[async_trait]
pub trait PollableSource: Send {
    /// Waits until the source is readable, then performs a single non-blocking read into
    /// `buf`.
    async fn read_ready(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;
}

#[async_trait]
impl PollableSource for UnixStream {
    async fn read_ready(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        self.readable().await?;
        match self.try_read(buf) {
            Ok(size) => Ok(ReadOutcome::from_read(size)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }
}

/// The process's standard input, switched to non-blocking mode and registered with the
/// reactor. The original file status flags are put back on drop.
pub struct Stdin {
    fd: AsyncFd<BorrowedFd<'static>>,
    original_flags: libc::c_int,
}

impl Stdin {
    pub fn new() -> anyhow::Result<Self> {
        // SAFETY: fd 0 stays open for the lifetime of the process
        let fd = unsafe { BorrowedFd::borrow_raw(io::stdin().as_raw_fd()) };
        Self::from_fd(fd)
    }

    /// Wraps a descriptor that stays owned by someone else.
    pub fn from_fd(fd: BorrowedFd<'static>) -> anyhow::Result<Self> {
        let raw = fd.as_raw_fd();
        let original_flags = set_nonblocking(raw)
            .with_context(|| format!("Failed to set fd {} non-blocking", raw))?;
        let fd = match AsyncFd::new(fd) {
            Ok(fd) => fd,
            Err(e) => {
                restore_flags(raw, original_flags);
                return Err(e).with_context(|| {
                    format!("Failed to register fd {} for readiness notification", raw)
                });
            }
        };
        Ok(Self { fd, original_flags })
    }
}

#[async_trait]
impl PollableSource for Stdin {
    async fn read_ready(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut guard = self.fd.readable().await?;
        match guard.try_io(|fd| read_fd(fd.as_raw_fd(), buf)) {
            Ok(Ok(size)) => Ok(ReadOutcome::from_read(size)),
            Ok(Err(e)) => Err(e),
            // Readiness was cleared by try_io
            Err(_would_block) => Ok(ReadOutcome::WouldBlock),
        }
    }
}

impl Drop for Stdin {
    fn drop(&mut self) {
        restore_flags(self.fd.as_raw_fd(), self.original_flags);
    }
}

/// Sets `O_NONBLOCK` on `fd`, returning the previous flags.
fn set_nonblocking(fd: RawFd) -> io::Result<libc::c_int> {
    // SAFETY: fcntl on a caller-provided descriptor has no memory-safety requirements
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

fn restore_flags(fd: RawFd, flags: libc::c_int) {
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        warn!(
            "Failed to restore flags of fd {}: {:?}",
            fd,
            io::Error::last_os_error()
        );
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf is valid for writes of buf.len() bytes
    let result = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if result < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result as usize)
    }
}
