use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::sys::socket::AddressFamily;
use tracing::{debug, trace};

use super::socket;
use crate::{
    buffer::ByteBuffer,
    error::{Error, Result},
    sys::DescriptorHolder,
};

/// The result of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were read into the buffer, which is only ever zero when the buffer had no
    /// space remaining.
    Read(usize),
    /// No data is available right now, the buffer is unchanged.
    WouldBlock,
    /// The peer performed an orderly shutdown.
    EndOfStream,
}

impl ReadOutcome {
    /// The classic integer form: the byte count, `0` when the read would block and `-1` at end of
    /// stream.
    pub fn as_count(&self) -> isize {
        match self {
            ReadOutcome::Read(n) => *n as isize,
            ReadOutcome::WouldBlock => 0,
            ReadOutcome::EndOfStream => -1,
        }
    }
}

/// A [Channel] is anything backed by a closeable descriptor.
pub trait Channel {
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

/// A [Channel] that can read bytes into a [ByteBuffer].
pub trait ReadableByteChannel: Channel {
    /// Read up to `buffer.remaining()` bytes at the buffer's position, advancing it by the number
    /// of bytes read.
    fn read(&mut self, buffer: &mut ByteBuffer) -> Result<ReadOutcome>;
}

/// A [Channel] that can write bytes from a [ByteBuffer].
pub trait WritableByteChannel: Channel {
    /// Write up to `buffer.remaining()` bytes from the buffer's position, advancing it by the
    /// number of bytes the kernel accepted. Returns `0` if the send buffer is full.
    fn write(&mut self, buffer: &mut ByteBuffer) -> Result<usize>;
}

/// The [SocketChannelBase] is the state shared by [super::SocketChannel] and
/// [super::ServerSocketChannel]: the lazily allocated descriptor, the desired blocking mode and the
/// two native scratch buffers used to move bytes in and out of heap buffers.
///
/// The read and write scratch buffers are never shared, so interleaving reads and writes on the
/// same channel can not clobber in flight data.
#[derive(Debug)]
pub struct SocketChannelBase {
    holder: DescriptorHolder,
    blocking: bool,
    tmp_read: Option<ByteBuffer>,
    tmp_write: Option<ByteBuffer>,
}

impl SocketChannelBase {
    pub(crate) fn new() -> SocketChannelBase {
        SocketChannelBase {
            holder: DescriptorHolder::new(),
            blocking: true,
            tmp_read: None,
            tmp_write: None,
        }
    }

    pub(crate) fn from_fd(fd: OwnedFd, blocking: bool) -> SocketChannelBase {
        SocketChannelBase {
            holder: DescriptorHolder::from_descriptor(fd),
            blocking,
            tmp_read: None,
            tmp_write: None,
        }
    }

    /// The channel's descriptor, or [Error::State] if it is not allocated yet or already closed.
    pub fn fd(&self) -> Result<RawFd> {
        self.holder.fd()
    }

    pub(crate) fn owned(&self) -> Result<&OwnedFd> {
        self.holder.get()
    }

    /// Return the descriptor, creating a socket of the given family on first use with the
    /// currently configured blocking mode.
    pub(crate) fn acquire(&mut self, family: AddressFamily) -> Result<RawFd> {
        let blocking = self.blocking;
        self.holder
            .get_or_acquire(|| socket::stream_socket(family, blocking))
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Switch between blocking and non-blocking mode. If no descriptor has been allocated yet the
    /// mode is remembered and applied when it is.
    pub fn configure_blocking(&mut self, blocking: bool) -> Result<()> {
        if self.holder.is_closed() {
            return Err(Error::State("channel is closed"));
        }

        if self.holder.has_descriptor() {
            socket::set_blocking(self.holder.fd()?, blocking)?;
        }
        self.blocking = blocking;
        Ok(())
    }

    pub fn read(&mut self, buffer: &mut ByteBuffer) -> Result<ReadOutcome> {
        let fd = self.holder.fd()?;
        let size = buffer.remaining();
        if size == 0 {
            return Ok(ReadOutcome::Read(0));
        }

        let received = if buffer.is_direct() {
            let received = socket::recv_some(fd, buffer.remaining_slice_mut()?)?;
            if let Some(n) = received {
                buffer.advance(n);
            }
            received
        } else {
            let tmp = scratch(&mut self.tmp_read, size)?;
            tmp.set_limit(size)?;

            let received = socket::recv_some(fd, tmp.remaining_slice_mut()?)?;
            if let Some(n) = received.filter(|n| *n > 0) {
                tmp.set_limit(n)?;
                buffer.put_buffer(tmp)?;
            }
            received
        };

        let outcome = match received {
            Some(0) => ReadOutcome::EndOfStream,
            Some(n) => ReadOutcome::Read(n),
            None => ReadOutcome::WouldBlock,
        };
        trace!(fd, ?outcome, "read");
        Ok(outcome)
    }

    pub fn write(&mut self, buffer: &mut ByteBuffer) -> Result<usize> {
        let fd = self.holder.fd()?;
        let size = buffer.remaining();
        if size == 0 {
            return Ok(0);
        }

        let sent = if buffer.is_direct() {
            socket::send_some(fd, buffer.remaining_slice()?)?
        } else {
            let tmp = scratch(&mut self.tmp_write, size)?;
            tmp.put_slice(buffer.remaining_slice()?)?;
            tmp.flip();
            socket::send_some(fd, tmp.remaining_slice()?)?
        };

        let sent = sent.unwrap_or(0);
        buffer.advance(sent);
        trace!(fd, sent, "write");
        Ok(sent)
    }

    pub fn is_open(&self) -> bool {
        !self.holder.is_closed()
    }

    /// Release the descriptor and both scratch buffers. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if let Ok(fd) = self.holder.fd() {
            debug!(fd, "closing channel");
        }
        self.holder.close();

        for tmp in [self.tmp_read.take(), self.tmp_write.take()].iter_mut().flatten() {
            tmp.close();
        }
    }
}

impl AsRawFd for SocketChannelBase {
    /// Returns `-1` while no descriptor is owned, see [SocketChannelBase::fd] for the fallible
    /// version.
    fn as_raw_fd(&self) -> RawFd {
        self.holder.fd().unwrap_or(-1)
    }
}

/// Return the scratch buffer in `slot`, replacing it with a larger one if it can't hold `size`
/// bytes. The returned buffer is always cleared.
fn scratch(slot: &mut Option<ByteBuffer>, size: usize) -> Result<&mut ByteBuffer> {
    if slot.as_ref().map_or(true, |buf| buf.capacity() < size) {
        if let Some(mut old) = slot.take() {
            old.close();
        }
        trace!(size, "allocating scratch buffer");
        *slot = Some(ByteBuffer::allocate_direct(size)?);
    }

    let buf = slot
        .as_mut()
        .ok_or(Error::State("scratch buffer missing"))?;
    buf.clear();
    Ok(buf)
}
