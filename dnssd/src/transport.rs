//! The daemon socket: framed reads, synchronized writes, and a cross-thread wake-up.

use crate::config::ConnectionConfig;
use crate::wire::{Frame, FrameDecoder};
use crate::{Result, ffi};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// What became ready during [`Transport::wait()`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// The socket has data, or has hung up
    pub readable: bool,
    /// [`Waker::wake()`] was called
    pub woken: bool,
}

/// The read half of the connection plus the frames reassembled from it.
#[derive(Debug)]
pub struct Transport {
    stream: UnixStream,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

/// The write half of the connection.
#[derive(Debug)]
pub struct TransportWriter {
    stream: UnixStream,
}

impl Transport {
    /// Splits `stream` into its read and write halves.
    pub fn new(stream: UnixStream, config: &ConnectionConfig) -> Result<(Self, TransportWriter)> {
        let writer = stream.try_clone()?;
        writer.set_write_timeout(*config.write_timeout())?;

        let transport = Self {
            stream,
            decoder: FrameDecoder::new(),
            chunk: vec![0; *config.read_chunk()],
        };

        Ok((transport, TransportWriter { stream: writer }))
    }

    /// Returns true if a complete frame (or a framing error) is already buffered.
    pub fn has_frame(&self) -> bool {
        self.decoder.has_frame()
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.decoder.next_frame()
    }

    /// Blocks up to `timeout` until the socket is readable or `waker` is woken.
    pub fn wait(&self, waker: &Waker, timeout: Duration) -> Result<Readiness> {
        let ready = ffi::poll_readable(&[self.stream.as_raw_fd(), waker.as_raw_fd()], timeout)?;

        Ok(Readiness {
            readable: ready[0],
            woken: ready[1],
        })
    }

    /// Returns true if a read would not block.
    pub fn readable_now(&self) -> Result<bool> {
        Ok(ffi::poll_readable(&[self.stream.as_raw_fd()], Duration::ZERO)?[0])
    }

    /// Performs one read into the frame buffer. Only call once the socket is readable.
    ///
    /// Returns the number of bytes read; end of stream is reported as `Error::Transport`.
    pub fn fill(&mut self) -> Result<usize> {
        loop {
            match self.stream.read(&mut self.chunk) {
                Ok(0) => return Err(crate::Error::connection_closed()),
                Ok(n) => {
                    trace!("read {n} bytes from daemon");
                    self.decoder.extend(&self.chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl AsRawFd for Transport {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl TransportWriter {
    /// Writes `frame` in full.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.to_bytes();
        trace!(
            "writing op {} for context {} ({} bytes)",
            frame.header.op,
            frame.context(),
            bytes.len()
        );
        self.stream.write_all(&bytes)?;
        Ok(())
    }
}

/// Interrupts a blocked [`Transport::wait()`] from another thread.
#[derive(Debug)]
pub struct Waker {
    reader: UnixStream,
    writer: UnixStream,
}

impl Waker {
    pub fn new() -> Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Makes the next (or current) wait return. Wake-ups do not queue up beyond the socket's
    /// buffer; a full buffer already guarantees a pending wake-up.
    pub fn wake(&self) -> Result<()> {
        match (&self.writer).write(&[1]) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Consumes pending wake-ups.
    pub fn drain(&self) -> Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }
}
