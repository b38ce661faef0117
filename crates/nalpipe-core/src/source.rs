//! # Stream Source
//!
//! Byte-oriented input with a bounded read deadline. Timeouts are reported
//! as data, not as errors, so the demuxer can poll cancellation between
//! reads without confusing an idle stream with a broken one.

use std::io::{self, Read};
use std::net::TcpStream;
use std::time::Duration;

/// Result of one bounded-wait read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n > 0` bytes were written to the front of the buffer.
    Data(usize),
    /// The peer closed the stream.
    EndOfStream,
    /// No data arrived within the read deadline.
    TimedOut,
}

/// A readable endpoint with a bounded-wait read.
pub trait StreamSource: Send {
    /// Read into `buf` (never empty). Hard transport failures are `Err`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome>;
}

impl<S: StreamSource + ?Sized> StreamSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        (**self).read(buf)
    }
}

/// Adapts any [`Read`] whose deadline surfaces as `WouldBlock` / `TimedOut`
/// (sockets with `set_read_timeout`) into a [`StreamSource`].
pub struct TimeoutReader<R> {
    inner: R,
}

impl<R: Read + Send> TimeoutReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl TimeoutReader<TcpStream> {
    /// Wrap a connected socket, applying `io_timeout` as its read deadline.
    pub fn tcp(stream: TcpStream, io_timeout: Duration) -> io::Result<Self> {
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<R: Read + Send> StreamSource for TimeoutReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match self.inner.read(buf) {
            Ok(0) => Ok(ReadOutcome::EndOfStream),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    Ok(ReadOutcome::TimedOut)
                }
                _ => Err(e),
            },
        }
    }
}
