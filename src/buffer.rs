//! Read-ahead buffering over the input stream.
//!
//! The decoder reads through the [`ByteSource`] trait so the same code runs
//! over a [`BufferedReader`] (the default) or a [`RawReader`] that goes to the
//! underlying stream for every request.

use std::io::{ErrorKind as IoErrorKind, Read};

use crate::error::{ConvertError, ConvertResult};

/// Default read-ahead capacity in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 65_536;

/// Smallest capacity accepted; fixed-width fields must fit in one view.
pub const MIN_BUFFER_SIZE: usize = 16;

/// Forward-only byte input with offset tracking.
pub trait ByteSource {
    /// Fill `out` completely. End of stream before that is truncation.
    fn read_exact(&mut self, out: &mut [u8]) -> ConvertResult<()>;

    /// True when the stream has no more bytes.
    fn at_eof(&mut self) -> ConvertResult<bool>;

    /// Bytes consumed so far.
    fn offset(&self) -> u64;

    /// Read a fixed-size array.
    fn read_array<const N: usize>(&mut self) -> ConvertResult<[u8; N]>
    where
        Self: Sized,
    {
        let mut out = [0u8; N];
        self.read_exact(&mut out)?;
        Ok(out)
    }

    /// Discard `n` bytes.
    fn skip(&mut self, n: usize) -> ConvertResult<()>
    where
        Self: Sized,
    {
        let mut scratch = [0u8; 512];
        let mut remaining = n;
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            self.read_exact(&mut scratch[..take])?;
            remaining -= take;
        }
        Ok(())
    }
}

/// Fixed-capacity read-ahead buffer over a borrowed or owned reader.
///
/// The buffer owns its storage; the cursor `pos` walks the valid region
/// `buf[..filled]` and the reader is only touched once that region is used up.
pub struct BufferedReader<R> {
    inner: R,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    consumed: u64,
    eof: bool,
}

impl<R: Read> BufferedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, inner)
    }

    /// Capacities below [`MIN_BUFFER_SIZE`] are raised to it.
    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        let capacity = capacity.max(MIN_BUFFER_SIZE);
        Self {
            inner,
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
            filled: 0,
            consumed: 0,
            eof: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Valid bytes not yet consumed.
    pub fn available(&self) -> usize {
        self.filled - self.pos
    }

    /// Read more bytes from the underlying stream.
    ///
    /// Unconsumed bytes are moved to the front before reading, so content is
    /// only replaced once the cursor has passed it. Returns the number of new
    /// bytes; zero means end of stream (or a full buffer).
    pub fn refill(&mut self) -> ConvertResult<usize> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
        if self.eof || self.filled == self.buf.len() {
            return Ok(0);
        }
        loop {
            match self.inner.read(&mut self.buf[self.filled..]) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(0);
                }
                Ok(n) => {
                    self.filled += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => {
                    let offset = self.consumed + self.available() as u64;
                    return Err(ConvertError::io(offset, e));
                }
            }
        }
    }

    pub fn next_byte(&mut self) -> ConvertResult<u8> {
        if self.pos == self.filled && self.refill()? == 0 {
            return Err(ConvertError::truncated(self.consumed, 1));
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        self.consumed += 1;
        Ok(byte)
    }

    /// Borrow the next `n` bytes straight out of the buffer.
    ///
    /// `n` may not exceed the capacity; larger reads go through
    /// [`ByteSource::read_exact`].
    pub fn next_bytes(&mut self, n: usize) -> ConvertResult<&[u8]> {
        if n > self.buf.len() {
            return Err(ConvertError::format(
                self.consumed,
                format!(
                    "cannot view {} bytes through a {}-byte buffer",
                    n,
                    self.buf.len()
                ),
            ));
        }
        while self.available() < n {
            if self.refill()? == 0 {
                return Err(ConvertError::truncated(
                    self.consumed + self.available() as u64,
                    n - self.available(),
                ));
            }
        }
        let start = self.pos;
        self.pos += n;
        self.consumed += n as u64;
        Ok(&self.buf[start..start + n])
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for BufferedReader<R> {
    fn read_exact(&mut self, out: &mut [u8]) -> ConvertResult<()> {
        let mut copied = 0;
        while copied < out.len() {
            if self.available() == 0 && self.refill()? == 0 {
                return Err(ConvertError::truncated(self.consumed, out.len() - copied));
            }
            let take = self.available().min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            self.consumed += take as u64;
            copied += take;
        }
        Ok(())
    }

    fn at_eof(&mut self) -> ConvertResult<bool> {
        if self.available() > 0 {
            return Ok(false);
        }
        Ok(self.refill()? == 0)
    }

    fn offset(&self) -> u64 {
        self.consumed
    }
}

/// Unbuffered source: every request goes to the underlying reader.
pub struct RawReader<R> {
    inner: R,
    peeked: Option<u8>,
    consumed: u64,
}

impl<R: Read> RawReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            peeked: None,
            consumed: 0,
        }
    }

    fn read_some(&mut self, out: &mut [u8]) -> ConvertResult<usize> {
        loop {
            match self.inner.read(out) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(ConvertError::io(self.consumed, e)),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for RawReader<R> {
    fn read_exact(&mut self, out: &mut [u8]) -> ConvertResult<()> {
        let mut copied = 0;
        if !out.is_empty() {
            if let Some(byte) = self.peeked.take() {
                out[0] = byte;
                copied = 1;
                self.consumed += 1;
            }
        }
        while copied < out.len() {
            let n = self.read_some(&mut out[copied..])?;
            if n == 0 {
                return Err(ConvertError::truncated(self.consumed, out.len() - copied));
            }
            copied += n;
            self.consumed += n as u64;
        }
        Ok(())
    }

    fn at_eof(&mut self) -> ConvertResult<bool> {
        if self.peeked.is_some() {
            return Ok(false);
        }
        let mut byte = [0u8; 1];
        if self.read_some(&mut byte)? == 0 {
            return Ok(true);
        }
        self.peeked = Some(byte[0]);
        Ok(false)
    }

    fn offset(&self) -> u64 {
        self.consumed
    }
}
