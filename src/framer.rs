//! Framed views over the underlying octet stream: logical position
//! tracking, bounded-length overlays, alignment padding, and mark/rewind
//! for the operations that need to revisit earlier octets.

use crate::{compute::Accumulator, error::Error};
use byteordered::{Endian, Endianness};
use std::io::{self, Read, Seek, SeekFrom, Write};

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek + ?Sized> ReadSeek for T {}

pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek + ?Sized> WriteSeek for T {}

/// Adapter that lets a non-seekable stream flow through the engine.
///
/// Position queries succeed (the adapter tracks them); any actual seek
/// reports `Unsupported`, which the framer surfaces as
/// [`Error::NotSeekable`] from whichever operation required the rewind.
#[derive(Debug)]
pub struct NoSeek<T> {
    inner: T,
    pos: u64,
}

impl<T> NoSeek<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read> Read for NoSeek<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<T: Write> Write for NoSeek<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T> Seek for NoSeek<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.pos),
            SeekFrom::Start(p) if p == self.pos => Ok(self.pos),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream does not support seeking",
            )),
        }
    }
}

/// One bounded-length overlay.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
struct Frame {
    start: u64,
    end: u64,
}

const PAD_CHUNK: [u8; 64] = [0; 64];

/// Write half of the stream framer.
pub struct FramedWriter<'a> {
    inner: &'a mut dyn WriteSeek,
    pos: u64,
    limits: Vec<Frame>,
    taps: Vec<Vec<Accumulator>>,
}

impl<'a> FramedWriter<'a> {
    pub fn new(inner: &'a mut dyn WriteSeek) -> Result<Self, Error> {
        let pos = inner.stream_position().map_err(Error::Io)?;
        Ok(Self {
            inner,
            pos,
            limits: Vec::new(),
            taps: Vec::new(),
        })
    }

    /// Logical absolute position (octets).
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Octets remaining in the innermost bounded overlay, if any.
    pub fn remaining(&self) -> Option<u64> {
        self.limits.last().map(|f| f.end.saturating_sub(self.pos))
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if let Some(frame) = self.limits.last() {
            if self.pos + bytes.len() as u64 > frame.end {
                return Err(Error::Overflow {
                    natural: self.pos + bytes.len() as u64 - frame.start,
                    bound: frame.end - frame.start,
                });
            }
        }
        for taps in self.taps.iter_mut() {
            for acc in taps.iter_mut() {
                acc.update(bytes);
            }
        }
        self.inner
            .write_all(bytes)
            .map_err(|e| Error::from_io(e, self.pos))?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    /// Enter a bounded-length overlay of `len` octets.
    pub fn push_limit(&mut self, len: u64) {
        self.limits.push(Frame {
            start: self.pos,
            end: self.pos + len,
        });
    }

    /// Leave the innermost overlay, zero-padding up to its boundary.
    pub fn pop_limit(&mut self) -> Result<(), Error> {
        let end = match self.limits.last() {
            Some(f) => f.end,
            None => return Ok(()),
        };
        self.pad_to(end)?;
        self.limits.pop();
        Ok(())
    }

    fn pad_to(&mut self, end: u64) -> Result<(), Error> {
        while self.pos < end {
            let n = usize::min((end - self.pos) as usize, PAD_CHUNK.len());
            self.write_all(&PAD_CHUNK[..n])?;
        }
        Ok(())
    }

    /// Emit zero octets until the position is a multiple of `multiple`.
    pub fn align(&mut self, multiple: u64) -> Result<(), Error> {
        if multiple <= 1 {
            return Ok(());
        }
        let rem = self.pos % multiple;
        if rem != 0 {
            let padding = multiple - rem;
            tracing::trace!(multiple, pos = self.pos, padding, "Aligning writer");
            self.pad_to(self.pos + padding)?;
        }
        Ok(())
    }

    pub fn mark(&self) -> u64 {
        self.pos
    }

    /// Move to an absolute offset. Seekable streams only.
    pub fn seek_to(&mut self, offset: u64, operation: &'static str) -> Result<(), Error> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| seek_error(e, operation))?;
        self.pos = offset;
        Ok(())
    }

    /// Overwrite `bytes` at an earlier `offset`, then return to the
    /// current position. Bypasses overlays and taps; used for computed
    /// write-back. Seekable streams only.
    pub fn patch(&mut self, offset: u64, bytes: &[u8], operation: &'static str) -> Result<(), Error> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| seek_error(e, operation))?;
        self.inner
            .write_all(bytes)
            .map_err(|e| Error::from_io(e, offset))?;
        self.inner
            .seek(SeekFrom::Start(self.pos))
            .map_err(|e| seek_error(e, operation))?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.inner.flush().map_err(|e| Error::from_io(e, self.pos))
    }

    pub(crate) fn push_taps(&mut self, accumulators: Vec<Accumulator>) {
        self.taps.push(accumulators);
    }

    pub(crate) fn pop_taps(&mut self) -> Vec<Accumulator> {
        self.taps.pop().unwrap_or_default()
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), Error> {
        self.write_all(&[v])
    }

    pub fn write_i8(&mut self, v: i8) -> Result<(), Error> {
        self.write_all(&[v as u8])
    }

    pub fn write_u16(&mut self, v: u16, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 2];
        e.write_u16(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_i16(&mut self, v: i16, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 2];
        e.write_i16(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_u32(&mut self, v: u32, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 4];
        e.write_u32(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_i32(&mut self, v: i32, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 4];
        e.write_i32(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_u64(&mut self, v: u64, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 8];
        e.write_u64(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_i64(&mut self, v: i64, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 8];
        e.write_i64(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_f32(&mut self, v: f32, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 4];
        e.write_f32(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }

    pub fn write_f64(&mut self, v: f64, e: Endianness) -> Result<(), Error> {
        let mut buf = [0_u8; 8];
        e.write_f64(&mut buf[..], v).map_err(Error::Io)?;
        self.write_all(&buf)
    }
}

impl std::fmt::Debug for FramedWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedWriter")
            .field("pos", &self.pos)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Read half of the stream framer.
pub struct FramedReader<'a> {
    inner: &'a mut dyn ReadSeek,
    pos: u64,
    limits: Vec<Frame>,
}

impl<'a> FramedReader<'a> {
    pub fn new(inner: &'a mut dyn ReadSeek) -> Result<Self, Error> {
        let pos = inner.stream_position().map_err(Error::Io)?;
        Ok(Self {
            inner,
            pos,
            limits: Vec::new(),
        })
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Octets remaining in the innermost bounded overlay, if any.
    pub fn remaining(&self) -> Option<u64> {
        self.limits.last().map(|f| f.end.saturating_sub(self.pos))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        if let Some(frame) = self.limits.last() {
            if self.pos + buf.len() as u64 > frame.end {
                return Err(Error::Underflow { offset: self.pos });
            }
        }
        self.inner
            .read_exact(buf)
            .map_err(|e| Error::from_io(e, self.pos))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Enter a bounded-length overlay of `len` octets.
    pub fn push_limit(&mut self, len: u64) {
        self.limits.push(Frame {
            start: self.pos,
            end: self.pos + len,
        });
    }

    /// Leave the innermost overlay, skipping up to its boundary.
    pub fn pop_limit(&mut self) -> Result<(), Error> {
        let end = match self.limits.last() {
            Some(f) => f.end,
            None => return Ok(()),
        };
        self.skip_to(end)?;
        self.limits.pop();
        Ok(())
    }

    fn skip_to(&mut self, end: u64) -> Result<(), Error> {
        let mut scratch = [0_u8; 64];
        while self.pos < end {
            let n = usize::min((end - self.pos) as usize, scratch.len());
            self.inner
                .read_exact(&mut scratch[..n])
                .map_err(|e| Error::from_io(e, self.pos))?;
            self.pos += n as u64;
        }
        Ok(())
    }

    /// Consume octets until the position is a multiple of `multiple`.
    pub fn align(&mut self, multiple: u64) -> Result<(), Error> {
        if multiple <= 1 {
            return Ok(());
        }
        let rem = self.pos % multiple;
        if rem != 0 {
            let padding = multiple - rem;
            tracing::trace!(multiple, pos = self.pos, padding, "Aligning reader");
            self.skip_to(self.pos + padding)?;
        }
        Ok(())
    }

    pub fn mark(&self) -> u64 {
        self.pos
    }

    /// Rewind to a previously marked position. Seekable streams only.
    pub fn rewind_to(&mut self, offset: u64, operation: &'static str) -> Result<(), Error> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .map_err(|e| seek_error(e, operation))?;
        self.pos = offset;
        Ok(())
    }

    /// Move to an absolute offset. Seekable streams only.
    pub fn seek_to(&mut self, offset: u64, operation: &'static str) -> Result<(), Error> {
        self.rewind_to(offset, operation)
    }

    /// Read to the end of the innermost overlay, or to end-of-stream when
    /// no overlay is active.
    pub fn read_to_limit(&mut self) -> Result<Vec<u8>, Error> {
        match self.remaining() {
            Some(n) => {
                let mut buf = vec![0_u8; n as usize];
                self.read_exact(&mut buf)?;
                Ok(buf)
            }
            None => {
                let mut buf = Vec::new();
                let n = self
                    .inner
                    .read_to_end(&mut buf)
                    .map_err(|e| Error::from_io(e, self.pos))?;
                self.pos += n as u64;
                Ok(buf)
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let mut buf = [0_u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self, e: Endianness) -> Result<u16, Error> {
        let mut buf = [0_u8; 2];
        self.read_exact(&mut buf)?;
        e.read_u16(&buf[..]).map_err(Error::Io)
    }

    pub fn read_i16(&mut self, e: Endianness) -> Result<i16, Error> {
        let mut buf = [0_u8; 2];
        self.read_exact(&mut buf)?;
        e.read_i16(&buf[..]).map_err(Error::Io)
    }

    pub fn read_u32(&mut self, e: Endianness) -> Result<u32, Error> {
        let mut buf = [0_u8; 4];
        self.read_exact(&mut buf)?;
        e.read_u32(&buf[..]).map_err(Error::Io)
    }

    pub fn read_i32(&mut self, e: Endianness) -> Result<i32, Error> {
        let mut buf = [0_u8; 4];
        self.read_exact(&mut buf)?;
        e.read_i32(&buf[..]).map_err(Error::Io)
    }

    pub fn read_u64(&mut self, e: Endianness) -> Result<u64, Error> {
        let mut buf = [0_u8; 8];
        self.read_exact(&mut buf)?;
        e.read_u64(&buf[..]).map_err(Error::Io)
    }

    pub fn read_i64(&mut self, e: Endianness) -> Result<i64, Error> {
        let mut buf = [0_u8; 8];
        self.read_exact(&mut buf)?;
        e.read_i64(&buf[..]).map_err(Error::Io)
    }

    pub fn read_f32(&mut self, e: Endianness) -> Result<f32, Error> {
        let mut buf = [0_u8; 4];
        self.read_exact(&mut buf)?;
        e.read_f32(&buf[..]).map_err(Error::Io)
    }

    pub fn read_f64(&mut self, e: Endianness) -> Result<f64, Error> {
        let mut buf = [0_u8; 8];
        self.read_exact(&mut buf)?;
        e.read_f64(&buf[..]).map_err(Error::Io)
    }
}

impl std::fmt::Debug for FramedReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedReader")
            .field("pos", &self.pos)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

fn seek_error(e: io::Error, operation: &'static str) -> Error {
    if e.kind() == io::ErrorKind::Unsupported {
        Error::NotSeekable(operation)
    } else {
        Error::Io(e)
    }
}

/// Sink that discards octets but tracks how many were written; used to
/// measure the natural serialized length of a subtree.
#[derive(Debug, Default)]
pub(crate) struct CountingSink {
    len: u64,
}

impl Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
