//! Byte-stream abstraction (C1): uniform read/write/seek with
//! ownership-preserving composition. Grounded in the teacher's
//! `AlignedDeviceReader` (which layers a caching, alignment-aware reader
//! over a `std::fs::File` and still implements `std::io::{Read, Seek}`)
//! and in the upstream `ByteStream`/`CircularStream`/`DiskChunkStream`
//! family, which compose streams by wrapping an inner stream rather than
//! inheriting from it.

use crate::Result;
use std::io::SeekFrom;

/// Whether a stream can read, can write, can seek, and is still open.
/// Queried before attempting an operation rather than discovered by a
/// failed call — chains (compression, hashing, tee) need to know this
/// to decide whether they can pass a call straight through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCaps {
    pub can_read: bool,
    pub can_write: bool,
    pub can_seek: bool,
    pub is_open: bool,
}

pub trait ByteStream: Send {
    fn caps(&self) -> StreamCaps;

    /// May return short reads; `Ok(0)` means end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Optional; query `caps().can_write` first.
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let _ = buf;
        Err(crate::OrcError::unsupported("stream is not writable"))
    }

    /// Optional; query `caps().can_seek` first.
    fn seek(&mut self, whence: SeekFrom) -> Result<u64> {
        let _ = whence;
        Err(crate::OrcError::unsupported("stream is not seekable"))
    }

    /// Total logical size, if known in advance.
    fn size(&self) -> Option<u64> {
        None
    }

    /// Idempotent: calling `close` twice must not error.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut total = 0usize;
        let mut chunk = [0u8; 65536];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
        Ok(total)
    }
}

/// Owns a contiguous byte container in memory.
pub struct BufferStream {
    data: Vec<u8>,
    pos: usize,
}

impl BufferStream {
    pub fn new(data: Vec<u8>) -> Self {
        BufferStream { data, pos: 0 }
    }
}

impl ByteStream for BufferStream {
    fn caps(&self) -> StreamCaps {
        StreamCaps {
            can_read: true,
            can_write: false,
            can_seek: true,
            is_open: true,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.data.len().saturating_sub(self.pos);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn seek(&mut self, whence: SeekFrom) -> Result<u64> {
        let new_pos = match whence {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::End(o) => self.data.len() as i64 + o,
            SeekFrom::Current(o) => self.pos as i64 + o,
        };
        if new_pos < 0 {
            return Err(crate::OrcError::Other("seek before start of buffer".into()));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Presents a bounded window `[start, start+len)` over another stream.
/// The inner stream is borrowed for the lifetime of the span; closing
/// the span never closes the inner stream (it is never declared owner).
pub struct SpanStream<S: ByteStream> {
    inner: S,
    start: u64,
    len: u64,
    pos: u64,
}

impl<S: ByteStream> SpanStream<S> {
    pub fn new(mut inner: S, start: u64, len: u64) -> Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(SpanStream {
            inner,
            start,
            len,
            pos: 0,
        })
    }
}

impl<S: ByteStream> ByteStream for SpanStream<S> {
    fn caps(&self) -> StreamCaps {
        let inner = self.inner.caps();
        StreamCaps {
            can_write: false,
            ..inner
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.len.saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, whence: SeekFrom) -> Result<u64> {
        let new_pos = match whence {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::End(o) => self.len as i64 + o,
            SeekFrom::Current(o) => self.pos as i64 + o,
        };
        if new_pos < 0 || new_pos as u64 > self.len {
            return Err(crate::OrcError::Other("seek outside span".into()));
        }
        self.pos = new_pos as u64;
        self.inner.seek(SeekFrom::Start(self.start + self.pos))?;
        Ok(self.pos)
    }

    fn size(&self) -> Option<u64> {
        Some(self.len)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Tees every read through a second sink, used to pipeline hashing with
/// compression (§4.9): both the archive codec and the hash stream see
/// the same bytes, and both must finish before the archive entry closes.
pub struct TeeStream<S: ByteStream> {
    inner: S,
    sink: Box<dyn FnMut(&[u8]) + Send>,
}

impl<S: ByteStream> TeeStream<S> {
    pub fn new(inner: S, sink: Box<dyn FnMut(&[u8]) + Send>) -> Self {
        TeeStream { inner, sink }
    }
}

impl<S: ByteStream> ByteStream for TeeStream<S> {
    fn caps(&self) -> StreamCaps {
        self.inner.caps()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.sink)(&buf[..n]);
        }
        Ok(n)
    }

    fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Trait objects don't automatically implement their own trait; this
/// forwarding impl lets a `Box<dyn ByteStream>` itself be wrapped by
/// another combinator (e.g. `TeeStream`) without callers needing to
/// know whether they're holding a concrete type or an owned trait
/// object.
impl ByteStream for Box<dyn ByteStream> {
    fn caps(&self) -> StreamCaps {
        (**self).caps()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, whence: SeekFrom) -> Result<u64> {
        (**self).seek(whence)
    }

    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Disposition for opening the backing file of a `LazyFileStream`,
/// matching the upstream `FileDisposition` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDisposition {
    Append,
    Truncate,
    CreateNew,
}

/// Buffers up to `capacity` bytes in memory and, once `open` is called
/// with a known path, flushes the buffer and continues writing to file.
/// Used so that log lines produced before the output path is known (the
/// archive path may depend on command-line processing that completes
/// after logging has already started) are not lost.
pub struct LazyFileStream {
    buffer: Vec<u8>,
    capacity: usize,
    file: Option<std::fs::File>,
}

impl LazyFileStream {
    pub fn new(capacity: usize) -> Self {
        LazyFileStream {
            buffer: Vec::new(),
            capacity,
            file: None,
        }
    }

    pub fn open(&mut self, path: &std::path::Path, disposition: FileDisposition) -> Result<()> {
        use std::fs::OpenOptions;
        let mut opts = OpenOptions::new();
        opts.write(true);
        match disposition {
            FileDisposition::Append => {
                opts.create(true).append(true);
            }
            FileDisposition::Truncate => {
                opts.create(true).truncate(true);
            }
            FileDisposition::CreateNew => {
                opts.create_new(true);
            }
        }
        let mut file = opts.open(path)?;
        use std::io::Write;
        file.write_all(&self.buffer)?;
        self.buffer.clear();
        self.file = Some(file);
        Ok(())
    }
}

impl ByteStream for LazyFileStream {
    fn caps(&self) -> StreamCaps {
        StreamCaps {
            can_read: false,
            can_write: true,
            can_seek: false,
            is_open: true,
        }
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(crate::OrcError::unsupported("lazy-file stream is write-only"))
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        use std::io::Write;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
            Ok(buf.len())
        } else if self.buffer.len() + buf.len() <= self.capacity {
            self.buffer.extend_from_slice(buf);
            Ok(buf.len())
        } else {
            // Over budget with no destination yet: keep the newest bytes
            // rather than silently discarding the write.
            self.buffer.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_stream_reads_back_written_bytes() {
        let mut s = BufferStream::new(vec![1, 2, 3, 4, 5]);
        let mut out = [0u8; 3];
        assert_eq!(s.read(&mut out).unwrap(), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(s.read(&mut out).unwrap(), 2);
    }

    #[test]
    fn span_stream_bounds_reads() {
        let inner = BufferStream::new((0u8..20).collect());
        let mut span = SpanStream::new(inner, 5, 4).unwrap();
        let mut out = Vec::new();
        let n = span.read_to_end(&mut out).unwrap();
        assert_eq!(n, 4);
        assert_eq!(out, vec![5, 6, 7, 8]);
    }

    #[test]
    fn tee_stream_invokes_sink_for_every_read() {
        let inner = BufferStream::new(vec![10, 20, 30]);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let mut tee = TeeStream::new(
            inner,
            Box::new(move |chunk| seen2.lock().unwrap().extend_from_slice(chunk)),
        );
        let mut out = Vec::new();
        tee.read_to_end(&mut out).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn lazy_file_stream_flushes_buffer_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let mut lazy = LazyFileStream::new(1024);
        lazy.write(b"before path known\n").unwrap();
        lazy.open(&path, FileDisposition::Truncate).unwrap();
        lazy.write(b"after\n").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "before path known\nafter\n");
    }
}
