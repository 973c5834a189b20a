//! Byte source abstraction over identification targets.
//!
//! The matching engine only needs two things from a target: its total length
//! and random-access byte reads. Everything else (windowing, caching) is the
//! reader's own business. Two implementations are provided: a zero-copy
//! memory-mapped reader for on-disk files (via `memmap2`, so multi-GB targets
//! cost nothing up front) and a plain slice reader for in-memory buffers and
//! tests.
//!
//! Reads past the end of the source return an `UnexpectedEof` error; the
//! engine treats those as "no match at this probe point" rather than a
//! failure, so a truncated file can never crash an identification run.

use std::fs::File;
use std::io;
use std::path::Path;

use memmap2::Mmap;

/// Random-access byte source over an identification target.
///
/// Implementations must be cheap to probe: the search algorithm reads single
/// bytes at widely scattered offsets.
pub trait ByteReader {
    /// Total number of bytes in the source.
    fn num_bytes(&self) -> u64;

    /// The byte at `position`. `UnexpectedEof` if `position` is past the end.
    fn byte_at(&self, position: u64) -> io::Result<u8>;
}

pub(crate) fn eof_error() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of byte source")
}

impl ByteReader for [u8] {
    fn num_bytes(&self) -> u64 {
        self.len() as u64
    }

    fn byte_at(&self, position: u64) -> io::Result<u8> {
        usize::try_from(position)
            .ok()
            .and_then(|pos| self.get(pos).copied())
            .ok_or_else(eof_error)
    }
}

impl<R: ByteReader + ?Sized> ByteReader for &R {
    fn num_bytes(&self) -> u64 {
        (**self).num_bytes()
    }

    fn byte_at(&self, position: u64) -> io::Result<u8> {
        (**self).byte_at(position)
    }
}

/// Memory-mapped reader over a whole file.
///
/// Safe to share across threads; the engine gives each identification worker
/// its own `FileBytes` while the compiled signature model is shared.
pub struct FileBytes {
    mmap: Option<Mmap>,
    len: u64,
}

impl FileBytes {
    /// Map `path` read-only. Empty files are represented without a mapping
    /// (mapping a zero-length file fails on some platforms).
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { mmap: None, len: 0 });
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap: Some(mmap), len })
    }

    /// The mapped bytes, empty for a zero-length file.
    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl ByteReader for FileBytes {
    fn num_bytes(&self) -> u64 {
        self.len
    }

    fn byte_at(&self, position: u64) -> io::Result<u8> {
        self.as_bytes().byte_at(position)
    }
}
