use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::{
    core::anchor::low_bits,
    error::{ReadError, Result},
    INDEX_EXTENSION,
};

/// Path of the anchor index belonging to a data file (`<data>.idx`)
#[must_use]
pub fn index_path<P: AsRef<Path>>(data_path: P) -> PathBuf {
    let mut path = data_path.as_ref().as_os_str().to_owned();
    path.push(".");
    path.push(INDEX_EXTENSION);
    PathBuf::from(path)
}

/// Closed k-mer interval sharing the first `prefix_len` symbols with `query`
///
/// Because symbol order coincides with numeric order the matching k-mers
/// form the contiguous range `[query & !mask, query | mask]`.
#[inline]
#[must_use]
pub fn prefix_interval(query: u64, k: u8, prefix_len: u8) -> (u64, u64) {
    if prefix_len >= k {
        return (query, query);
    }
    let mask = low_bits(u32::from(k - prefix_len) * 2);
    (query & !mask, query | mask)
}

/// Number of leading symbols `a` and `b` share when read as k-mers of length `k`
#[inline]
#[must_use]
pub fn shared_prefix_len(a: u64, b: u64, k: u8) -> u8 {
    let diff = a ^ b;
    if diff == 0 {
        return k;
    }
    let unused = 64 - u32::from(k) * 2;
    let lz = diff.leading_zeros().saturating_sub(unused);
    ((lz / 2) as u8).min(k)
}

/// The largest k-mer representable with `k` symbols
#[inline]
#[must_use]
pub fn max_kmer(k: u8) -> u64 {
    low_bits(u32::from(k) * 2)
}

/// A reader which tracks its byte position in the underlying stream
///
/// Short reads are reported as [`ReadError::BrokenFile`] carrying the
/// position at which the failed read started.
#[derive(Debug)]
pub struct PositionedReader<R> {
    inner: R,
    pos: u64,
}
impl<R: Read> PositionedReader<R> {
    pub fn new(inner: R, pos: u64) -> Self {
        Self { inner, pos }
    }

    /// Current byte position
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Overrides the tracked position (after seeking the inner reader)
    pub fn set_pos(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Fills `buf` entirely or fails with a broken-file error
    pub fn read_exact_checked(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.pos += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(ReadError::BrokenFile { pos: self.pos }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a little-endian u64 or fails with a broken-file error
    pub fn read_u64_checked(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_checked(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a single byte or fails with a broken-file error
    pub fn read_u8_checked(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact_checked(&mut buf)?;
        Ok(buf[0])
    }

    /// Discards exactly `n` bytes by reading through them
    pub fn skip_checked(&mut self, n: u64) -> Result<()> {
        let copied = io::copy(&mut self.inner.by_ref().take(n), &mut io::sink())?;
        if copied < n {
            return Err(ReadError::BrokenFile {
                pos: self.pos + copied,
            }
            .into());
        }
        self.pos += n;
        Ok(())
    }
}
impl<R: Read> Read for PositionedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}
