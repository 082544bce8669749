// Fluxion
// Copyright (c) 2026 The Project Fluxion Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable byte-level I/O for container
//! readers.
//!
//! A [`SourceStream`] consumes any [`MediaSource`] and exposes the
//! [`ReadBytes`] interface while tracking the absolute stream position. A
//! [`MonitorStream`] wraps any `ReadBytes` implementation and forwards every
//! byte read to a [`Monitor`], which is how checksums are computed over
//! exactly the bytes a reader consumed.

use std::io;
use std::io::{Read, Seek, SeekFrom};

use crate::errors::Result;

/// A `MediaSource` is a composite trait of `std::io::Read` and
/// `std::io::Seek`. Seeking is an optional capability and support for it can
/// be queried at runtime.
pub trait MediaSource: Read + Seek {
    /// Returns if the source is seekable. This may be an expensive operation.
    fn is_seekable(&self) -> bool;

    /// Returns the length in bytes, if available. This may be an expensive
    /// operation.
    fn byte_len(&self) -> Option<u64>;
}

impl MediaSource for std::fs::File {
    /// Returns if the `std::fs::File` backing the `MediaSource` is seekable.
    ///
    /// Note: This operation involves querying the underlying file descriptor
    /// for information and may be moderately expensive. Therefore it is
    /// recommended to cache this value if used often.
    fn is_seekable(&self) -> bool {
        // If the file's metadata is available, and the file is a regular file
        // (i.e., not a FIFO, etc.), then the MediaSource will be seekable.
        // Otherwise assume it is not. Note that metadata() follows symlinks.
        match self.metadata() {
            Ok(metadata) => metadata.is_file(),
            _ => false,
        }
    }

    /// Returns the length in bytes of the `std::fs::File` backing the
    /// `MediaSource`.
    fn byte_len(&self) -> Option<u64> {
        match self.metadata() {
            Ok(metadata) => Some(metadata.len()),
            _ => None,
        }
    }
}

impl<T: AsRef<[u8]>> MediaSource for io::Cursor<T> {
    /// Always returns true since a `io::Cursor<u8>` is always seekable.
    fn is_seekable(&self) -> bool {
        true
    }

    /// Returns the length in bytes of the `io::Cursor<u8>` backing the
    /// `MediaSource`.
    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// `ReadBytes` provides methods to read bytes and interpret them as little-
/// or big-endian unsigned integers of standard widths.
pub trait ReadBytes {
    /// Reads a single byte from the stream and returns it or an error.
    fn read_byte(&mut self) -> Result<u8>;

    /// Reads four bytes from the stream and returns them in read-order or an
    /// error.
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]>;

    /// Reads exactly the number of bytes required to fill the provided buffer
    /// or returns an error.
    fn read_buf_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Ignores the specified number of bytes from the stream or returns an
    /// error.
    fn ignore_bytes(&mut self, count: u64) -> Result<()>;

    /// Gets the position of the stream.
    fn pos(&self) -> u64;

    /// Reads a single unsigned byte from the stream and returns it or an
    /// error.
    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Reads two bytes from the stream and interprets them as an unsigned
    /// 16-bit little-endian integer or returns an error.
    #[inline(always)]
    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_buf_bytes(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads three bytes from the stream and interprets them as an unsigned
    /// 24-bit little-endian integer or returns an error.
    #[inline(always)]
    fn read_u24(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_buf_bytes(&mut buf[0..3])?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned
    /// 32-bit little-endian integer or returns an error.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads four bytes from the stream and interprets them as a signed
    /// 32-bit little-endian integer or returns an error.
    #[inline(always)]
    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_quad_bytes()?))
    }

    /// Reads two bytes from the stream and interprets them as an unsigned
    /// 16-bit big-endian integer or returns an error.
    #[inline(always)]
    fn read_be_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_buf_bytes(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned
    /// 32-bit big-endian integer or returns an error.
    #[inline(always)]
    fn read_be_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_quad_bytes()?))
    }
}

impl<'a, B: ReadBytes> ReadBytes for &'a mut B {
    fn read_byte(&mut self) -> Result<u8> {
        (*self).read_byte()
    }

    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        (*self).read_quad_bytes()
    }

    fn read_buf_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        (*self).read_buf_bytes(buf)
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        (*self).ignore_bytes(count)
    }

    fn pos(&self) -> u64 {
        (**self).pos()
    }
}

/// A `SourceStream` is a position-tracking stream over a [`MediaSource`].
pub struct SourceStream {
    inner: Box<dyn MediaSource>,
    pos: u64,
}

impl SourceStream {
    pub fn new(inner: Box<dyn MediaSource>) -> SourceStream {
        SourceStream { inner, pos: 0 }
    }

    /// Returns if the underlying source is seekable.
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// Returns the length of the underlying source in bytes, if available.
    pub fn byte_len(&self) -> Option<u64> {
        self.inner.byte_len()
    }

    /// Seeks to the given absolute position in the stream.
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        self.pos = self.inner.seek(SeekFrom::Start(pos))?;
        Ok(self.pos)
    }
}

impl ReadBytes for SourceStream {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        self.pos += 1;
        Ok(buf[0])
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        self.pos += 4;
        Ok(buf)
    }

    fn read_buf_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        if self.inner.is_seekable() {
            self.pos = self.inner.seek(SeekFrom::Current(count as i64))?;
        }
        else {
            let mut buf = [0u8; 1024];
            let mut remaining = count;
            while remaining > 0 {
                let len = remaining.min(buf.len() as u64) as usize;
                self.inner.read_exact(&mut buf[..len])?;
                self.pos += len as u64;
                remaining -= len as u64;
            }
        }
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }
}

/// A `Monitor` provides a common interface to observe the bytes read from a
/// stream.
pub trait Monitor {
    fn process_byte(&mut self, byte: u8);

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.process_byte(byte);
        }
    }
}

/// A `MonitorStream` is a passive stream wrapper that observes all bytes read
/// from the inner stream and forwards them to a [`Monitor`].
pub struct MonitorStream<B: ReadBytes, M: Monitor> {
    inner: B,
    monitor: M,
}

impl<B: ReadBytes, M: Monitor> MonitorStream<B, M> {
    pub fn new(inner: B, monitor: M) -> MonitorStream<B, M> {
        MonitorStream { inner, monitor }
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut M {
        &mut self.monitor
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: ReadBytes, M: Monitor> ReadBytes for MonitorStream<B, M> {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        let byte = self.inner.read_byte()?;
        self.monitor.process_byte(byte);
        Ok(byte)
    }

    #[inline(always)]
    fn read_quad_bytes(&mut self) -> Result<[u8; 4]> {
        let bytes = self.inner.read_quad_bytes()?;
        self.monitor.process_buf_bytes(&bytes);
        Ok(bytes)
    }

    fn read_buf_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_buf_bytes(buf)?;
        self.monitor.process_buf_bytes(buf);
        Ok(())
    }

    fn ignore_bytes(&mut self, count: u64) -> Result<()> {
        self.inner.ignore_bytes(count)
    }

    fn pos(&self) -> u64 {
        self.inner.pos()
    }
}
