//! Purpose: Map logical ring offsets onto physical file segments and perform the I/O.
//! Exports: `Segment`, `WrapSpan`, `split`, `DataRegion`.
//! Role: `split` is the pure addressing layer; `DataRegion` applies it to the file.
//! Invariants: A span covers at most two segments; the second always starts at the data region.
//! Invariants: Short reads/writes surface as `Io` errors; nothing resumes a partial transfer.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::control::CONTROL_BLOCK_LEN;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment {
    pub physical_offset: u64,
    pub len: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WrapSpan {
    pub first: Segment,
    pub second: Option<Segment>,
}

impl WrapSpan {
    pub fn segments(&self) -> impl Iterator<Item = Segment> {
        std::iter::once(self.first).chain(self.second)
    }
}

/// Splits `len` bytes starting at `logical_offset` (taken mod `capacity`) into
/// physical segments. `len` must not exceed `capacity`.
pub fn split(logical_offset: u64, len: u64, capacity: u64) -> WrapSpan {
    debug_assert!(capacity > 0, "capacity must be non-zero");
    debug_assert!(len <= capacity, "span longer than the ring");
    let offset = logical_offset % capacity;
    let tail_room = capacity - offset;
    let base = CONTROL_BLOCK_LEN as u64;
    if len <= tail_room {
        return WrapSpan {
            first: Segment {
                physical_offset: base + offset,
                len,
            },
            second: None,
        };
    }
    WrapSpan {
        first: Segment {
            physical_offset: base + offset,
            len: tail_room,
        },
        second: Some(Segment {
            physical_offset: base,
            len: len - tail_room,
        }),
    }
}

/// The data region of a ring file, addressed by logical offset.
pub struct DataRegion {
    path: PathBuf,
    file: File,
    capacity: u64,
}

impl DataRegion {
    pub fn new(path: &Path, file: File, capacity: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            capacity,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn read_at(&mut self, logical_offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let span = self.span(logical_offset, buf.len())?;
        let mut done = 0usize;
        for segment in span.segments() {
            let len = segment.len as usize;
            self.file
                .seek(SeekFrom::Start(segment.physical_offset))
                .map_err(|err| self.io_error(err, segment.physical_offset))?;
            self.file
                .read_exact(&mut buf[done..done + len])
                .map_err(|err| self.io_error(err, segment.physical_offset))?;
            done += len;
        }
        Ok(())
    }

    pub fn write_at(&mut self, logical_offset: u64, data: &[u8]) -> Result<(), Error> {
        let span = self.span(logical_offset, data.len())?;
        let mut done = 0usize;
        for segment in span.segments() {
            let len = segment.len as usize;
            self.file
                .seek(SeekFrom::Start(segment.physical_offset))
                .map_err(|err| self.io_error(err, segment.physical_offset))?;
            self.file
                .write_all(&data[done..done + len])
                .map_err(|err| self.io_error(err, segment.physical_offset))?;
            done += len;
        }
        Ok(())
    }

    fn span(&self, logical_offset: u64, len: usize) -> Result<WrapSpan, Error> {
        let len = len as u64;
        if len > self.capacity {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message("transfer longer than ring capacity")
                .with_path(&self.path)
                .with_size(len));
        }
        Ok(split(logical_offset, len, self.capacity))
    }

    fn io_error(&self, err: std::io::Error, physical_offset: u64) -> Error {
        Error::new(ErrorKind::Io)
            .with_path(&self.path)
            .with_offset(physical_offset)
            .with_source(err)
    }
}
