//! Purpose: The record engine: create/open ring files, append with FIFO eviction, read by cursor.
//! Exports: `Ring`, `RingReader`, `RingAppender`, `RingOptions`, `RingStat`, `OpenMode`,
//!   `RingHandle`, `open`, `max_payload`.
//! Role: Orchestrates the varint codec, wraparound I/O, and the mapped control block.
//! Invariants: `start_offset == end_offset` means empty; writes always leave a one-byte gap.
//! Invariants: Only `RingAppender` mutates the control block; read cursors are handle-local.
//! Invariants: Eviction never resets offsets to zero; all offsets stay modular.
//! Invariants: A reader lapped by eviction is not detected; the format carries no sequence numbers.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, trace};

use crate::core::control::{
    self, CONTROL_BLOCK_LEN, ControlAccess, SharedControl, SharedControlMut, ring_distance,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::stream::{RecordReader, RecordWriter};
use crate::core::varint;
use crate::core::wrap::DataRegion;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RingOptions {
    pub capacity: u64,
}

impl RingOptions {
    pub fn new(capacity: u64) -> Self {
        Self { capacity }
    }

    /// Options for a file of exactly `file_size` bytes, control block included.
    pub fn for_file_size(file_size: u64) -> Result<Self, Error> {
        let capacity = file_size
            .checked_sub(CONTROL_BLOCK_LEN as u64)
            .filter(|capacity| *capacity > 1)
            .ok_or_else(|| {
                Error::new(ErrorKind::Usage)
                    .with_message("file size must exceed the control block by at least 2 bytes")
                    .with_size(file_size)
            })?;
        Ok(Self { capacity })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    Read,
    Append,
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "r" | "read" => Ok(OpenMode::Read),
            "a" | "append" => Ok(OpenMode::Append),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown open mode {other:?} (expected r or a)"))),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => write!(f, "read"),
            OpenMode::Append => write!(f, "append"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RingStat {
    pub path: PathBuf,
    pub file_size: u64,
    pub capacity: u64,
    pub used: u64,
    pub available: u64,
    pub start_offset: u64,
    pub end_offset: u64,
    pub flags: u32,
}

/// Largest payload a ring of `capacity` bytes can hold, if any.
pub fn max_payload(capacity: u64) -> Option<u64> {
    let budget = capacity.checked_sub(1)?;
    let mut payload = budget.saturating_sub(1);
    while varint::encoded_len(payload) as u64 + payload > budget {
        if payload == 0 {
            return None;
        }
        payload -= 1;
    }
    Some(payload)
}

fn frame_len(payload_len: u64) -> Option<u64> {
    payload_len.checked_add(varint::encoded_len(payload_len) as u64)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FrameLoc {
    pub(crate) offset: u64,
    pub(crate) prefix_len: u64,
    pub(crate) payload_len: u64,
}

impl FrameLoc {
    pub(crate) fn len(&self) -> u64 {
        self.prefix_len + self.payload_len
    }
}

/// A ring file handle. The control-access type decides what the handle may do:
/// [`RingReader`] only reads, [`RingAppender`] also appends and evicts.
pub struct Ring<C> {
    path: PathBuf,
    data: DataRegion,
    control: C,
    cursor: u64,
}

pub type RingReader = Ring<SharedControl>;
pub type RingAppender = Ring<SharedControlMut>;

impl<C: ControlAccess> Ring<C> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> u64 {
        self.data.capacity()
    }

    pub fn bytes_used(&self) -> u64 {
        self.control.snapshot().bytes_used(self.capacity())
    }

    pub fn bytes_available(&self) -> u64 {
        self.capacity() - self.bytes_used()
    }

    pub fn flags(&self) -> u32 {
        self.control.flags()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn stat(&self) -> RingStat {
        let block = self.control.snapshot();
        let used = block.bytes_used(self.capacity());
        RingStat {
            path: self.path.clone(),
            file_size: CONTROL_BLOCK_LEN as u64 + self.capacity(),
            capacity: self.capacity(),
            used,
            available: self.capacity() - used,
            start_offset: block.start_offset,
            end_offset: block.end_offset,
            flags: block.flags,
        }
    }

    /// Moves the read cursor back to the oldest retained record.
    pub fn rewind(&mut self) {
        self.cursor = self.control.start_offset();
    }

    /// Length of the record under the cursor, or `None` at end of data.
    pub fn next_record_size(&mut self) -> Result<Option<u64>, Error> {
        Ok(self.locate_next()?.map(|frame| frame.payload_len))
    }

    /// Copies the next record into `buf` and returns its length. A buffer shorter
    /// than the record fails with `BufferTooSmall` and leaves the cursor alone.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>, Error> {
        let Some(frame) = self.locate_next()? else {
            return Ok(None);
        };
        if (buf.len() as u64) < frame.payload_len {
            return Err(Error::new(ErrorKind::BufferTooSmall)
                .with_message("destination buffer too small for record")
                .with_path(&self.path)
                .with_offset(frame.offset)
                .with_size(frame.payload_len));
        }
        let len = frame.payload_len as usize;
        self.data
            .read_at(frame.offset + frame.prefix_len, &mut buf[..len])?;
        self.cursor = self.advance(frame.offset, frame.len());
        Ok(Some(len))
    }

    /// Reads the next record into a freshly allocated buffer.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let Some(frame) = self.locate_next()? else {
            return Ok(None);
        };
        let len = usize::try_from(frame.payload_len).map_err(|err| {
            Error::new(ErrorKind::RecordTooLarge)
                .with_message("record does not fit in memory")
                .with_size(frame.payload_len)
                .with_source(err)
        })?;
        let mut buf = vec![0u8; len];
        self.data.read_at(frame.offset + frame.prefix_len, &mut buf)?;
        self.cursor = self.advance(frame.offset, frame.len());
        Ok(Some(buf))
    }

    /// Starts an incremental read of the next record without copying its payload.
    pub fn read_start(&mut self) -> Result<Option<RecordReader<'_, C>>, Error> {
        let Some(frame) = self.locate_next()? else {
            return Ok(None);
        };
        Ok(Some(RecordReader::new(self, frame)))
    }

    pub(crate) fn read_payload(&mut self, logical_offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        self.data.read_at(logical_offset, buf)
    }

    pub(crate) fn set_cursor(&mut self, offset: u64) {
        self.cursor = offset % self.capacity();
    }

    pub(crate) fn advance(&self, offset: u64, by: u64) -> u64 {
        (offset + by) % self.capacity()
    }

    fn locate_next(&mut self) -> Result<Option<FrameLoc>, Error> {
        let end = self.control.end_offset();
        if self.cursor == end {
            return Ok(None);
        }
        self.frame_at(self.cursor, end).map(Some)
    }

    /// Decodes the frame at `offset`, which must lie before `end`.
    fn frame_at(&mut self, offset: u64, end: u64) -> Result<FrameLoc, Error> {
        let available = ring_distance(offset, end, self.capacity());
        let peek_len = available.min(varint::MAX_LEN as u64) as usize;
        let mut prefix = [0u8; varint::MAX_LEN];
        self.data.read_at(offset, &mut prefix[..peek_len])?;
        let (payload_len, prefix_len) = varint::decode(&prefix[..peek_len]).map_err(|err| {
            Error::new(ErrorKind::CorruptFrame)
                .with_message("undecodable length prefix")
                .with_path(&self.path)
                .with_offset(offset)
                .with_source(err)
        })?;
        let frame = FrameLoc {
            offset,
            prefix_len: prefix_len as u64,
            payload_len,
        };
        if frame_len(payload_len).is_none_or(|len| len > available) {
            return Err(Error::new(ErrorKind::CorruptFrame)
                .with_message("frame extends past end offset")
                .with_path(&self.path)
                .with_offset(offset)
                .with_size(payload_len));
        }
        Ok(frame)
    }
}

impl RingReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let (file, capacity) = control::open_file(&path, false)?;
        let control = SharedControl::map(&file, &path)?;
        let cursor = control.start_offset();
        Ok(Self {
            data: DataRegion::new(&path, file, capacity),
            path,
            control,
            cursor,
        })
    }

    /// Consumes the handle, releasing the mapping and the file descriptor.
    pub fn close(self) -> Result<(), Error> {
        drop(self);
        Ok(())
    }
}

impl RingAppender {
    pub fn create(path: impl AsRef<Path>, options: RingOptions) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        if options.capacity < 2 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("capacity must be at least 2 bytes")
                .with_path(&path)
                .with_size(options.capacity));
        }
        let file = control::create_file(&path, options.capacity)?;
        let control = match SharedControlMut::map(&file, &path) {
            Ok(control) => control,
            Err(err) => {
                drop(file);
                let _ = std::fs::remove_file(&path);
                return Err(err);
            }
        };
        debug!(path = %path.display(), capacity = options.capacity, "created ring file");
        Ok(Self {
            data: DataRegion::new(&path, file, options.capacity),
            path,
            control,
            cursor: 0,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let (file, capacity) = control::open_file(&path, true)?;
        let control = SharedControlMut::map(&file, &path)?;
        let cursor = control.start_offset();
        Ok(Self {
            data: DataRegion::new(&path, file, capacity),
            path,
            control,
            cursor,
        })
    }

    /// Appends one record, evicting the oldest records until it fits.
    pub fn write(&mut self, payload: &[u8]) -> Result<(), Error> {
        let payload_len = payload.len() as u64;
        let frame_len = self.checked_frame_len(payload_len)?;
        self.reserve(frame_len)?;

        let end = self.control.end_offset();
        let (prefix, prefix_len) = varint::encode_to_array(payload_len);
        self.data.write_at(end, &prefix[..prefix_len])?;
        self.data.write_at(end + prefix_len as u64, payload)?;
        let new_end = self.advance(end, frame_len);
        self.control.set_end_offset(new_end);
        trace!(offset = end, frame_len, "appended record");
        Ok(())
    }

    /// Starts an incremental append of a record of exactly `total_len` bytes.
    /// Eviction happens here, up front, for the whole declared size.
    pub fn write_start(&mut self, total_len: u64) -> Result<RecordWriter<'_>, Error> {
        let frame_len = self.checked_frame_len(total_len)?;
        self.reserve(frame_len)?;
        let prefix_offset = self.control.end_offset();
        Ok(RecordWriter::new(self, prefix_offset, total_len))
    }

    /// Flushes the control block mapping to disk.
    pub fn sync(&self) -> Result<(), Error> {
        self.control.flush(&self.path)
    }

    /// Flushes the control block, then releases the handle.
    pub fn close(self) -> Result<(), Error> {
        self.sync()?;
        drop(self);
        Ok(())
    }

    pub(crate) fn write_payload(&mut self, logical_offset: u64, data: &[u8]) -> Result<(), Error> {
        self.data.write_at(logical_offset, data)
    }

    pub(crate) fn commit_end(&mut self, end_offset: u64) {
        self.control.set_end_offset(end_offset % self.capacity());
    }

    fn checked_frame_len(&self, payload_len: u64) -> Result<u64, Error> {
        match frame_len(payload_len) {
            Some(len) if len < self.capacity() => Ok(len),
            _ => Err(Error::new(ErrorKind::RecordTooLarge)
                .with_message(format!(
                    "record cannot fit in a ring of {} bytes",
                    self.capacity()
                ))
                .with_path(&self.path)
                .with_size(payload_len)),
        }
    }

    fn reserve(&mut self, frame_len: u64) -> Result<(), Error> {
        while self.bytes_available() <= frame_len {
            self.pop_oldest()?;
        }
        Ok(())
    }

    /// Drops the oldest record by advancing `start_offset` past it.
    fn pop_oldest(&mut self) -> Result<(), Error> {
        let start = self.control.start_offset();
        let end = self.control.end_offset();
        if start == end {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message("nothing left to evict")
                .with_path(&self.path));
        }
        let frame = self.frame_at(start, end)?;
        let new_start = self.advance(start, frame.len());
        self.control.set_start_offset(new_start);
        // This handle's own cursor must never point into freed space.
        if ring_distance(start, self.cursor, self.capacity()) < frame.len() {
            self.cursor = new_start;
        }
        trace!(
            offset = start,
            frame_len = frame.len(),
            new_start,
            "evicted oldest record"
        );
        Ok(())
    }
}

/// Either kind of handle, as returned by [`open`].
pub enum RingHandle {
    Read(RingReader),
    Append(RingAppender),
}

impl RingHandle {
    pub fn mode(&self) -> OpenMode {
        match self {
            RingHandle::Read(_) => OpenMode::Read,
            RingHandle::Append(_) => OpenMode::Append,
        }
    }

    pub fn stat(&self) -> RingStat {
        match self {
            RingHandle::Read(ring) => ring.stat(),
            RingHandle::Append(ring) => ring.stat(),
        }
    }

    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, Error> {
        match self {
            RingHandle::Read(ring) => ring.read_record(),
            RingHandle::Append(ring) => ring.read_record(),
        }
    }

    pub fn into_appender(self) -> Result<RingAppender, Error> {
        match self {
            RingHandle::Append(ring) => Ok(ring),
            RingHandle::Read(ring) => Err(Error::new(ErrorKind::InvalidState)
                .with_message("handle was opened read-only")
                .with_path(ring.path())),
        }
    }

    pub fn close(self) -> Result<(), Error> {
        match self {
            RingHandle::Read(ring) => ring.close(),
            RingHandle::Append(ring) => ring.close(),
        }
    }
}

/// Opens an existing ring file in the given mode.
pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<RingHandle, Error> {
    match mode {
        OpenMode::Read => RingReader::open(path).map(RingHandle::Read),
        OpenMode::Append => RingAppender::open(path).map(RingHandle::Append),
    }
}
