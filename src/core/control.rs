// Control block layout, file creation/opening, and the shared memory-mapped view.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::core::error::{Error, ErrorKind};

pub const MAGIC: [u8; 4] = *b"RING";
pub const CONTROL_BLOCK_LEN: usize = 24;

const MAGIC_OFF: usize = 0;
const FLAGS_OFF: usize = 4;
const START_OFF: usize = 8;
const END_OFF: usize = 16;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ControlBlock {
    pub flags: u32,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl ControlBlock {
    pub fn new() -> Self {
        Self {
            flags: 0,
            start_offset: 0,
            end_offset: 0,
        }
    }

    pub fn encode(&self) -> [u8; CONTROL_BLOCK_LEN] {
        let mut buf = [0u8; CONTROL_BLOCK_LEN];
        buf[MAGIC_OFF..MAGIC_OFF + 4].copy_from_slice(&MAGIC);
        write_u32(&mut buf, FLAGS_OFF, self.flags);
        write_u64(&mut buf, START_OFF, self.start_offset);
        write_u64(&mut buf, END_OFF, self.end_offset);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < CONTROL_BLOCK_LEN {
            return Err(Error::new(ErrorKind::InvalidFormat).with_message("control block too small"));
        }
        if buf[MAGIC_OFF..MAGIC_OFF + 4] != MAGIC {
            return Err(Error::new(ErrorKind::InvalidFormat).with_message("bad magic"));
        }
        Ok(Self {
            flags: read_u32(buf, FLAGS_OFF),
            start_offset: read_u64(buf, START_OFF),
            end_offset: read_u64(buf, END_OFF),
        })
    }

    pub fn validate(&self, capacity: u64) -> Result<(), Error> {
        if self.start_offset >= capacity {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("start offset out of range")
                .with_offset(self.start_offset));
        }
        if self.end_offset >= capacity {
            return Err(Error::new(ErrorKind::InvalidFormat)
                .with_message("end offset out of range")
                .with_offset(self.end_offset));
        }
        Ok(())
    }

    pub fn bytes_used(&self, capacity: u64) -> u64 {
        ring_distance(self.start_offset, self.end_offset, capacity)
    }
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward distance from `from` to `to` around a ring of `capacity` bytes.
pub fn ring_distance(from: u64, to: u64, capacity: u64) -> u64 {
    if from <= to {
        to - from
    } else {
        capacity - (from - to)
    }
}

/// Read access to the mapped control block. Every handle type implements it;
/// only [`SharedControlMut`] can move the offsets.
pub trait ControlAccess {
    fn bytes(&self) -> &[u8];

    fn flags(&self) -> u32 {
        read_u32(self.bytes(), FLAGS_OFF)
    }

    fn start_offset(&self) -> u64 {
        read_u64(self.bytes(), START_OFF)
    }

    fn end_offset(&self) -> u64 {
        read_u64(self.bytes(), END_OFF)
    }

    fn snapshot(&self) -> ControlBlock {
        ControlBlock {
            flags: self.flags(),
            start_offset: self.start_offset(),
            end_offset: self.end_offset(),
        }
    }
}

/// Read-only shared mapping used by read handles.
pub struct SharedControl {
    map: Mmap,
}

impl SharedControl {
    pub fn map(file: &File, path: &Path) -> Result<Self, Error> {
        let map = unsafe {
            MmapOptions::new()
                .len(CONTROL_BLOCK_LEN)
                .map(file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        Ok(Self { map })
    }
}

impl ControlAccess for SharedControl {
    fn bytes(&self) -> &[u8] {
        &self.map
    }
}

/// Read-write shared mapping held by the single append handle.
pub struct SharedControlMut {
    map: MmapMut,
}

impl SharedControlMut {
    pub fn map(file: &File, path: &Path) -> Result<Self, Error> {
        let map = unsafe {
            MmapOptions::new()
                .len(CONTROL_BLOCK_LEN)
                .map_mut(file)
                .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        Ok(Self { map })
    }

    pub fn set_start_offset(&mut self, offset: u64) {
        write_u64(&mut self.map, START_OFF, offset);
    }

    pub fn set_end_offset(&mut self, offset: u64) {
        write_u64(&mut self.map, END_OFF, offset);
    }

    pub fn flush(&self, path: &Path) -> Result<(), Error> {
        self.map
            .flush()
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))
    }
}

impl ControlAccess for SharedControlMut {
    fn bytes(&self) -> &[u8] {
        &self.map
    }
}

/// Creates a new ring file with an empty control block. Fails if `path` exists.
pub fn create_file(path: &Path, capacity: u64) -> Result<File, Error> {
    let file_size = (CONTROL_BLOCK_LEN as u64)
        .checked_add(capacity)
        .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("capacity overflows file size"))?;
    let mut file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| Error::from_io(err, path))?;

    // A half-initialized file would block every later create at this path.
    if let Err(err) = initialize(&mut file, file_size, path) {
        drop(file);
        let _ = std::fs::remove_file(path);
        return Err(err);
    }
    Ok(file)
}

fn initialize(file: &mut File, file_size: u64, path: &Path) -> Result<(), Error> {
    file.set_len(file_size)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    file.allocate(file_size)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    write_control(file, &ControlBlock::new(), path)
}

/// Opens an existing ring file, validates its control block, and returns the
/// file with the data-region capacity derived from its length.
pub fn open_file(path: &Path, writable: bool) -> Result<(File, u64), Error> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|err| Error::from_io(err, path))?;

    let actual_size = file
        .metadata()
        .map(|meta| meta.len())
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    if actual_size <= CONTROL_BLOCK_LEN as u64 {
        return Err(Error::new(ErrorKind::InvalidFormat)
            .with_message("file too small for a ring")
            .with_path(path)
            .with_size(actual_size));
    }
    let capacity = actual_size - CONTROL_BLOCK_LEN as u64;

    let control = read_control(&mut file, path)?;
    control
        .validate(capacity)
        .map_err(|err| err.with_path(path))?;
    Ok((file, capacity))
}

fn read_control(file: &mut File, path: &Path) -> Result<ControlBlock, Error> {
    let mut buf = [0u8; CONTROL_BLOCK_LEN];
    file.seek(SeekFrom::Start(0))
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    file.read_exact(&mut buf)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    ControlBlock::decode(&buf).map_err(|err| err.with_path(path))
}

fn write_control(file: &mut File, control: &ControlBlock, path: &Path) -> Result<(), Error> {
    let buf = control.encode();
    file.seek(SeekFrom::Start(0))
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    file.write_all(&buf)
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    file.flush()
        .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?;
    Ok(())
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(out)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
