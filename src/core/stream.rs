//! Purpose: Incremental append/read of a single record whose payload arrives or leaves in chunks.
//! Exports: `RecordWriter`, `RecordReader`.
//! Role: Typed tokens returned by `RingAppender::write_start` and `Ring::read_start`.
//! Invariants: A token mutably borrows its handle, so streams never overlap other calls.
//! Invariants: Chunks land on disk immediately; `end_offset` moves only in `RecordWriter::finish`.
//! Invariants: The length prefix is written last, at the offset reserved by `write_start`.
use std::io;

use crate::core::control::ControlAccess;
use crate::core::error::{Error, ErrorKind};
use crate::core::ring::{FrameLoc, Ring, RingAppender};
use crate::core::varint;

pub struct RecordWriter<'a> {
    ring: &'a mut RingAppender,
    prefix_offset: u64,
    prefix_len: u64,
    next: u64,
    total: u64,
    remaining: u64,
}

impl<'a> RecordWriter<'a> {
    pub(crate) fn new(ring: &'a mut RingAppender, prefix_offset: u64, total: u64) -> Self {
        let prefix_len = varint::encoded_len(total) as u64;
        let next = ring.advance(prefix_offset, prefix_len);
        Self {
            ring,
            prefix_offset,
            prefix_len,
            next,
            total,
            remaining: total,
        }
    }

    pub fn total_len(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Writes the next piece of the payload at the running cursor.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), Error> {
        let len = chunk.len() as u64;
        if len > self.remaining {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!(
                    "chunk of {len} bytes exceeds the {} bytes left in the declared record",
                    self.remaining
                ))
                .with_path(self.ring.path())
                .with_size(self.total));
        }
        if len == 0 {
            return Ok(());
        }
        self.ring.write_payload(self.next, chunk)?;
        self.next = self.ring.advance(self.next, len);
        self.remaining -= len;
        Ok(())
    }

    /// Writes the length prefix and publishes the record by moving `end_offset`.
    pub fn finish(self) -> Result<(), Error> {
        if self.remaining != 0 {
            return Err(Error::new(ErrorKind::InvalidState)
                .with_message(format!(
                    "record finished with {} of {} declared bytes missing",
                    self.remaining, self.total
                ))
                .with_path(self.ring.path())
                .with_size(self.total));
        }
        let (prefix, prefix_len) = varint::encode_to_array(self.total);
        debug_assert_eq!(prefix_len as u64, self.prefix_len);
        self.ring
            .write_payload(self.prefix_offset, &prefix[..prefix_len])?;
        let end = self.ring.advance(self.prefix_offset, self.prefix_len + self.total);
        self.ring.commit_end(end);
        Ok(())
    }
}

impl io::Write for RecordWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct RecordReader<'a, C> {
    ring: &'a mut Ring<C>,
    frame: FrameLoc,
    consumed: u64,
}

impl<'a, C: ControlAccess> RecordReader<'a, C> {
    pub(crate) fn new(ring: &'a mut Ring<C>, frame: FrameLoc) -> Self {
        Self {
            ring,
            frame,
            consumed: 0,
        }
    }

    /// Declared payload length of the record being read.
    pub fn total_len(&self) -> u64 {
        self.frame.payload_len
    }

    pub fn remaining(&self) -> u64 {
        self.frame.payload_len - self.consumed
    }

    /// Copies up to `buf.len()` bytes of the payload; returns 0 once exhausted.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let len = self.remaining().min(buf.len() as u64) as usize;
        if len == 0 {
            return Ok(0);
        }
        let offset = self.frame.offset + self.frame.prefix_len + self.consumed;
        self.ring.read_payload(offset, &mut buf[..len])?;
        self.consumed += len as u64;
        Ok(len)
    }

    /// Moves the handle's cursor past the whole frame, read or not.
    pub fn finish(self) {
        let next = self.ring.advance(self.frame.offset, self.frame.len());
        self.ring.set_cursor(next);
    }
}

impl<C: ControlAccess> io::Read for RecordReader<'_, C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_chunk(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::error::ErrorKind;
    use crate::core::ring::{RingAppender, RingOptions, RingReader};
    use std::io::{Read, Write};

    fn split_points(len: usize, step: usize) -> Vec<usize> {
        let mut points: Vec<usize> = (0..len).step_by(step.max(1)).collect();
        points.push(len);
        points
    }

    #[test]
    fn streamed_write_matches_single_write_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let payload: Vec<u8> = (0..150u32).map(|i| (i * 7) as u8).collect();
        for step in [1usize, 3, 64, 150] {
            for warmup in [0usize, 90, 170] {
                let whole = dir.path().join(format!("whole-{step}-{warmup}"));
                let streamed = dir.path().join(format!("streamed-{step}-{warmup}"));

                let mut ring = RingAppender::create(&whole, RingOptions::new(200)).expect("create");
                if warmup > 0 {
                    ring.write(&vec![1u8; warmup]).expect("warmup");
                }
                ring.write(&payload).expect("write");
                ring.close().expect("close");

                let mut ring =
                    RingAppender::create(&streamed, RingOptions::new(200)).expect("create");
                if warmup > 0 {
                    ring.write(&vec![1u8; warmup]).expect("warmup");
                }
                let mut writer = ring.write_start(payload.len() as u64).expect("start");
                let points = split_points(payload.len(), step);
                for pair in points.windows(2) {
                    writer.write_chunk(&payload[pair[0]..pair[1]]).expect("chunk");
                }
                writer.finish().expect("finish");
                ring.close().expect("close");

                assert_eq!(
                    std::fs::read(&whole).expect("whole"),
                    std::fs::read(&streamed).expect("streamed"),
                    "step {step} warmup {warmup}"
                );
            }
        }
    }

    #[test]
    fn overlong_chunk_is_invalid_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(64)).expect("create");
        let mut writer = ring.write_start(4).expect("start");
        writer.write_chunk(b"ab").expect("chunk");
        let err = writer.write_chunk(b"cde").expect_err("too many bytes");
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(writer.remaining(), 2);
        writer.write_chunk(b"cd").expect("chunk");
        writer.finish().expect("finish");

        let mut reader = RingReader::open(&path).expect("open");
        assert_eq!(reader.read_record().expect("read"), Some(b"abcd".to_vec()));
    }

    #[test]
    fn short_finish_does_not_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(64)).expect("create");
        ring.write(b"kept").expect("write");

        let mut writer = ring.write_start(10).expect("start");
        writer.write_chunk(b"12345").expect("chunk");
        let err = writer.finish().expect_err("short");
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let mut abandoned = ring.write_start(3).expect("start");
        abandoned.write_chunk(b"xyz").expect("chunk");
        drop(abandoned);

        assert_eq!(ring.stat().end_offset, 5);
        let mut reader = RingReader::open(&path).expect("open");
        assert_eq!(reader.read_record().expect("read"), Some(b"kept".to_vec()));
        assert_eq!(reader.read_record().expect("read"), None);
    }

    #[test]
    fn write_start_evicts_for_declared_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(32)).expect("create");
        ring.write(&[1u8; 15]).expect("write");
        ring.write(&[2u8; 9]).expect("write");

        // Only the oldest record has to go to make room for a 21-byte frame.
        let writer = ring.write_start(20).expect("start");
        drop(writer);
        let stat = ring.stat();
        assert_eq!(stat.start_offset, 16);
        assert_eq!(stat.used, 10);

        let err = ring.write_start(31).err().expect("too large");
        assert_eq!(err.kind(), ErrorKind::RecordTooLarge);
    }

    #[test]
    fn io_write_adapter_streams_into_ring() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(64)).expect("create");
        let mut writer = ring.write_start(11).expect("start");
        write!(writer, "hello {}", "world").expect("write");
        writer.finish().expect("finish");

        let mut reader = RingReader::open(&path).expect("open");
        assert_eq!(reader.read_record().expect("read"), Some(b"hello world".to_vec()));
    }

    #[test]
    fn streamed_read_in_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(40)).expect("create");
        ring.write(&[0u8; 20]).expect("filler");
        ring.write(b"wrapping-record-abc").expect("write");

        let mut reader = RingReader::open(&path).expect("open");
        let mut stream = reader.read_start().expect("start").expect("record");
        assert_eq!(stream.total_len(), 19);
        let mut out = Vec::new();
        let mut chunk = [0u8; 4];
        loop {
            let n = stream.read_chunk(&mut chunk).expect("chunk");
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(out, b"wrapping-record-abc");
        assert_eq!(stream.read_chunk(&mut chunk).expect("exhausted"), 0);
        stream.finish();
        assert!(reader.read_start().expect("start").is_none());
    }

    #[test]
    fn read_finish_skips_unread_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(64)).expect("create");
        ring.write(b"first record").expect("write");
        ring.write(b"second").expect("write");

        let mut reader = RingReader::open(&path).expect("open");
        let mut stream = reader.read_start().expect("start").expect("record");
        let mut head = [0u8; 5];
        stream.read_exact(&mut head).expect("read");
        assert_eq!(&head, b"first");
        stream.finish();

        assert_eq!(reader.read_record().expect("read"), Some(b"second".to_vec()));
    }

    #[test]
    fn dropping_read_stream_keeps_cursor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ring");
        let mut ring = RingAppender::create(&path, RingOptions::new(64)).expect("create");
        ring.write(b"again").expect("write");

        let mut reader = RingReader::open(&path).expect("open");
        let stream = reader.read_start().expect("start").expect("record");
        drop(stream);
        assert_eq!(reader.read_record().expect("read"), Some(b"again".to_vec()));
    }
}
