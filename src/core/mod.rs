// Storage engine: control block, wraparound I/O, framing, and the record engine.
pub mod control;
pub mod error;
pub mod ring;
pub mod stream;
pub mod varint;
pub mod wrap;
