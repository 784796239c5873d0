//! Purpose: Define the stable public Rust API boundary for ringfile.
//! Exports: Handles, options, streaming tokens, and errors needed by the CLI and library callers.
//! Role: Public, additive-only surface over the `core` engine.
//! Invariants: Callers create, open, append, and read only through these types.

pub use crate::core::control::CONTROL_BLOCK_LEN;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::ring::{
    OpenMode, Ring, RingAppender, RingHandle, RingOptions, RingReader, RingStat, max_payload,
    open,
};
pub use crate::core::stream::{RecordReader, RecordWriter};

use std::path::Path;

/// Creates a new ring file with `capacity` bytes of data region.
pub fn create(path: impl AsRef<Path>, capacity: u64) -> Result<RingAppender, Error> {
    RingAppender::create(path, RingOptions::new(capacity))
}
