//! Purpose: Fixed-capacity, disk-backed circular record store.
//! Exports: `core` (control block, framing, wraparound I/O, record engine) and `api`.
//! Role: Library backing the `ringfile` CLI; `api` is the stable entry point for callers.
//! Invariants: At most one appending handle per file; readers never mutate shared state.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
