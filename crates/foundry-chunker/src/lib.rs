//! Deterministic text chunking.
//!
//! Splits text into character-addressed chunks by trying separators in
//! priority order (paragraph break, line break, sentence end, clause break,
//! word boundary, character-level), greedily packing parts up to an adaptive
//! chunk size and carrying an overlap tail between consecutive chunks.
//!
//! Everything here is a pure function: no I/O, no hidden state, same inputs
//! always produce the same chunks. All offsets count characters in the
//! original input, never bytes, and never get re-based by recursion.

pub mod splitter;

pub use splitter::{calculate_chunk_size, chunk_file, split_text, ChunkSpan, ChunkerError};
