//! Buffer size constants for streaming operations.
//!
//! These control the memory used for I/O, independent of record size.
//! A single record is always held in full; these only size the readers
//! and writers around it.

/// Default output buffer size (2 MB).
pub const DEFAULT_OUTPUT_BUFFER: usize = 2 * 1024 * 1024;

/// Default input buffer size (256 KB).
pub const DEFAULT_INPUT_BUFFER: usize = 256 * 1024;

/// Initial capacity of the per-record element buffer (16 KB).
/// Grows to fit the largest record seen and is reused afterwards.
pub const DEFAULT_RECORD_BUFFER: usize = 16 * 1024;

/// Initial capacity of the line buffer used for newline-delimited input.
pub const DEFAULT_LINE_BUFFER: usize = 4 * 1024;
