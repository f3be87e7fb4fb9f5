//! Streaming JSON utilities.
//!
//! This module provides the pieces shared by both phases of a merge:
//! - Byte-level element scanning for top-level JSON arrays
//! - Incremental record output (array or newline-delimited)
//! - Buffer sizing
//!
//! Memory stays bounded by the size of one record, never by array length.

pub mod buffers;
pub mod output;
pub mod scanner;

pub use output::RecordWriter;
pub use scanner::{is_json_whitespace, ValueScanner};
