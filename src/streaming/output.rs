//! Incremental record output.
//!
//! Records are serialized one at a time straight into a large
//! `BufWriter`; the full output is never held in memory.

use crate::json::{InputFormat, MergeError, Record};
use crate::streaming::buffers::DEFAULT_OUTPUT_BUFFER;
use std::io::{BufWriter, Write};

/// Streaming JSON record writer.
///
/// In [`InputFormat::Array`] mode the output is a single JSON array:
/// `[` is written up front, elements are separated by `,\n`, and
/// [`RecordWriter::finish`] writes the closing `]`. An empty sequence
/// produces `[]`. In [`InputFormat::Lines`] mode each record is written
/// on its own line.
///
/// If the writer is dropped without `finish`, array output is left
/// unterminated and is not valid JSON.
pub struct RecordWriter<W: Write> {
    writer: BufWriter<W>,
    format: InputFormat,
    written: usize,
    opened: bool,
}

impl<W: Write> RecordWriter<W> {
    /// Create a new writer with the default 2MB buffer.
    pub fn new(output: W, format: InputFormat) -> Self {
        Self::with_capacity(DEFAULT_OUTPUT_BUFFER, output, format)
    }

    /// Create a new writer with specified buffer size.
    pub fn with_capacity(capacity: usize, output: W, format: InputFormat) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            format,
            written: 0,
            opened: false,
        }
    }

    /// Output layout.
    pub fn format(&self) -> InputFormat {
        self.format
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    fn open(&mut self) -> Result<(), MergeError> {
        if !self.opened {
            if self.format == InputFormat::Array {
                self.writer.write_all(b"[").map_err(MergeError::Io)?;
            }
            self.opened = true;
        }
        Ok(())
    }

    /// Write one record.
    pub fn write_record(&mut self, record: &Record) -> Result<(), MergeError> {
        self.open()?;
        match self.format {
            InputFormat::Array => {
                let separator: &[u8] = if self.written == 0 { b"\n" } else { b",\n" };
                self.writer.write_all(separator).map_err(MergeError::Io)?;
                serde_json::to_writer(&mut self.writer, record).map_err(json_write_error)?;
            }
            InputFormat::Lines => {
                serde_json::to_writer(&mut self.writer, record).map_err(json_write_error)?;
                self.writer.write_all(b"\n").map_err(MergeError::Io)?;
            }
        }
        self.written += 1;
        Ok(())
    }

    /// Close the array (if any), flush, and return the inner writer.
    pub fn finish(mut self) -> Result<W, MergeError> {
        self.open()?;
        if self.format == InputFormat::Array {
            let closing: &[u8] = if self.written == 0 { b"]\n" } else { b"\n]\n" };
            self.writer.write_all(closing).map_err(MergeError::Io)?;
        }
        self.writer.flush().map_err(MergeError::Io)?;
        self.writer
            .into_inner()
            .map_err(|e| MergeError::Io(e.into_error()))
    }
}

/// Serializing a `Map<String, Value>` cannot fail on data; only the
/// underlying writer can.
fn json_write_error(e: serde_json::Error) -> MergeError {
    MergeError::Io(e.into())
}
