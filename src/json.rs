//! Streaming JSON record reader.
//!
//! Reads a top-level JSON array of objects (or newline-delimited objects)
//! one record at a time. Only the record currently being decoded is held
//! in memory.

use crate::key::MissingKey;
use crate::streaming::buffers::{DEFAULT_INPUT_BUFFER, DEFAULT_LINE_BUFFER, DEFAULT_RECORD_BUFFER};
use crate::streaming::scanner::{is_json_whitespace, ValueScanner};
use serde_json::{Map, Value};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A decoded record: an insertion-ordered map of arbitrary fields.
pub type Record = Map<String, Value>;

/// Errors that can occur while merging.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed input at byte {offset}: {message}")]
    Malformed { offset: u64, message: String },

    /// Part of the error taxonomy only: a missing key is always recovered
    /// where it is detected (skipped abstract, passed-through asset) and is
    /// never raised from the pipeline.
    #[error(transparent)]
    MissingKey(MissingKey),

    #[error("{phase} failed on '{}': {source}", .path.display())]
    Phase {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: Box<MergeError>,
    },
}

impl MergeError {
    fn malformed(offset: u64, message: impl Into<String>) -> Self {
        MergeError::Malformed {
            offset,
            message: message.into(),
        }
    }

    /// Attach the phase and file that produced this error.
    pub fn in_phase<P: AsRef<Path>>(self, phase: Phase, path: P) -> Self {
        MergeError::Phase {
            phase,
            path: path.as_ref().to_path_buf(),
            source: Box::new(self),
        }
    }

    /// Innermost error, with phase context stripped.
    pub fn root(&self) -> &MergeError {
        match self {
            MergeError::Phase { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Pipeline phase, used to label fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Indexing,
    Joining,
    Writing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Indexing => write!(f, "indexing"),
            Phase::Joining => write!(f, "joining"),
            Phase::Writing => write!(f, "writing"),
        }
    }
}

/// Layout of a JSON input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A single top-level array of objects.
    Array,
    /// One object per line (NDJSON).
    Lines,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Array => write!(f, "array"),
            InputFormat::Lines => write!(f, "ndjson"),
        }
    }
}

/// Position of the array reader between elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    /// Just after `[`; either `]` or the first element follows.
    Start,
    /// After an element; either `,` or `]` follows.
    AfterElement,
    /// After `]`; only whitespace may follow.
    Done,
}

/// A streaming JSON record reader.
pub struct RecordReader<R: Read> {
    reader: BufReader<R>,
    format: InputFormat,
    state: ArrayState,
    scanner: ValueScanner,
    buffer: Vec<u8>,
    line: Vec<u8>,
    line_number: usize,
    offset: u64,
    records_read: usize,
}

impl RecordReader<File> {
    /// Open a JSON file from a path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file)
    }
}

impl<R: Read> RecordReader<R> {
    /// Create a reader from any readable source, detecting its format.
    pub fn new(reader: R) -> Result<Self> {
        Self::with_capacity(reader, DEFAULT_INPUT_BUFFER)
    }

    /// Create a reader with custom input buffer capacity.
    pub fn with_capacity(reader: R, capacity: usize) -> Result<Self> {
        let mut this = Self {
            reader: BufReader::with_capacity(capacity, reader),
            format: InputFormat::Array,
            state: ArrayState::Start,
            scanner: ValueScanner::new(),
            buffer: Vec::with_capacity(DEFAULT_RECORD_BUFFER),
            line: Vec::with_capacity(DEFAULT_LINE_BUFFER),
            line_number: 0,
            offset: 0,
            records_read: 0,
        };
        this.format = this.detect_format()?;
        Ok(this)
    }

    /// Detected input layout.
    pub fn format(&self) -> InputFormat {
        self.format
    }

    /// Number of records returned so far.
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Look at the first significant byte. For arrays the `[` is consumed;
    /// for lines nothing past leading whitespace is.
    fn detect_format(&mut self) -> Result<InputFormat> {
        self.skip_bom()?;
        match self.peek_significant()? {
            Some(b'[') => {
                self.advance(1);
                Ok(InputFormat::Array)
            }
            Some(b'{') => Ok(InputFormat::Lines),
            Some(b) => Err(MergeError::malformed(
                self.offset,
                format!(
                    "expected a JSON array or newline-delimited objects, found '{}'",
                    b.escape_ascii()
                ),
            )),
            None => Err(MergeError::malformed(self.offset, "empty input")),
        }
    }

    fn skip_bom(&mut self) -> Result<()> {
        const BOM: &[u8] = b"\xEF\xBB\xBF";
        if self.reader.fill_buf()?.starts_with(BOM) {
            self.advance(BOM.len());
        }
        Ok(())
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        self.reader.consume(n);
        self.offset += n as u64;
    }

    /// Skip whitespace and return the next byte without consuming it.
    fn peek_significant(&mut self) -> Result<Option<u8>> {
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Ok(None);
            }
            match available.iter().position(|&b| !is_json_whitespace(b)) {
                Some(pos) => {
                    let b = available[pos];
                    self.advance(pos);
                    return Ok(Some(b));
                }
                None => {
                    let len = available.len();
                    self.advance(len);
                }
            }
        }
    }

    /// Read the next record, or `None` at the end of input.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let record = match self.format {
            InputFormat::Array => self.read_array_element()?,
            InputFormat::Lines => self.read_line_record()?,
        };
        if record.is_some() {
            self.records_read += 1;
        }
        Ok(record)
    }

    fn read_array_element(&mut self) -> Result<Option<Record>> {
        match self.state {
            ArrayState::Done => return Ok(None),
            ArrayState::Start => {
                if self.peek_significant()? == Some(b']') {
                    self.advance(1);
                    self.finish_array()?;
                    return Ok(None);
                }
            }
            ArrayState::AfterElement => match self.peek_significant()? {
                Some(b',') => {
                    self.advance(1);
                    if self.peek_significant()? == Some(b']') {
                        return Err(MergeError::malformed(
                            self.offset,
                            "trailing comma before ']'",
                        ));
                    }
                }
                Some(b']') => {
                    self.advance(1);
                    self.finish_array()?;
                    return Ok(None);
                }
                Some(b) => {
                    return Err(MergeError::malformed(
                        self.offset,
                        format!("expected ',' or ']' after element, found '{}'", b.escape_ascii()),
                    ))
                }
                None => {
                    return Err(MergeError::malformed(
                        self.offset,
                        "unexpected end of input, array not closed",
                    ))
                }
            },
        }

        match self.peek_significant()? {
            Some(b'{') => {}
            Some(_) => {
                return Err(MergeError::malformed(
                    self.offset,
                    format!("array element {} is not a JSON object", self.records_read),
                ))
            }
            None => {
                return Err(MergeError::malformed(
                    self.offset,
                    "unexpected end of input, array not closed",
                ))
            }
        }

        let start = self.offset;
        self.capture_value()?;
        let record = serde_json::from_slice::<Record>(&self.buffer).map_err(|e| {
            MergeError::malformed(start, format!("array element {}: {}", self.records_read, e))
        })?;
        self.state = ArrayState::AfterElement;
        Ok(Some(record))
    }

    /// Copy one complete object into `self.buffer`.
    fn capture_value(&mut self) -> Result<()> {
        self.buffer.clear();
        self.scanner.reset();
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Err(MergeError::malformed(
                    self.offset,
                    format!("unexpected end of input inside element {}", self.records_read),
                ));
            }
            let (taken, complete) = match self.scanner.feed(available) {
                Some(end) => (end, true),
                None => (available.len(), false),
            };
            self.buffer.extend_from_slice(&available[..taken]);
            self.advance(taken);
            if complete {
                return Ok(());
            }
        }
    }

    fn finish_array(&mut self) -> Result<()> {
        self.state = ArrayState::Done;
        match self.peek_significant()? {
            None => Ok(()),
            Some(b) => Err(MergeError::malformed(
                self.offset,
                format!("unexpected trailing data '{}' after array", b.escape_ascii()),
            )),
        }
    }

    fn read_line_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.line.clear();
            let start = self.offset;
            let bytes_read = self.reader.read_until(b'\n', &mut self.line)?;
            if bytes_read == 0 {
                return Ok(None);
            }
            self.offset += bytes_read as u64;
            self.line_number += 1;

            let line = self.line.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let value: Value = serde_json::from_slice(line).map_err(|e| {
                MergeError::malformed(start, format!("line {}: {}", self.line_number, e))
            })?;
            return match value {
                Value::Object(record) => Ok(Some(record)),
                _ => Err(MergeError::malformed(
                    start,
                    format!("line {} is not a JSON object", self.line_number),
                )),
            };
        }
    }

    /// Get an iterator over all records.
    pub fn records(self) -> RecordIter<R> {
        RecordIter {
            reader: self,
            failed: false,
        }
    }
}

/// Iterator over JSON records. Stops after the first error.
pub struct RecordIter<R: Read> {
    reader: RecordReader<R>,
    failed: bool,
}

impl<R: Read> RecordIter<R> {
    /// Detected input layout.
    pub fn format(&self) -> InputFormat {
        self.reader.format()
    }
}

impl<R: Read> Iterator for RecordIter<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Read all records from a JSON file.
pub fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<Record>> {
    let reader = RecordReader::from_path(path)?;
    reader.records().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_all(input: &str) -> Result<Vec<Record>> {
        RecordReader::new(input.as_bytes())?.records().collect()
    }

    fn malformed(result: Result<Vec<Record>>) -> String {
        match result {
            Err(MergeError::Malformed { message, .. }) => message,
            other => panic!("expected malformed input, got {:?}", other),
        }
    }

    #[test]
    fn test_read_array() {
        let records = read_all(r#"[{"id":"1","title":"A"}, {"id":2}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["title"], json!("A"));
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn test_field_order_preserved() {
        let records = read_all(r#"[{"z":1,"a":2,"m":3}]"#).unwrap();
        let keys: Vec<_> = records[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn test_empty_array() {
        assert!(read_all("[]").unwrap().is_empty());
        assert!(read_all("  [ \n ]  \n").unwrap().is_empty());
    }

    #[test]
    fn test_nested_values_and_whitespace() {
        let input = "\n[\n  {\"id\": {\"$oid\": \"abc\"}, \"tags\": [\"a\", \"]\"]},\n  {\"id\": \"x\"}\n]\n";
        let records = read_all(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["id"]["$oid"], json!("abc"));
        assert_eq!(records[0]["tags"][1], json!("]"));
    }

    #[test]
    fn test_small_buffer_refills() {
        let input = r#"[{"id":"1","abstract":"a long \"quoted\" text {with} [brackets]"},{"id":"2"}]"#;
        let reader = RecordReader::with_capacity(input.as_bytes(), 3).unwrap();
        let records: Vec<_> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0]["abstract"],
            json!("a long \"quoted\" text {with} [brackets]")
        );
    }

    #[test]
    fn test_byte_order_mark_skipped() {
        let records = read_all("\u{feff}[{\"id\":1}]").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_detect_format() {
        let reader = RecordReader::new(&b"  [{}]"[..]).unwrap();
        assert_eq!(reader.format(), InputFormat::Array);
        let reader = RecordReader::new(&b"{\"id\":1}\n"[..]).unwrap();
        assert_eq!(reader.format(), InputFormat::Lines);
    }

    #[test]
    fn test_read_lines() {
        let records = read_all("{\"id\":1}\n\n{\"id\":\"2\",\"x\":[1,2]}\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["x"], json!([1, 2]));
    }

    #[test]
    fn test_lines_non_object_rejected() {
        let message = malformed(read_all("{\"id\":1}\n[1,2]\n"));
        assert!(message.contains("line 2"));
    }

    #[test]
    fn test_lines_invalid_json_rejected() {
        let message = malformed(read_all("{\"id\":1}\n{\"id\":\n"));
        assert!(message.starts_with("line 2"));
    }

    #[test]
    fn test_lines_invalid_utf8_is_malformed() {
        let input = b"{\"id\":1}\n{\"id\":\"\xff\"}\n";
        let result: Result<Vec<Record>> = RecordReader::new(&input[..]).unwrap().records().collect();
        assert!(malformed(result).starts_with("line 2"));

        let array = b"[{\"id\":\"\xff\"}]";
        let result: Result<Vec<Record>> = RecordReader::new(&array[..]).unwrap().records().collect();
        assert!(malformed(result).starts_with("array element 0"));
    }

    #[test]
    fn test_large_numbers_read_verbatim() {
        let records =
            read_all(r#"[{"big":123456789012345678901234567890,"pi":3.14159265358979323846264338,"huge":1e400}]"#)
                .unwrap();
        let text = serde_json::to_string(&records[0]).unwrap();
        assert_eq!(
            text,
            r#"{"big":123456789012345678901234567890,"pi":3.14159265358979323846264338,"huge":1e400}"#
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        let message = malformed(read_all("   \n"));
        assert_eq!(message, "empty input");
    }

    #[test]
    fn test_top_level_not_array() {
        let message = malformed(read_all(r#""just a string""#));
        assert!(message.contains("expected a JSON array"));
    }

    #[test]
    fn test_element_not_object() {
        let message = malformed(read_all(r#"[{"id":1}, 42]"#));
        assert!(message.contains("element 1 is not a JSON object"));
    }

    #[test]
    fn test_trailing_comma() {
        let message = malformed(read_all(r#"[{"id":1},]"#));
        assert!(message.contains("trailing comma"));
    }

    #[test]
    fn test_missing_separator() {
        let message = malformed(read_all(r#"[{"id":1} {"id":2}]"#));
        assert!(message.contains("expected ',' or ']'"));
    }

    #[test]
    fn test_truncated_array() {
        let message = malformed(read_all(r#"[{"id":1},{"id":"#));
        assert!(message.contains("unexpected end of input"));

        let message = malformed(read_all(r#"[{"id":1}"#));
        assert!(message.contains("array not closed"));
    }

    #[test]
    fn test_trailing_data() {
        let message = malformed(read_all(r#"[{"id":1}] x"#));
        assert!(message.contains("trailing data"));
    }

    #[test]
    fn test_invalid_element_body() {
        let message = malformed(read_all(r#"[{"id" 1}]"#));
        assert!(message.starts_with("array element 0"));
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let mut iter = RecordReader::new(&br#"[{"id":1}, 7, {"id":2}]"#[..])
            .unwrap()
            .records();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_records_read_counter() {
        let mut reader = RecordReader::new(&br#"[{"a":1},{"a":2}]"#[..]).unwrap();
        while reader.read_record().unwrap().is_some() {}
        assert_eq!(reader.records_read(), 2);
    }

    #[test]
    fn test_phase_error_message() {
        let err = MergeError::malformed(10, "bad").in_phase(Phase::Indexing, "abstracts.json");
        assert_eq!(
            err.to_string(),
            "indexing failed on 'abstracts.json': Malformed input at byte 10: bad"
        );
        assert!(matches!(err.root(), MergeError::Malformed { offset: 10, .. }));
    }

    #[test]
    fn test_missing_key_message_is_transparent() {
        let err = MergeError::MissingKey(MissingKey::Absent("id".to_string()));
        assert_eq!(err.to_string(), "join key 'id' is absent");
        assert!(matches!(err.root(), MergeError::MissingKey(_)));
    }

    #[test]
    fn test_from_path() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{"id":"1"}]"#).unwrap();
        file.flush().unwrap();
        let records = read_records(file.path()).unwrap();
        assert_eq!(records.len(), 1);
    }
}
