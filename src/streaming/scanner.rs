//! Byte-level scanning of JSON values.
//!
//! The scanner finds where one JSON object or array ends inside a byte
//! stream without decoding it. Only nesting depth, string state and
//! escapes are tracked, so a record can be captured into a reusable
//! buffer chunk by chunk and decoded once it is complete.

use memchr::memchr2;

/// JSON insignificant whitespace (RFC 8259).
#[inline(always)]
pub fn is_json_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Incremental end-of-value detector for objects and arrays.
///
/// Feed chunks in order with [`ValueScanner::feed`]. The scanner keeps its
/// state between calls, so a value may be split across any number of
/// buffer refills, including in the middle of a string or escape.
///
/// The first byte fed must open the value (`{` or `[`). Mismatched
/// brackets are not detected here; they surface when the captured bytes
/// are decoded.
#[derive(Debug, Default, Clone)]
pub struct ValueScanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ValueScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset state before scanning the next value.
    #[inline]
    pub fn reset(&mut self) {
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
    }

    /// Current nesting depth.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Scan a chunk.
    ///
    /// Returns `Some(n)` when the value closes inside this chunk, where `n`
    /// is the number of bytes of the chunk that belong to the value.
    /// Returns `None` when the whole chunk was consumed and the value is
    /// still open.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        let mut i = 0;
        while i < chunk.len() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                    i += 1;
                    continue;
                }
                // Jump straight to the next quote or backslash
                match memchr2(b'"', b'\\', &chunk[i..]) {
                    Some(pos) => {
                        i += pos;
                        if chunk[i] == b'\\' {
                            self.escaped = true;
                        } else {
                            self.in_string = false;
                        }
                        i += 1;
                    }
                    None => return None,
                }
                continue;
            }

            match chunk[i] {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        None
    }
}
