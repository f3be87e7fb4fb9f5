//! Join key extraction.
//!
//! Both sides of the join go through the same [`KeyExtractor`] coercion,
//! so equal logical identifiers always produce equal [`JoinKey`]s:
//! `"42"`, `42` and `42.0` all canonicalize to `42`.

use crate::json::{MergeError, Record};
use serde_json::{Number, Value};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A record has no usable join key.
///
/// Always recovered locally: unkeyed abstracts are skipped, unkeyed raw
/// assets pass through unmodified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MissingKey {
    #[error("join key '{0}' is absent")]
    Absent(String),

    #[error("join key '{0}' is null")]
    Null(String),

    #[error("join key '{0}' is empty")]
    Empty(String),

    #[error("join key '{path}' has unsupported type {kind}")]
    Unsupported { path: String, kind: &'static str },
}

/// Canonical string form of a join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinKey(String);

impl JoinKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JoinKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dotted path to a (possibly nested) key field, e.g. `publication_id.$oid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    text: String,
    segments: Vec<String>,
}

impl KeyPath {
    /// A single top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            segments: vec![name.clone()],
            text: name,
        }
    }

    /// Path as written, e.g. `_id.$oid`.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Resolve the path against a record.
    pub fn lookup<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = record.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl FromStr for KeyPath {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(MergeError::Usage(format!("invalid key path '{}'", s)));
        }
        Ok(Self {
            text: s.to_string(),
            segments,
        })
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// String key normalization, applied before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyNormalization {
    /// Strip leading and trailing whitespace.
    pub trim: bool,
    /// Compare case-insensitively (DOIs, for example).
    pub lowercase: bool,
}

impl KeyNormalization {
    /// Trim and lowercase.
    pub fn relaxed() -> Self {
        Self {
            trim: true,
            lowercase: true,
        }
    }

    fn apply(&self, s: &str) -> String {
        let s = if self.trim { s.trim() } else { s };
        if self.lowercase {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }
}

/// Extracts a canonical join key from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExtractor {
    path: KeyPath,
    normalize: KeyNormalization,
}

impl KeyExtractor {
    pub fn new(path: KeyPath) -> Self {
        Self {
            path,
            normalize: KeyNormalization::default(),
        }
    }

    pub fn with_normalization(mut self, normalize: KeyNormalization) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Derive the record's join key.
    pub fn extract(&self, record: &Record) -> Result<JoinKey, MissingKey> {
        let value = self
            .path
            .lookup(record)
            .ok_or_else(|| MissingKey::Absent(self.path.to_string()))?;
        self.canonicalize(value)
    }

    /// Coerce a key value to its canonical string form.
    pub fn canonicalize(&self, value: &Value) -> Result<JoinKey, MissingKey> {
        let unsupported = |kind| MissingKey::Unsupported {
            path: self.path.to_string(),
            kind,
        };
        match value {
            Value::Null => Err(MissingKey::Null(self.path.to_string())),
            Value::String(s) => {
                if s.trim().is_empty() {
                    return Err(MissingKey::Empty(self.path.to_string()));
                }
                Ok(JoinKey(self.normalize.apply(s)))
            }
            Value::Number(n) => Ok(JoinKey(canonical_number(n))),
            Value::Bool(_) => Err(unsupported("bool")),
            Value::Array(_) => Err(unsupported("array")),
            Value::Object(_) => Err(unsupported("object")),
        }
    }
}

/// Longest plain-decimal form a numeric key may take before switching to
/// `<digits>e<exponent>`.
const MAX_PLAIN_DIGITS: i64 = 64;

/// Canonical text of a JSON number, computed from its literal digits.
///
/// Integral values print as plain integers (`42.0` and `4.2e1` become
/// `42`), other values as plain decimals without trailing zeros. No value
/// is routed through `f64`, so distinct numbers keep distinct keys.
pub fn canonical_number(n: &Number) -> String {
    let text = n.to_string();
    canonical_decimal(&text).unwrap_or(text)
}

fn canonical_decimal(text: &str) -> Option<String> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(pos) => (&unsigned[..pos], unsigned[pos + 1..].parse::<i64>().ok()?),
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty()
        || !int_part
            .bytes()
            .chain(frac_part.bytes())
            .all(|b| b.is_ascii_digit())
    {
        return None;
    }

    // value = digits * 10^exponent, with no leading or trailing zeros in digits
    let joined = format!("{}{}", int_part, frac_part);
    let leading = joined.trim_start_matches('0');
    let digits = leading.trim_end_matches('0');
    if digits.is_empty() {
        return Some("0".to_string());
    }
    let exponent = exponent
        .checked_sub(i64::try_from(frac_part.len()).ok()?)?
        .checked_add(i64::try_from(leading.len() - digits.len()).ok()?)?;
    let len = i64::try_from(digits.len()).ok()?;

    let mut out = String::with_capacity(digits.len() + 8);
    if negative {
        out.push('-');
    }
    if exponent >= 0 && len + exponent <= MAX_PLAIN_DIGITS {
        out.push_str(digits);
        out.extend(std::iter::repeat('0').take(exponent as usize));
    } else if exponent < 0 && len + exponent > 0 {
        let (whole, fraction) = digits.split_at((len + exponent) as usize);
        out.push_str(whole);
        out.push('.');
        out.push_str(fraction);
    } else if exponent < 0 && len - exponent <= MAX_PLAIN_DIGITS {
        out.push_str("0.");
        out.extend(std::iter::repeat('0').take((-exponent - len) as usize));
        out.push_str(digits);
    } else {
        out.push_str(digits);
        out.push('e');
        out.push_str(itoa::Buffer::new().format(exponent));
    }
    Some(out)
}
