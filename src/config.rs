//! Join configuration.
//!
//! A [`JoinConfig`] is built once (by the CLI or a library caller) and
//! passed by reference into both phases. There is no process-wide state.

use crate::json::{MergeError, Record};
use crate::key::{KeyExtractor, KeyNormalization, KeyPath};
use std::borrow::Cow;
use std::str::FromStr;

/// Which abstract wins when two share a join key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// A later abstract replaces an earlier one.
    #[default]
    LastWins,
    /// The first abstract seen is kept.
    FirstWins,
}

/// How abstract fields are merged into a raw asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Only add a field when the raw asset lacks it or has it as `null`.
    #[default]
    FillMissing,
    /// Always write abstract fields, replacing raw values.
    Overwrite,
}

/// Paired key extractors for the raw-asset and abstract sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub raw: KeyExtractor,
    pub abstracts: KeyExtractor,
}

impl KeyPair {
    pub fn new(raw: KeyPath, abstracts: KeyPath) -> Self {
        Self {
            raw: KeyExtractor::new(raw),
            abstracts: KeyExtractor::new(abstracts),
        }
    }

    /// Same field name on both sides.
    pub fn same(path: KeyPath) -> Self {
        Self::new(path.clone(), path)
    }

    pub fn with_normalization(self, normalize: KeyNormalization) -> Self {
        Self {
            raw: self.raw.with_normalization(normalize),
            abstracts: self.abstracts.with_normalization(normalize),
        }
    }
}

/// Abstract field to carry over, optionally renamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FromStr for FieldMapping {
    type Err = MergeError;

    /// Parses `source` or `source:target`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, target) = match s.split_once(':') {
            Some((source, target)) => (source, target),
            None => (s, s),
        };
        if source.is_empty() || target.is_empty() {
            return Err(MergeError::Usage(format!(
                "invalid field mapping '{}', expected SOURCE or SOURCE:TARGET",
                s
            )));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
        })
    }
}

/// Parse a `RAW_PATH=ABSTRACT_PATH` fallback key pair.
pub fn parse_key_pair(s: &str) -> Result<(KeyPath, KeyPath), MergeError> {
    let (raw, abstracts) = s.split_once('=').ok_or_else(|| {
        MergeError::Usage(format!(
            "invalid key pair '{}', expected RAW_PATH=ABSTRACT_PATH",
            s
        ))
    })?;
    Ok((raw.parse()?, abstracts.parse()?))
}

/// Full configuration for one merge run.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    /// Key pairs tried in order; the first hit wins.
    pub keys: Vec<KeyPair>,
    /// Abstract fields to merge. Empty means every field.
    pub fields: Vec<FieldMapping>,
    pub duplicate_policy: DuplicatePolicy,
    pub field_policy: FieldPolicy,
    /// Prepended to every merged field name.
    pub prefix: Option<String>,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinConfig {
    /// Join on `id` with default policies.
    pub fn new() -> Self {
        Self::with_key(KeyPair::same(KeyPath::field("id")))
    }

    /// Start from a single primary key pair.
    pub fn with_key(primary: KeyPair) -> Self {
        Self {
            keys: vec![primary],
            fields: Vec::new(),
            duplicate_policy: DuplicatePolicy::default(),
            field_policy: FieldPolicy::default(),
            prefix: None,
        }
    }

    /// Add a fallback key pair, tried after the existing ones.
    pub fn with_fallback(mut self, pair: KeyPair) -> Self {
        self.keys.push(pair);
        self
    }

    pub fn with_field(mut self, mapping: FieldMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_field_policy(mut self, policy: FieldPolicy) -> Self {
        self.field_policy = policy;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Reduce an abstract record to the payload that will be merged.
    ///
    /// Without field mappings the whole record is the payload. With
    /// mappings, only mapped fields that are present and non-null are kept.
    pub fn project(&self, mut record: Record) -> Record {
        if self.fields.is_empty() {
            return record;
        }
        let mut payload = Record::new();
        for mapping in &self.fields {
            match record.remove(&mapping.source) {
                Some(value) if !value.is_null() => {
                    payload.insert(mapping.target.clone(), value);
                }
                _ => {}
            }
        }
        payload
    }

    /// Output field name for a merged abstract field.
    pub fn target_name<'a>(&self, field: &'a str) -> Cow<'a, str> {
        match &self.prefix {
            Some(prefix) => Cow::Owned(format!("{}{}", prefix, field)),
            None => Cow::Borrowed(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = JoinConfig::default();
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.keys[0].raw.path().as_str(), "id");
        assert_eq!(config.duplicate_policy, DuplicatePolicy::LastWins);
        assert_eq!(config.field_policy, FieldPolicy::FillMissing);
        assert!(config.prefix.is_none());
    }

    #[test]
    fn test_parse_field_mapping() {
        let m: FieldMapping = "publication_abstract_cleaned:abstract".parse().unwrap();
        assert_eq!(m.source, "publication_abstract_cleaned");
        assert_eq!(m.target, "abstract");

        let m: FieldMapping = "abstract".parse().unwrap();
        assert_eq!(m.source, "abstract");
        assert_eq!(m.target, "abstract");

        assert!(":abstract".parse::<FieldMapping>().is_err());
        assert!("abstract:".parse::<FieldMapping>().is_err());
    }

    #[test]
    fn test_parse_key_pair() {
        let (raw, abstracts) = parse_key_pair("publication_DOI=publication_doi").unwrap();
        assert_eq!(raw.as_str(), "publication_DOI");
        assert_eq!(abstracts.as_str(), "publication_doi");
        assert!(parse_key_pair("no_separator").is_err());
        assert!(parse_key_pair("=b").is_err());
    }

    #[test]
    fn test_project_all_fields() {
        let config = JoinConfig::new();
        let payload = config.project(record(json!({"id": "1", "abstract": "x"})));
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn test_project_mapped_fields() {
        let config = JoinConfig::new()
            .with_field("publication_abstract_cleaned:abstract".parse().unwrap())
            .with_field("keywords".parse().unwrap());
        let payload = config.project(record(json!({
            "_id": {"$oid": "1"},
            "publication_abstract_cleaned": "text",
            "keywords": null,
        })));
        assert_eq!(payload, record(json!({"abstract": "text"})));
    }

    #[test]
    fn test_target_name_prefix() {
        let config = JoinConfig::new();
        assert_eq!(config.target_name("abstract"), "abstract");
        let config = config.with_prefix("scraped_");
        assert_eq!(config.target_name("abstract"), "scraped_abstract");
    }
}
