//! In-memory index of abstract payloads by join key.

use crate::config::{DuplicatePolicy, JoinConfig};
use crate::json::{MergeError, Record, RecordReader};
use crate::key::JoinKey;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::io::Read;

/// Statistics from building an [`AbstractIndex`].
#[derive(Debug, Default, Clone)]
pub struct IndexStats {
    /// Abstract records read
    pub records: usize,
    /// Records stored in the index
    pub indexed: usize,
    /// Records skipped because no key could be extracted
    pub skipped: usize,
    /// Records skipped because none of the mapped fields were present
    pub empty: usize,
    /// Abstracts whose key collided with an earlier abstract
    pub duplicates: usize,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Abstracts: {}, Indexed: {}, Unkeyed: {}, Empty: {}, Duplicate keys: {}",
            self.records, self.indexed, self.skipped, self.empty, self.duplicates
        )
    }
}

/// Abstract payloads, addressable by one key map per configured key pair.
///
/// Built once before the join and only read while the join runs.
/// Each payload is stored once; key maps hold positions into `payloads`.
#[derive(Debug, Default)]
pub struct AbstractIndex {
    payloads: Vec<Record>,
    keys: Vec<FxHashMap<JoinKey, usize>>,
}

impl AbstractIndex {
    /// Create an empty index with `key_pairs` key maps.
    pub fn new(key_pairs: usize) -> Self {
        Self {
            payloads: Vec::new(),
            keys: (0..key_pairs).map(|_| FxHashMap::default()).collect(),
        }
    }

    /// Consume an abstracts stream and index every keyable record.
    ///
    /// Records without a key under any key pair are skipped and counted;
    /// they never abort the build.
    pub fn build<R: Read>(
        mut reader: RecordReader<R>,
        config: &JoinConfig,
    ) -> Result<(Self, IndexStats), MergeError> {
        let mut index = Self::new(config.keys.len());
        let mut stats = IndexStats::default();

        while let Some(record) = reader.read_record()? {
            stats.records += 1;
            index.insert(record, config, &mut stats);
        }

        log::debug!(
            "Indexed {} abstracts under {} distinct primary keys",
            index.payloads.len(),
            index.keys.first().map_or(0, |m| m.len())
        );
        Ok((index, stats))
    }

    /// Index a single abstract record.
    pub fn insert(&mut self, record: Record, config: &JoinConfig, stats: &mut IndexStats) {
        let keys: Vec<Option<JoinKey>> = config
            .keys
            .iter()
            .map(|pair| match pair.abstracts.extract(&record) {
                Ok(key) => Some(key),
                Err(e) => {
                    log::trace!("abstract {}: {}", stats.records, e);
                    None
                }
            })
            .collect();

        if keys.iter().all(Option::is_none) {
            log::debug!("Skipping abstract {}: no join key", stats.records);
            stats.skipped += 1;
            return;
        }

        let payload = config.project(record);
        if payload.is_empty() {
            stats.empty += 1;
            return;
        }

        let slot = self.payloads.len();
        self.payloads.push(payload);
        stats.indexed += 1;

        let mut collided = false;
        for (map, key) in self.keys.iter_mut().zip(keys) {
            let Some(key) = key else { continue };
            match map.entry(key) {
                Entry::Vacant(e) => {
                    e.insert(slot);
                }
                Entry::Occupied(mut e) => {
                    collided = true;
                    log::debug!("Duplicate abstract key '{}'", e.key());
                    if config.duplicate_policy == DuplicatePolicy::LastWins {
                        e.insert(slot);
                    }
                }
            }
        }
        if collided {
            stats.duplicates += 1;
        }
    }

    /// Look up a payload under the key map of key pair `pair`.
    #[inline]
    pub fn get(&self, pair: usize, key: &str) -> Option<&Record> {
        let slot = *self.keys.get(pair)?.get(key)?;
        self.payloads.get(slot)
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Number of distinct keys under key pair `pair`.
    pub fn key_count(&self, pair: usize) -> usize {
        self.keys.get(pair).map_or(0, |m| m.len())
    }
}
