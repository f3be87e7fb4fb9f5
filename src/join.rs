//! Streaming left join of raw assets against an [`AbstractIndex`].
//!
//! The abstracts file is indexed first, then the raw-assets file is
//! streamed one record at a time. Each record is probed, merged if it
//! matches, and written out immediately.
//!
//! # Memory Complexity
//!
//! O(A + r) where A = size of the indexed abstract payloads and
//! r = size of the largest single raw-asset record.
//!
//! # Guarantees
//!
//! - Every raw record appears exactly once, in input order.
//! - Raw fields are never dropped.
//! - Abstracts without a matching raw record never appear in the output.

use crate::config::{FieldPolicy, JoinConfig};
use crate::index::{AbstractIndex, IndexStats};
use crate::json::{MergeError, Phase, Record, RecordReader};
use crate::streaming::RecordWriter;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Statistics from the join phase.
#[derive(Debug, Default, Clone)]
pub struct JoinStats {
    /// Raw-asset records read (and written)
    pub records: usize,
    /// Records that matched an abstract
    pub matched: usize,
    /// Keyed records with no matching abstract
    pub unmatched: usize,
    /// Records with no usable join key, passed through
    pub unkeyed: usize,
    /// Matches found through a fallback key pair
    pub fallback_matches: usize,
    /// Abstract fields added across all records
    pub fields_added: usize,
}

impl fmt::Display for JoinStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Records: {}, Matched: {} ({} by fallback key), Unmatched: {}, Unkeyed: {}, Fields added: {}",
            self.records,
            self.matched,
            self.fallback_matches,
            self.unmatched,
            self.unkeyed,
            self.fields_added
        )
    }
}

/// Combined statistics for a full merge run.
#[derive(Debug, Default, Clone)]
pub struct MergeStats {
    pub index: IndexStats,
    pub join: JoinStats,
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {}", self.index, self.join)
    }
}

/// Outcome of probing the index for one raw record.
#[derive(Debug)]
enum Probe<'a> {
    Hit { pair: usize, payload: &'a Record },
    Miss,
    Unkeyed,
}

/// Per-record join logic.
#[derive(Debug, Clone, Copy)]
pub struct JoinEngine<'a> {
    config: &'a JoinConfig,
    index: &'a AbstractIndex,
}

impl<'a> JoinEngine<'a> {
    pub fn new(config: &'a JoinConfig, index: &'a AbstractIndex) -> Self {
        Self { config, index }
    }

    fn probe(&self, record: &Record) -> Probe<'a> {
        let mut keyed = false;
        for (pair, keys) in self.config.keys.iter().enumerate() {
            let key = match keys.raw.extract(record) {
                Ok(key) => key,
                Err(_) => continue,
            };
            keyed = true;
            if let Some(payload) = self.index.get(pair, key.as_str()) {
                return Probe::Hit { pair, payload };
            }
        }
        if keyed {
            Probe::Miss
        } else {
            Probe::Unkeyed
        }
    }

    /// Merge a payload into a record. Returns the number of fields written.
    pub fn merge_into(&self, record: &mut Record, payload: &Record) -> usize {
        let mut added = 0;
        for (field, value) in payload {
            let name = self.config.target_name(field);
            let write = match self.config.field_policy {
                FieldPolicy::Overwrite => true,
                FieldPolicy::FillMissing => {
                    record.get(name.as_ref()).is_none_or(|existing| existing.is_null())
                }
            };
            if write {
                record.insert(name.into_owned(), value.clone());
                added += 1;
            }
        }
        added
    }

    /// Process one raw record in place.
    pub fn process(&self, record: &mut Record, stats: &mut JoinStats) {
        stats.records += 1;
        match self.probe(record) {
            Probe::Hit { pair, payload } => {
                stats.matched += 1;
                if pair > 0 {
                    stats.fallback_matches += 1;
                }
                stats.fields_added += self.merge_into(record, payload);
            }
            Probe::Miss => stats.unmatched += 1,
            Probe::Unkeyed => stats.unkeyed += 1,
        }
    }

    /// Stream every raw record through the join into `writer`.
    ///
    /// Output order equals input order. Errors are returned as soon as they
    /// occur; records already written are not rolled back.
    pub fn join<R: Read, W: Write>(
        &self,
        reader: RecordReader<R>,
        writer: &mut RecordWriter<W>,
    ) -> Result<JoinStats, MergeError> {
        self.join_labelled(reader, writer, |_, e| e)
    }

    /// Like [`join`](Self::join), passing every error through `label`
    /// together with the phase it came from: [`Phase::Joining`] for read
    /// failures, [`Phase::Writing`] for write failures.
    pub fn join_labelled<R, W, L>(
        &self,
        mut reader: RecordReader<R>,
        writer: &mut RecordWriter<W>,
        label: L,
    ) -> Result<JoinStats, MergeError>
    where
        R: Read,
        W: Write,
        L: Fn(Phase, MergeError) -> MergeError,
    {
        let mut stats = JoinStats::default();
        while let Some(mut record) = reader
            .read_record()
            .map_err(|e| label(Phase::Joining, e))?
        {
            self.process(&mut record, &mut stats);
            writer
                .write_record(&record)
                .map_err(|e| label(Phase::Writing, e))?;
        }
        Ok(stats)
    }
}

/// Merge command: index abstracts, then stream-join raw assets.
#[derive(Debug, Clone, Default)]
pub struct JoinCommand {
    pub config: JoinConfig,
}

impl JoinCommand {
    pub fn new(config: JoinConfig) -> Self {
        Self { config }
    }

    /// Run the merge on readers and an arbitrary writer.
    ///
    /// The output layout mirrors the raw-assets input layout.
    pub fn run_streams<A: Read, B: Read, W: Write>(
        &self,
        raw_assets: A,
        abstracts: B,
        output: W,
    ) -> Result<(W, MergeStats), MergeError> {
        let abstracts = RecordReader::new(abstracts)?;
        let (index, index_stats) = AbstractIndex::build(abstracts, &self.config)?;

        let raw = RecordReader::new(raw_assets)?;
        let mut writer = RecordWriter::new(output, raw.format());
        let join_stats = JoinEngine::new(&self.config, &index).join(raw, &mut writer)?;
        let output = writer.finish()?;

        Ok((
            output,
            MergeStats {
                index: index_stats,
                join: join_stats,
            },
        ))
    }

    /// Run the merge on files.
    ///
    /// Output goes to a temporary file next to `output_path` and is renamed
    /// into place only after everything has been written. On failure the
    /// temporary file is removed and `output_path` is left untouched.
    pub fn run<P: AsRef<Path>, Q: AsRef<Path>, O: AsRef<Path>>(
        &self,
        raw_path: P,
        abstracts_path: Q,
        output_path: O,
    ) -> Result<MergeStats, MergeError> {
        let raw_path = raw_path.as_ref();
        let abstracts_path = abstracts_path.as_ref();
        let output_path = output_path.as_ref();

        if output_path == raw_path || output_path == abstracts_path {
            return Err(MergeError::Usage(format!(
                "output '{}' must differ from both inputs",
                output_path.display()
            )));
        }

        // Phase 1: index abstracts (the handle is closed when the reader drops)
        log::info!("Indexing abstracts from '{}'...", abstracts_path.display());
        let (index, index_stats) = File::open(abstracts_path)
            .map_err(MergeError::from)
            .and_then(RecordReader::new)
            .and_then(|reader| {
                log::debug!("Abstracts format: {}", reader.format());
                AbstractIndex::build(reader, &self.config)
            })
            .map_err(|e| e.in_phase(Phase::Indexing, abstracts_path))?;
        log::info!("{}", index_stats);

        // Phase 2: stream raw assets through the join
        log::info!("Joining raw assets from '{}'...", raw_path.display());
        let raw = File::open(raw_path)
            .map_err(MergeError::from)
            .and_then(RecordReader::new)
            .map_err(|e| e.in_phase(Phase::Joining, raw_path))?;
        log::debug!("Raw assets format: {}", raw.format());

        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let temp = NamedTempFile::new_in(dir)
            .map_err(|e| MergeError::from(e).in_phase(Phase::Writing, output_path))?;
        let mut writer = RecordWriter::new(temp, raw.format());

        let join_stats = JoinEngine::new(&self.config, &index).join_labelled(
            raw,
            &mut writer,
            |phase, e| match phase {
                Phase::Writing => e.in_phase(phase, output_path),
                _ => e.in_phase(phase, raw_path),
            },
        )?;
        drop(index);

        let temp = writer
            .finish()
            .map_err(|e| e.in_phase(Phase::Writing, output_path))?;
        temp.persist(output_path)
            .map_err(|e| MergeError::from(e.error).in_phase(Phase::Writing, output_path))?;

        log::info!("{}", join_stats);
        log::info!("Done. Merged records saved to '{}'.", output_path.display());

        Ok(MergeStats {
            index: index_stats,
            join: join_stats,
        })
    }
}
