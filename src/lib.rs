//! abstract-merge: streaming left join of raw asset records with scraped
//! publication abstracts.
//!
//! # Features
//!
//! - **Streaming I/O**: raw assets are read and written one record at a time
//! - **Bounded memory**: only the abstracts index is held in memory
//! - **Shape agnostic**: records are generic ordered maps; only the join key
//!   is inspected, everything else passes through verbatim
//!
//! # Example
//!
//! ```rust,no_run
//! use abstract_merge::{JoinCommand, JoinConfig};
//!
//! let cmd = JoinCommand::new(JoinConfig::new());
//! let stats = cmd
//!     .run("raw_assets.json", "abstracts.json", "merged.json")
//!     .unwrap();
//! println!("{}", stats);
//! ```

pub mod config;
pub mod index;
pub mod join;
pub mod json;
pub mod key;
pub mod streaming;

// Re-export commonly used types
pub use config::{DuplicatePolicy, FieldMapping, FieldPolicy, JoinConfig, KeyPair};
pub use index::{AbstractIndex, IndexStats};
pub use join::{JoinCommand, JoinEngine, JoinStats, MergeStats};
pub use json::{InputFormat, MergeError, Phase, Record, RecordReader};
pub use key::{JoinKey, KeyExtractor, KeyNormalization, KeyPath, MissingKey};
pub use streaming::RecordWriter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{DuplicatePolicy, FieldPolicy, JoinConfig, KeyPair};
    pub use crate::index::AbstractIndex;
    pub use crate::join::{JoinCommand, JoinEngine};
    pub use crate::json::{InputFormat, MergeError, Record, RecordReader};
    pub use crate::key::{KeyExtractor, KeyPath};
    pub use crate::streaming::RecordWriter;
}
