//! absmerge: merge scraped abstracts into raw asset records.
//!
//! Usage: absmerge <RAW_ASSETS> <ABSTRACTS> <OUTPUT> [OPTIONS]

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use abstract_merge::config::parse_key_pair;
use abstract_merge::{
    DuplicatePolicy, FieldMapping, FieldPolicy, JoinCommand, JoinConfig, KeyNormalization,
    KeyPair, KeyPath, MergeError,
};

#[derive(Parser)]
#[command(name = "absmerge")]
#[command(version)]
#[command(about = "Merge scraped publication abstracts into raw asset records (streaming left join)", long_about = None)]
struct Cli {
    /// Raw assets JSON file (array or newline-delimited objects)
    raw_assets: PathBuf,

    /// Abstracts JSON file (array or newline-delimited objects)
    abstracts: PathBuf,

    /// Output JSON file (same layout as the raw assets input)
    output: PathBuf,

    /// Join key path used on both sides (dotted for nested fields)
    #[arg(short, long, default_value = "id")]
    key: KeyPath,

    /// Join key path in the raw assets (overrides --key)
    #[arg(long, value_name = "PATH")]
    raw_key: Option<KeyPath>,

    /// Join key path in the abstracts (overrides --key)
    #[arg(long, value_name = "PATH")]
    abstract_key: Option<KeyPath>,

    /// Fallback key pair tried when the primary key does not match
    #[arg(long, value_name = "RAW_PATH=ABSTRACT_PATH", value_parser = parse_key_pair)]
    fallback: Vec<(KeyPath, KeyPath)>,

    /// Trim and lowercase string keys before matching
    #[arg(long)]
    normalize_keys: bool,

    /// Abstract field to merge, optionally renamed (default: all fields)
    #[arg(short, long = "field", value_name = "SRC[:DST]")]
    fields: Vec<FieldMapping>,

    /// Overwrite raw asset fields instead of only filling missing ones
    #[arg(long)]
    overwrite: bool,

    /// Prefix added to every merged field name
    #[arg(long)]
    prefix: Option<String>,

    /// Keep the first abstract when keys repeat (default: last wins)
    #[arg(long)]
    first_wins: bool,

    /// Print merge statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug details
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn join_config(&self) -> JoinConfig {
        let normalize = if self.normalize_keys {
            KeyNormalization::relaxed()
        } else {
            KeyNormalization::default()
        };

        let raw_key = self.raw_key.clone().unwrap_or_else(|| self.key.clone());
        let abstract_key = self.abstract_key.clone().unwrap_or_else(|| self.key.clone());
        let mut config =
            JoinConfig::with_key(KeyPair::new(raw_key, abstract_key).with_normalization(normalize));

        for (raw, abstracts) in &self.fallback {
            config = config.with_fallback(
                KeyPair::new(raw.clone(), abstracts.clone()).with_normalization(normalize),
            );
        }
        for mapping in &self.fields {
            config = config.with_field(mapping.clone());
        }
        if self.overwrite {
            config = config.with_field_policy(FieldPolicy::Overwrite);
        }
        if self.first_wins {
            config = config.with_duplicate_policy(DuplicatePolicy::FirstWins);
        }
        if let Some(prefix) = &self.prefix {
            config = config.with_prefix(prefix.clone());
        }
        config
    }

    fn log_level(&self) -> &'static str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    let cmd = JoinCommand::new(cli.join_config());
    match cmd.run(&cli.raw_assets, &cli.abstracts, &cli.output) {
        Ok(stats) => {
            if cli.stats {
                eprintln!("Merge stats: {}", stats);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            let code = match e.root() {
                MergeError::Usage(_) => 2,
                _ => 1,
            };
            process::exit(code);
        }
    }
}
