//! pii-veil command-line interface

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pii_veil_core::{
    AnonymizationRecord, AnonymizerEngine, Config, DeanonymizerEngine, DetectedSpan, EncryptionKey,
    RecordStore, RegexDetectionEngine,
};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, global = true, default_value = "info", help = "Log level (error, warn, info, debug, trace)")]
    pub log_level: String,

    #[arg(long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect PII and print the spans as JSON
    Analyze {
        #[arg(help = "Input file, or - for stdin")]
        input: String,

        #[arg(long, value_delimiter = ',', help = "Only detect these entity types")]
        entities: Vec<String>,
    },

    /// Anonymize text and print the new text with its records
    Anonymize {
        #[arg(help = "Input file, or - for stdin")]
        input: String,

        #[arg(long, help = "Read detected spans from a JSON file instead of running detection")]
        spans: Option<PathBuf>,

        #[arg(long, value_delimiter = ',', help = "Only detect these entity types")]
        entities: Vec<String>,

        #[arg(long, help = "Persist the records and print the document id")]
        store: bool,
    },

    /// Restore encrypted entities in anonymized text
    Deanonymize {
        #[arg(help = "Input file, or - for stdin")]
        input: String,

        #[arg(long, conflicts_with = "records", help = "Use records stored under this document id")]
        document: Option<String>,

        #[arg(long, help = "Use records from a JSON file (bare list or anonymize output)")]
        records: Option<PathBuf>,
    },

    /// Inspect or prune the record store
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },

    /// Write the default configuration file
    InitConfig {
        #[arg(long, help = "Destination (defaults to the user config directory)")]
        path: Option<PathBuf>,

        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// Print document and record counts
    Stats,
    /// Delete the records of one document
    Delete { document: String },
    /// Delete every stored document
    Clear,
}

#[derive(Debug, Serialize)]
struct AnonymizeOutput<'a> {
    text: &'a str,
    records: &'a [AnonymizationRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<String>,
}

/// Records accepted by `deanonymize --records`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordsFile {
    Bare(Vec<AnonymizationRecord>),
    AnonymizeOutput { records: Vec<AnonymizationRecord> },
}

impl RecordsFile {
    fn into_records(self) -> Vec<AnonymizationRecord> {
        match self {
            Self::Bare(records) | Self::AnonymizeOutput { records } => records,
        }
    }
}

pub fn parse_log_level(level: &str) -> tracing::Level {
    level.parse::<tracing::Level>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", level);
        tracing::Level::INFO
    })
}

fn init_tracing(level: &str) {
    match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_max_level(parse_log_level(level))
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

pub fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read input file {}", input))
    }
}

pub fn read_spans(path: &Path) -> Result<Vec<DetectedSpan>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spans file {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid spans JSON in {}", path.display()))
}

pub fn read_records(path: &Path) -> Result<Vec<AnonymizationRecord>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file {}", path.display()))?;
    let parsed: RecordsFile =
        serde_json::from_str(&contents).with_context(|| format!("Invalid records JSON in {}", path.display()))?;
    Ok(parsed.into_records())
}

fn load_config(path: Option<&Path>) -> Result<(Config, EncryptionKey)> {
    let config = match path {
        Some(config_path) => {
            info!("Loading configuration from: {}", config_path.display());
            Config::from_file(config_path)?
        }
        None => match Config::get_default_config_path() {
            Ok(default_path) if default_path.exists() => {
                info!("Loading configuration from default location: {}", default_path.display());
                Config::from_file(&default_path)?
            }
            _ => {
                info!("Using default configuration");
                let mut config = Config::default();
                config.resolve_paths()?;
                config
            }
        },
    };

    let key = config.validate()?;
    info!("Configuration validated successfully (key {})", key.fingerprint());
    Ok((config, key))
}

fn detect(config: &Config, text: &str, entities: &[String]) -> Result<Vec<DetectedSpan>> {
    let engine = RegexDetectionEngine::new(&config.detection)?;
    let spans = if entities.is_empty() {
        engine.detect(text)
    } else {
        engine.detect_entities(text, entities)
    };
    info!("Detected {} spans", spans.len());
    Ok(spans)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_default_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => Config::get_default_config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default().to_file(&path)?;
    info!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config_path = args.config;
    let config = || load_config(config_path.as_deref());

    match args.command {
        Command::InitConfig { path, force } => write_default_config(path, force),
        Command::Analyze { input, entities } => {
            let (config, _) = config()?;
            let text = read_input(&input)?;
            print_json(&detect(&config, &text, &entities)?)
        }
        Command::Anonymize {
            input,
            spans,
            entities,
            store,
        } => {
            let (config, key) = config()?;
            let text = read_input(&input)?;
            let spans = match spans {
                Some(path) => read_spans(&path)?,
                None => detect(&config, &text, &entities)?,
            };

            let anonymizer = AnonymizerEngine::new(config.anonymization_registry(&key)?);
            let result = anonymizer.anonymize(&text, &spans)?;
            info!("Anonymized {} entities", result.records.len());

            let document_id = if store {
                let mut record_store = RecordStore::new(config.store.clone())?;
                Some(record_store.save_records(&result.records)?)
            } else {
                None
            };

            print_json(&AnonymizeOutput {
                text: &result.text,
                records: &result.records,
                document_id,
            })
        }
        Command::Deanonymize {
            input,
            document,
            records,
        } => {
            let (config, key) = config()?;
            let text = read_input(&input)?;
            let deanonymizer = DeanonymizerEngine::new(config.deanonymization_registry(&key)?);

            let records = match (document, records) {
                (Some(document_id), _) => {
                    let record_store = RecordStore::new(config.store.clone())?;
                    let records = record_store
                        .load_records(&document_id)?
                        .ok_or_else(|| anyhow::anyhow!("No stored records for document {}", document_id))?;
                    Some(records)
                }
                (None, Some(path)) => Some(read_records(&path)?),
                (None, None) => None,
            };

            let result = match records {
                Some(records) => deanonymizer.deanonymize_with_records(&text, &records)?,
                None => {
                    info!("No records supplied, scanning for reversible tokens");
                    deanonymizer.deanonymize(&text)?
                }
            };

            if !result.is_complete() {
                warn!("{} regions could not be recovered", result.unrecovered.len());
            }
            print_json(&result)
        }
        Command::Store { action } => {
            let (config, _) = config()?;
            let mut record_store = RecordStore::new(config.store.clone())?;
            match action {
                StoreAction::Stats => {
                    let stats = record_store.get_statistics()?;
                    print_json(&serde_json::json!({
                        "total_documents": stats.total_documents,
                        "total_records": stats.total_records,
                        "records_by_type": stats.records_by_type,
                        "oldest_document_age": stats.oldest_document_age,
                    }))
                }
                StoreAction::Delete { document } => {
                    if !record_store.delete_records(&document)? {
                        anyhow::bail!("No stored records for document {}", document);
                    }
                    info!("Deleted document {}", document);
                    Ok(())
                }
                StoreAction::Clear => {
                    let deleted = record_store.clear_all()?;
                    info!("Deleted {} documents", deleted);
                    Ok(())
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);
    run(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_log_level("WARN"), tracing::Level::WARN);
        assert_eq!(parse_log_level("chatty"), tracing::Level::INFO);
    }

    #[test]
    fn test_parse_anonymize_args() {
        let args = Args::try_parse_from([
            "pii-veil",
            "--log-level",
            "debug",
            "anonymize",
            "input.txt",
            "--store",
            "--entities",
            "EMAIL_ADDRESS,CREDIT_CARD",
        ])
        .unwrap();

        assert_eq!(args.log_level, "debug");
        match args.command {
            Command::Anonymize {
                input,
                spans,
                entities,
                store,
            } => {
                assert_eq!(input, "input.txt");
                assert!(spans.is_none());
                assert_eq!(entities, vec!["EMAIL_ADDRESS", "CREDIT_CARD"]);
                assert!(store);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_document_and_records_conflict() {
        let result = Args::try_parse_from([
            "pii-veil",
            "deanonymize",
            "-",
            "--document",
            "abc",
            "--records",
            "records.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_read_input_from_file() {
        let file = write_temp("call me at 555-1234");
        let text = read_input(file.path().to_str().unwrap()).unwrap();
        assert_eq!(text, "call me at 555-1234");

        assert!(read_input("/definitely/not/here.txt").is_err());
    }

    #[test]
    fn test_read_spans() {
        let file = write_temp(r#"[{"entity_type": "PHONE_NUMBER", "start": 11, "end": 19, "score": 0.9}]"#);
        let spans = read_spans(file.path()).unwrap();
        assert_eq!(spans, vec![DetectedSpan::new("PHONE_NUMBER", 11, 19, 0.9)]);
    }

    #[test]
    fn test_read_records_accepts_both_shapes() {
        let record = r#"{"entity_type": "CREDIT_CARD", "original_start": 5, "original_end": 21,
                         "new_start": 5, "new_end": 50, "operator_applied": "encrypt"}"#;

        let bare = write_temp(&format!("[{}]", record));
        let wrapped = write_temp(&format!(r#"{{"text": "card x", "records": [{}]}}"#, record));

        let from_bare = read_records(bare.path()).unwrap();
        let from_wrapped = read_records(wrapped.path()).unwrap();
        assert_eq!(from_bare, from_wrapped);
        assert_eq!(from_bare[0].new_end, 50);
    }

    #[test]
    fn test_init_config_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pii-veil.toml");

        let args = Args::try_parse_from(["pii-veil", "init-config", "--path", path.to_str().unwrap()]).unwrap();
        run(args).unwrap();
        assert!(Config::from_file(&path).is_ok());

        let again = Args::try_parse_from(["pii-veil", "init-config", "--path", path.to_str().unwrap()]).unwrap();
        assert!(run(again).is_err());
    }
}
