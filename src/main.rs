//! `sectionwire` - run a section script through the codec.
//!
//! Reads a JSON array of encoder commands, drives the encoder in one task
//! and the decoder in another over an unbuffered frame channel, and prints
//! every decoded section as one line of JSON.
//!
//! ```json
//! [
//!   {"object":  {"type": "secObj", "path": ["meta"], "value": {"total": 1}}},
//!   {"map":     {"type": "secMap", "path": ["c", "2"]}},
//!   {"element": {"name": "id1", "value": {"fld1": "v1"}}}
//! ]
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sectionwire::streaming::{decode_sections_with, frame_channel, FrameSender, SectionEncoder};
use sectionwire::CodecConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sectionwire",
    version,
    about = "Encode a section script and print the decoded sections"
)]
struct Cli {
    /// JSON script to run (stdin when omitted)
    input: Option<PathBuf>,

    /// Codec configuration file (TOML)
    #[arg(short, long, env = "SECTIONWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Command {
    Map {
        #[serde(rename = "type", default)]
        section_type: String,
        #[serde(default)]
        path: Vec<String>,
    },
    Array {
        #[serde(rename = "type", default)]
        section_type: String,
        #[serde(default)]
        path: Vec<String>,
    },
    Object {
        #[serde(rename = "type", default)]
        section_type: String,
        #[serde(default)]
        path: Vec<String>,
        value: serde_json::Value,
    },
    Element {
        #[serde(default)]
        name: String,
        value: serde_json::Value,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => CodecConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CodecConfig::default(),
    };

    let script = read_script(cli.input.as_deref()).await?;
    let commands: Vec<Command> = serde_json::from_str(&script).context("Invalid section script")?;
    tracing::info!(commands = commands.len(), "Running section script");

    let (tx, rx) = frame_channel();
    let encoder = SectionEncoder::new(tx).with_config(config.clone());
    let producer = tokio::spawn(run_script(encoder, commands));

    let mut sections = decode_sections_with(rx, config);
    let mut stdout = tokio::io::stdout();
    while let Some(mut section) = sections.next().await {
        let line = section.to_json_bytes().await?;
        stdout.write_all(&line).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;

    sections.finish().await.context("Decoding failed")?;
    producer.await??;
    Ok(())
}

async fn run_script(mut encoder: SectionEncoder<FrameSender>, commands: Vec<Command>) -> Result<()> {
    for (i, command) in commands.into_iter().enumerate() {
        let result = match command {
            Command::Map { section_type, path } => {
                encoder
                    .start_map_section(&section_type, &as_refs(&path))
                    .await
            }
            Command::Array { section_type, path } => {
                encoder
                    .start_array_section(&section_type, &as_refs(&path))
                    .await
            }
            Command::Object {
                section_type,
                path,
                value,
            } => {
                encoder
                    .object_section(&section_type, &as_refs(&path), &value)
                    .await
            }
            Command::Element { name, value } => encoder.send_element(&name, &value).await,
        };
        result.with_context(|| format!("Script command #{} failed", i + 1))?;
    }
    // Dropping the encoder closes the frame channel
    Ok(())
}

fn as_refs(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

async fn read_script(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut script = String::new();
            tokio::io::stdin()
                .read_to_string(&mut script)
                .await
                .context("Failed to read script from stdin")?;
            Ok(script)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
