//! Command-line interface for the `fanout` binary.
//!
//! Tees one input to any number of output files while optionally hashing and
//! sniffing it, reading the input only once.

use crate::config::FanoutConfig;
use crate::fanout::{FanoutPipeline, PipelineReport, ReaderHandle};
use crate::sinks::{self, ContentKind};
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "fanout",
    version,
    about = "Copy one input stream to several consumers concurrently"
)]
pub struct Cli {
    /// Input file; reads stdin when omitted or "-"
    pub input: Option<PathBuf>,

    /// Write a copy of the input to this file (repeatable)
    #[arg(short, long = "output", value_name = "PATH")]
    pub outputs: Vec<PathBuf>,

    /// Print the BLAKE3 digest of the input
    #[arg(long)]
    pub digest: bool,

    /// Detect the content type from the first bytes of the input
    #[arg(long)]
    pub sniff: bool,

    /// Shared buffer size in bytes
    #[arg(long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// Minimum free buffer space before reading the input again
    #[arg(long, value_name = "BYTES")]
    pub min_read_size: Option<usize>,

    /// TOML file with buffer settings; flags override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Buffer settings from the config file (if any) with flag overrides.
    pub fn fanout_config(&self) -> Result<FanoutConfig> {
        let mut config = match &self.config {
            Some(path) => FanoutConfig::load(path)?,
            None => FanoutConfig::default(),
        };
        if let Some(size) = self.buffer_size {
            config = config.with_buffer_size(size);
        }
        if let Some(size) = self.min_read_size {
            config = config.with_min_read_size(size);
        }
        config.validate()?;
        Ok(config)
    }

    /// Default `tracing` filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }

    fn reads_stdin(&self) -> bool {
        self.input.as_deref().map_or(true, |p| p == Path::new("-"))
    }
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerFailure {
    pub consumer: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub bytes_read: u64,
    pub outputs: Vec<OutputSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentKind>,
    pub failures: Vec<ConsumerFailure>,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn render_text(&self) -> String {
        let mut out = format!("read {} bytes\n", self.bytes_read);
        for output in &self.outputs {
            out.push_str(&format!("wrote {} bytes to {}\n", output.bytes, output.path));
        }
        if let Some(digest) = &self.blake3 {
            out.push_str(&format!("blake3 {}\n", digest));
        }
        if let Some(kind) = &self.content_type {
            out.push_str(&format!("content-type {}\n", kind));
        }
        out
    }

    pub fn render_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to encode summary")
    }
}

// =============================================================================
// Execution
// =============================================================================

/// What a single consumer produced
#[derive(Debug)]
enum Product {
    Written(PathBuf, u64),
    Digest(String),
    Kind(ContentKind),
}

/// Runs the tee described by `cli`. Consumer failures are reported in the
/// summary; input and configuration failures are returned as errors.
pub fn execute(cli: &Cli) -> Result<Summary> {
    if cli.outputs.is_empty() && !cli.digest && !cli.sniff {
        anyhow::bail!("Nothing to do: pass --output, --digest or --sniff");
    }
    let config = cli.fanout_config()?;

    let source: Box<dyn Read> = if cli.reads_stdin() {
        Box::new(io::stdin().lock())
    } else {
        let path = cli.input.as_deref().unwrap_or(Path::new("-"));
        Box::new(
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?,
        )
    };

    let mut pipeline = FanoutPipeline::new(config);
    for path in &cli.outputs {
        let path = path.clone();
        pipeline = pipeline.consumer(
            format!("output:{}", path.display()),
            move |reader: ReaderHandle| {
                let written = sinks::copy_to_file(reader, &path)?;
                Ok(Product::Written(path, written))
            },
        );
    }
    if cli.digest {
        pipeline = pipeline.consumer("digest", |reader: ReaderHandle| {
            Ok(Product::Digest(sinks::digest(reader)?))
        });
    }
    if cli.sniff {
        pipeline = pipeline.consumer("sniff", |reader: ReaderHandle| {
            Ok(Product::Kind(sinks::sniff(reader)?))
        });
    }

    let report = pipeline.run(source)?;
    Ok(summarize(report))
}

fn summarize(report: PipelineReport<Product>) -> Summary {
    let mut summary = Summary {
        bytes_read: report.bytes_read,
        ..Default::default()
    };
    for outcome in report.outcomes {
        match outcome.result {
            Ok(Product::Written(path, bytes)) => summary.outputs.push(OutputSummary {
                path: path.display().to_string(),
                bytes,
            }),
            Ok(Product::Digest(digest)) => summary.blake3 = Some(digest),
            Ok(Product::Kind(kind)) => summary.content_type = Some(kind),
            Err(err) => summary.failures.push(ConsumerFailure {
                consumer: outcome.name,
                error: format!("{:#}", err),
            }),
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fanout").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_outputs_and_flags() {
        let cli = parse(&["in.bin", "-o", "a", "--output", "b", "--digest", "-vv"]);
        assert_eq!(cli.input, Some(PathBuf::from("in.bin")));
        assert_eq!(cli.outputs, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(cli.digest);
        assert!(!cli.sniff);
        assert_eq!(cli.log_filter(), "debug");
        assert!(!cli.reads_stdin());

        assert!(parse(&["-", "--sniff"]).reads_stdin());
        assert!(parse(&["--sniff"]).reads_stdin());
    }

    #[test]
    fn test_config_file_with_overrides() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("fanout.toml");
        fs::write(&config_path, "buffer_size = 4096\nmin_read_size = 1024\n").unwrap();

        let cli = parse(&[
            "--digest",
            "--config",
            config_path.to_str().unwrap(),
            "--min-read-size",
            "512",
        ]);
        assert_eq!(cli.fanout_config().unwrap(), FanoutConfig::new(4096, 512));

        let cli = parse(&["--digest", "--buffer-size", "100", "--min-read-size", "100"]);
        assert!(cli.fanout_config().is_err());
    }

    #[test]
    fn test_execute_tees_file() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("input.png");
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend((0..50_000u32).map(|i| (i % 251) as u8));
        fs::write(&input, &data).unwrap();

        let out_a = tmp.path().join("a.png");
        let out_b = tmp.path().join("copies/b.png");
        let cli = parse(&[
            input.to_str().unwrap(),
            "-o",
            out_a.to_str().unwrap(),
            "-o",
            out_b.to_str().unwrap(),
            "--digest",
            "--sniff",
            "--buffer-size",
            "4096",
            "--min-read-size",
            "256",
        ]);

        let summary = execute(&cli).unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.bytes_read, data.len() as u64);
        assert_eq!(summary.outputs.len(), 2);
        assert_eq!(fs::read(&out_a).unwrap(), data);
        assert_eq!(fs::read(&out_b).unwrap(), data);
        assert_eq!(
            summary.blake3.as_deref(),
            Some(blake3::hash(&data).to_hex().as_str())
        );
        assert_eq!(summary.content_type, Some(ContentKind::Png));

        let json: serde_json::Value = serde_json::from_str(&summary.render_json().unwrap()).unwrap();
        assert_eq!(json["content_type"], "png");
        assert!(summary.render_text().contains("content-type image/png"));
    }

    #[test]
    fn test_render_text_lists_every_product() {
        let summary = Summary {
            bytes_read: 42,
            outputs: vec![
                OutputSummary {
                    path: "a.bin".to_string(),
                    bytes: 42,
                },
                OutputSummary {
                    path: "b.bin".to_string(),
                    bytes: 42,
                },
            ],
            blake3: Some("abc123".to_string()),
            content_type: Some(ContentKind::Pdf),
            failures: Vec::new(),
        };

        assert_eq!(
            summary.render_text(),
            "read 42 bytes\n\
             wrote 42 bytes to a.bin\n\
             wrote 42 bytes to b.bin\n\
             blake3 abc123\n\
             content-type application/pdf\n"
        );
        assert_eq!(Summary::default().render_text(), "read 0 bytes\n");
    }

    #[test]
    fn test_execute_requires_a_consumer() {
        let cli = parse(&["input.bin"]);
        assert!(execute(&cli).is_err());
    }

    #[test]
    fn test_execute_missing_input() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.bin");
        let cli = parse(&[missing.to_str().unwrap(), "--digest"]);
        let err = execute(&cli).unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
