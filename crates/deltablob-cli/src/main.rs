//! Deltablob CLI
//!
//! The `deltablob` command drives the incremental bundle materialization
//! cache from a terminal.
//!
//! ## Commands
//!
//! - `materialize`: poll one or more bundle URLs and publish each as a blob
//! - `suffix`: show the query suffix a lineage would send next

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deltablob_core::{
    build_fetch_suffix, BlobRegistry, HttpTransport, HttpTransportConfig, JsonDeltaPatcher,
    Materialized, Materializer, MaterializerConfig, PatcherFactory, ProtocolMode, Transport,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "deltablob")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incremental bundle materialization cache", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch bundle deltas and publish each bundle as a blob
    Materialize {
        /// Bundle URLs to materialize
        #[arg(required = true)]
        urls: Vec<String>,

        /// Number of polling rounds
        #[arg(short, long, default_value = "1")]
        polls: u32,

        /// Pause between polling rounds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Write the final artifact of the first URL to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Media type of published blobs
        #[arg(long, env = "DELTABLOB_MEDIA_TYPE")]
        media_type: Option<String>,

        /// HTTP request timeout
        #[arg(long, env = "DELTABLOB_HTTP_TIMEOUT_MS")]
        timeout_ms: Option<u64>,
    },

    /// Print the query suffix for the next fetch of a lineage
    Suffix {
        /// Bundle URL
        url: String,

        /// Protocol the lineage speaks
        #[arg(long, value_enum, default_value = "unknown")]
        mode: ModeArg,

        /// Last applied bundle id or revision id
        #[arg(long)]
        marker: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Unknown,
    Legacy,
    Revision,
}

impl From<ModeArg> for ProtocolMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Unknown => ProtocolMode::Unknown,
            ModeArg::Legacy => ProtocolMode::Legacy,
            ModeArg::Revision => ProtocolMode::RevisionBased,
        }
    }
}

/// One line of `materialize` output.
#[derive(Debug, Serialize)]
struct CycleReport {
    poll: u32,
    bundle: String,
    #[serde(flatten)]
    result: Materialized,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    deltablob_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Materialize {
            urls,
            polls,
            interval_ms,
            output,
            media_type,
            timeout_ms,
        } => {
            let mut http = HttpTransportConfig::from_env();
            if let Some(timeout_ms) = timeout_ms {
                http = http.with_timeout_ms(timeout_ms);
            }
            let mut config = MaterializerConfig::from_env();
            if let Some(media_type) = media_type.as_deref() {
                config = config.with_media_type(media_type);
            }
            let transport = HttpTransport::new(&http).context("Failed to create HTTP client")?;

            let registry = Arc::new(BlobRegistry::new());
            let materializer = Materializer::new(
                |_: &str| JsonDeltaPatcher::new(),
                transport,
                Arc::clone(&registry),
                &config,
            );

            let reports = cmd_materialize(
                &materializer,
                &registry,
                &urls,
                cli.json,
                polls,
                Duration::from_millis(interval_ms),
                output.as_deref(),
            )
            .await;
            let revoked = materializer.shutdown().await;
            info!(revoked, "blobs released");
            reports.map(|_| ())
        }
        Commands::Suffix { url, mode, marker } => {
            println!("{}", cmd_suffix(&url, mode.into(), marker.as_deref()));
            Ok(())
        }
    }
}

async fn cmd_materialize<F, T>(
    materializer: &Materializer<F, T, Arc<BlobRegistry>>,
    registry: &BlobRegistry,
    urls: &[String],
    json: bool,
    polls: u32,
    interval: Duration,
    output: Option<&Path>,
) -> Result<Vec<CycleReport>>
where
    F: PatcherFactory,
    T: Transport,
{
    let mut reports = Vec::new();

    for poll in 1..=polls.max(1) {
        if poll > 1 {
            tokio::time::sleep(interval).await;
        }

        let results = materializer.materialize_all(urls).await;
        for (bundle, result) in urls.iter().zip(results) {
            let result = result.with_context(|| format!("Failed to materialize {bundle}"))?;
            let report = CycleReport {
                poll,
                bundle: bundle.clone(),
                result,
            };
            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{}", render_report(&report));
            }
            reports.push(report);
        }
    }

    if let (Some(path), Some(first)) = (output, urls.first()) {
        let url = materializer
            .cache()
            .current(first)
            .with_context(|| format!("No artifact published for {first}"))?;
        let content = registry
            .read(&url)
            .with_context(|| format!("Blob {url} is no longer available"))?;
        write_artifact(path, &content)?;
        println!("Wrote {} bytes to {:?}", content.len(), path);
    }

    materializer.metrics().flush();
    Ok(reports)
}

fn render_report(report: &CycleReport) -> String {
    format!(
        "[{}] {} -> {} (size={}, reused={})",
        report.poll,
        report.bundle,
        report.result.url,
        report.result.artifact_size,
        report.result.reused()
    )
}

fn cmd_suffix(url: &str, mode: ProtocolMode, marker: Option<&str>) -> String {
    format!("{url}{}", build_fetch_suffix(mode, marker, url))
}

/// Atomic write: temp file in the target directory, then rename.
fn write_artifact(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    tmp.write_all(content)
        .with_context(|| format!("Failed to write artifact for {:?}", path))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to persist artifact to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltablob_core::PublishOutcome;
    use deltablob_state::fakes::{ScriptedResponse, ScriptedTransport};
    use serde_json::json;

    const URL: &str = "http://localhost:8081/index.delta?platform=ios";

    #[test]
    fn suffix_command_appends_marker() {
        assert_eq!(
            cmd_suffix("http://x/y", ProtocolMode::Legacy, Some("7")),
            "http://x/y?deltaBundleId=7"
        );
        assert_eq!(
            cmd_suffix("http://x/y?z=1", ProtocolMode::RevisionBased, Some("7")),
            "http://x/y?z=1&revisionId=7"
        );
        assert_eq!(
            cmd_suffix("http://x/y", ProtocolMode::Unknown, Some("7")),
            "http://x/y"
        );
    }

    #[test]
    fn cli_parses_materialize_flags() {
        let cli = Cli::try_parse_from([
            "deltablob",
            "--json",
            "materialize",
            "http://x/a",
            "http://x/b",
            "--polls",
            "3",
            "--output",
            "bundle.js",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Materialize {
                urls,
                polls,
                output,
                ..
            } => {
                assert_eq!(urls, vec!["http://x/a", "http://x/b"]);
                assert_eq!(polls, 3);
                assert_eq!(output, Some(PathBuf::from("bundle.js")));
            }
            _ => panic!("expected materialize"),
        }
    }

    #[test]
    fn cli_parses_suffix_mode() {
        let cli = Cli::try_parse_from([
            "deltablob",
            "suffix",
            "http://x/y",
            "--mode",
            "revision",
            "--marker",
            "r9",
        ])
        .unwrap();
        match cli.command {
            Commands::Suffix { mode, marker, .. } => {
                assert_eq!(ProtocolMode::from(mode), ProtocolMode::RevisionBased);
                assert_eq!(marker.as_deref(), Some("r9"));
            }
            _ => panic!("expected suffix"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn materialize_polls_and_writes_output() {
        let transport = ScriptedTransport::new();
        transport.push(
            URL,
            ScriptedResponse::json(json!({
                "revisionId": "r1",
                "base": true,
                "pre": "var __p;",
                "post": "run();",
                "modules": [[1, "m1();"]]
            })),
        );
        transport.push(
            URL,
            ScriptedResponse::json(json!({
                "revisionId": "r1",
                "base": false,
                "added": [],
                "modified": [],
                "deleted": []
            })),
        );

        let registry = Arc::new(BlobRegistry::new());
        let materializer = Materializer::new(
            |_: &str| JsonDeltaPatcher::new(),
            transport,
            Arc::clone(&registry),
            &MaterializerConfig::default(),
        );

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("bundle.js");
        let reports = cmd_materialize(
            &materializer,
            &registry,
            &[URL.to_string()],
            false,
            2,
            Duration::from_millis(10),
            Some(&output),
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].result.outcome, PublishOutcome::Created);
        assert!(reports[1].result.reused());
        assert_eq!(reports[0].result.url, reports[1].result.url);
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "var __p;\nm1();\nrun();\n"
        );
        assert!(render_report(&reports[1]).contains("reused=true"));
        assert_eq!(
            materializer.transport().requests()[1],
            format!("{URL}&revisionId=r1")
        );
    }

    #[tokio::test]
    async fn materialize_surfaces_fetch_failure() {
        let transport = ScriptedTransport::new();
        transport.push(URL, ScriptedResponse::Status(502));

        let registry = Arc::new(BlobRegistry::new());
        let materializer = Materializer::new(
            |_: &str| JsonDeltaPatcher::new(),
            transport,
            Arc::clone(&registry),
            &MaterializerConfig::default(),
        );

        let err = cmd_materialize(
            &materializer,
            &registry,
            &[URL.to_string()],
            true,
            1,
            Duration::ZERO,
            None,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Failed to materialize"));
        assert!(registry.is_empty());
    }
}
