//! Command definitions and handlers.

use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};

use skyla_config::SkylaConfig;
use skyla_core::detector::Detector;
use skyla_core::policy::{Environment, Policy, TrustLevel};
use skyla_detection::builtin::all_detectors;
use skyla_detection::{ScanOpts, ScoreParams};
use skyla_engine::Registry;
use skyla_telemetry::logging::{EventLogger, ReloadEvent, ScanEvent};
use skyla_telemetry::metrics::MetricsRecorder;

#[derive(Parser)]
#[command(name = "skyla", about = "Streaming content inspection and redaction")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Detect sensitive content and print the hit report as JSON.
    Scan(ScanArgs),
    /// Redact sensitive content and print the transformed text.
    Redact(RedactArgs),
    /// Run the policy/dictionary reloader until interrupted.
    Watch(WatchArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TrustArg {
    System,
    User,
    Untrusted,
}

impl std::fmt::Display for TrustArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrustArg::System => "system",
            TrustArg::User => "user",
            TrustArg::Untrusted => "untrusted",
        };
        f.write_str(name)
    }
}

impl From<TrustArg> for TrustLevel {
    fn from(value: TrustArg) -> Self {
        match value {
            TrustArg::System => TrustLevel::System,
            TrustArg::User => TrustLevel::User,
            TrustArg::Untrusted => TrustLevel::Untrusted,
        }
    }
}

#[derive(Args)]
pub struct ScanArgs {
    /// Input file; stdin when omitted.
    pub input: Option<PathBuf>,

    /// Policy document (JSON); builtin defaults when omitted.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Trust level of the input source.
    #[arg(long, value_enum, default_value_t = TrustArg::User)]
    pub trust: TrustArg,
}

#[derive(Args)]
pub struct RedactArgs {
    /// Input file; stdin when omitted.
    pub input: Option<PathBuf>,

    /// Policy document (JSON); builtin defaults when omitted.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Trust level of the input source.
    #[arg(long, value_enum, default_value_t = TrustArg::User)]
    pub trust: TrustArg,

    /// Process the input through the streaming transform.
    #[arg(long)]
    pub stream: bool,

    /// Chunk size in bytes for --stream.
    #[arg(long, default_value_t = 65536)]
    pub chunk_size: usize,
}

#[derive(Args)]
pub struct WatchArgs {
    /// Force a full reload on the first tick.
    #[arg(long)]
    pub force: bool,
}

fn load_policy(path: Option<&PathBuf>, config: &SkylaConfig) -> anyhow::Result<Policy> {
    let mut policy = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy {}", path.display()))?;
            Policy::from_json(&raw)?
        }
        None => Policy::default(),
    };
    if config.engine.environment.eq_ignore_ascii_case("development") {
        policy.environment = Environment::Development;
    }
    policy.collapse_whitespace |= config.engine.collapse_whitespace;
    Ok(policy)
}

fn build_registry(policy_path: Option<&PathBuf>) -> anyhow::Result<Registry> {
    let config = SkylaConfig::load()?;
    let policy = load_policy(policy_path, &config)?;
    let params = ScoreParams {
        hint_radius: config.engine.hint_radius,
        ..Default::default()
    };
    let detectors: Vec<Detector> = all_detectors();
    Ok(Registry::with_options(detectors, policy, params)?)
}

fn read_input(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading input {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading stdin")?;
            Ok(buffer)
        }
    }
}

pub async fn run_scan(args: ScanArgs, metrics: MetricsRecorder) -> anyhow::Result<()> {
    let registry = build_registry(args.policy.as_ref())?;
    let input = read_input(args.input.as_ref())?;
    let opts = ScanOpts {
        trust: args.trust.into(),
        ..Default::default()
    };

    let started = Instant::now();
    let hits = registry.detect(&input, &opts);
    let elapsed = started.elapsed();
    metrics.observe_scan(elapsed.as_nanos() as f64, hits.len());

    EventLogger::scan_event(&ScanEvent {
        operation: "scan",
        input_bytes: input.len(),
        hits: hits.len(),
        max_confidence: hits.iter().map(|h| h.confidence).max().unwrap_or(0),
        elapsed,
    });
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

pub async fn run_redact(args: RedactArgs, metrics: MetricsRecorder) -> anyhow::Result<()> {
    let registry = build_registry(args.policy.as_ref())?;
    let input = read_input(args.input.as_ref())?;
    let opts = ScanOpts {
        trust: args.trust.into(),
        ..Default::default()
    };

    let started = Instant::now();
    let (output, hits) = if args.stream {
        let mut stream = registry.stream(opts);
        let mut output = String::new();
        for chunk in char_chunks(&input, args.chunk_size.max(1)) {
            output.push_str(&stream.push(chunk)?);
        }
        let (rest, hits) = stream.finish()?;
        output.push_str(&rest);
        (output, hits)
    } else {
        let redaction = registry.redact(&input, &opts)?;
        (redaction.output, redaction.hits)
    };
    let elapsed = started.elapsed();
    metrics.observe_scan(elapsed.as_nanos() as f64, hits.len());

    EventLogger::scan_event(&ScanEvent {
        operation: if args.stream { "redact-stream" } else { "redact" },
        input_bytes: input.len(),
        hits: hits.len(),
        max_confidence: hits.iter().map(|h| h.confidence).max().unwrap_or(0),
        elapsed,
    });
    print!("{output}");
    Ok(())
}

pub async fn run_watch(args: WatchArgs, metrics: MetricsRecorder) -> anyhow::Result<()> {
    let config = SkylaConfig::load()?;
    let policy_url = config
        .reload
        .policy_url
        .clone()
        .context("reload.policy_url is not configured")?;

    let registry = std::sync::Arc::new(build_registry(None)?);
    let mut options = skyla_reload::ReloaderOptions::new(policy_url.clone());
    options.manifest_url = config.reload.manifest_url.clone();
    options.interval = std::time::Duration::from_millis(config.reload.interval_ms);
    options.max_interval = std::time::Duration::from_millis(config.reload.max_interval_ms);
    options.base_dir = config.reload.base_dir.clone();
    options.allow_hosts = config.reload.allow_hosts.clone();
    options.max_bytes = config.reload.max_bytes;

    let reloader = skyla_engine::bind_reloader(std::sync::Arc::clone(&registry), options);
    if args.force {
        reloader.force_reload();
    }
    match reloader.start().await {
        Ok(()) => metrics.reload_success_total.inc(),
        Err(error) => {
            metrics.reload_failure_total.inc();
            // The task keeps retrying with backoff; surface the first
            // failure but stay up.
            tracing::warn!(%error, "first reload tick failed");
        }
    }

    EventLogger::reload_event(&ReloadEvent {
        engine_version: registry.engine().version(),
        changed: &[],
        source: &policy_url,
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    reloader.stop();
    Ok(())
}

/// Split on char boundaries at roughly `size` bytes per chunk.
fn char_chunks(input: &str, size: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < input.len() {
        let mut end = (start + size).min(input.len());
        while end < input.len() && !input.is_char_boundary(end) {
            end += 1;
        }
        chunks.push(&input[start..end]);
        start = end;
    }
    chunks
}
