//! ## skyla-telemetry::logging
//! **Structured logging for the inspection pipeline**
//!
//! ### Expectations:
//! - Negligible overhead on the scan hot path (events only at the edges)
//! - Typed events; call sites never assemble ad-hoc field bags
//! - No secret material in any event: keys, matched text, and redacted
//!   output stay out
//!
//! ### Components:
//! - `logging/`: subscriber setup plus the scan and reload event types
//! - `metrics/`: Prometheus recorder with counters and histograms

use std::time::Duration;

use tracing::info;

/// Summary of one detection or redaction call. Matched text is
/// deliberately absent; the confidence ceiling is the only risk signal
/// that leaves the process through logs.
#[derive(Debug, Clone)]
pub struct ScanEvent<'a> {
    /// `scan`, `redact`, or `redact-stream`.
    pub operation: &'a str,
    pub input_bytes: usize,
    pub hits: usize,
    /// Highest confidence across the reported hits; 0 for a clean input.
    pub max_confidence: u8,
    pub elapsed: Duration,
}

/// Summary of one engine publication, whether from the reloader or a
/// manual policy update.
#[derive(Debug, Clone)]
pub struct ReloadEvent<'a> {
    pub engine_version: &'a str,
    /// Change ids (`policy`, `dict:<id>`, `dict-removed:<id>`); empty for
    /// a forced recompile with no source changes.
    pub changed: &'a [String],
    /// The policy source this engine was compiled from.
    pub source: &'a str,
}

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Install the global subscriber with `info` for the skyla crates.
    pub fn init() {
        Self::init_with_level("info");
    }

    /// Install the global subscriber. `RUST_LOG` wins when set; otherwise
    /// the skyla crates log at `default_level` and everything else at
    /// `warn`.
    pub fn init_with_level(default_level: &str) {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        let directives = format!(
            "warn,skyla_core={level},skyla_detection={level},skyla_engine={level},\
             skyla_reload={level},skyla_telemetry={level},skyla_cli={level}",
            level = default_level
        );
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(directives))
            .unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().compact())
            .init();
    }

    #[inline]
    pub fn scan_event(event: &ScanEvent<'_>) {
        info!(
            operation = event.operation,
            input_bytes = event.input_bytes,
            hits = event.hits,
            max_confidence = event.max_confidence,
            elapsed_us = event.elapsed.as_micros() as u64,
            "scan finished"
        );
    }

    #[inline]
    pub fn reload_event(event: &ReloadEvent<'_>) {
        info!(
            engine_version = event.engine_version,
            changed = ?event.changed,
            source = event.source,
            "engine published"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn scan_events_carry_the_outcome_fields() {
        EventLogger::scan_event(&ScanEvent {
            operation: "redact",
            input_bytes: 48,
            hits: 3,
            max_confidence: 90,
            elapsed: Duration::from_micros(12),
        });
        assert!(logs_contain("scan finished"));
        assert!(logs_contain("hits=3"));
        assert!(logs_contain("max_confidence=90"));
    }

    #[traced_test]
    #[test]
    fn reload_events_name_version_and_source() {
        let changed = vec!["policy".to_string(), "dict:badges".to_string()];
        EventLogger::reload_event(&ReloadEvent {
            engine_version: "f3a9c1d2e4b5a6c7",
            changed: &changed,
            source: "https://config.internal/policy.json",
        });
        assert!(logs_contain("engine published"));
        assert!(logs_contain("dict:badges"));
    }
}
