//! Streaming redaction.
//!
//! Wraps the detection pipeline for unbounded inputs delivered as chunks.
//! The engine retains a tail of unemitted bytes sized to the compiled
//! window, scans `tail + chunk` on every push, and only emits the prefix
//! no pattern can still extend across. A hit spanning a chunk boundary is
//! therefore found exactly once, when its bytes are finally contiguous.
//!
//! Every input byte is either already emitted (redacted) or sitting in the
//! tail; nothing is ever dropped or duplicated, and `finish` flushes the
//! tail with no further retention.

use std::sync::Arc;

use skyla_core::hit::Hit;
use skyla_core::mask::MaskerRegistry;
use skyla_core::normalize::normalize_with;
use skyla_detection::{CompiledEngine, ScanOpts};

use crate::apply;
use crate::error::EngineError;

/// Explicit per-stream state. Owned by one stream, never shared.
#[derive(Debug, Default)]
struct StreamState {
    /// Unemitted carry, bounded by the engine window outside of
    /// hit-crossing pathologies.
    tail: String,
    /// Absolute offset of the tail start in the logical stream.
    offset: u64,
    /// Finalized hits, absolute offsets.
    emitted: Vec<Hit>,
    /// Hits seen in the last scan that could still grow; refreshed on
    /// every push.
    pending: Vec<Hit>,
}

/// A transform consuming chunks and producing redacted chunks.
pub struct RedactStream {
    engine: Arc<CompiledEngine>,
    maskers: Arc<MaskerRegistry>,
    opts: ScanOpts,
    state: StreamState,
}

impl RedactStream {
    pub(crate) fn new(
        engine: Arc<CompiledEngine>,
        maskers: Arc<MaskerRegistry>,
        opts: ScanOpts,
    ) -> Self {
        Self {
            engine,
            maskers,
            opts,
            state: StreamState::default(),
        }
    }

    /// Feed one chunk; returns the redacted bytes that are safe to emit.
    pub fn push(&mut self, chunk: &str) -> Result<String, EngineError> {
        let mut buffer = std::mem::take(&mut self.state.tail);
        buffer.push_str(chunk);

        let normalized = normalize_with(&buffer, self.engine.policy().collapse_whitespace);
        let anchored = self.engine.detect_anchored(&normalized, &self.opts);

        // Everything past this point could still be the prefix of a longer
        // match, so it stays in the tail.
        let mut cut = buffer.len().saturating_sub(self.engine.window());
        // A hit crossing the cut is withheld whole, match context
        // included. Walk backwards so a lowered cut catches earlier hits
        // it now crosses.
        for a in anchored.iter().rev() {
            if a.hit.end > cut {
                cut = cut.min(a.anchor.min(a.hit.start));
            }
        }
        while cut > 0 && !buffer.is_char_boundary(cut) {
            cut -= 1;
        }

        let (emit, pending): (Vec<_>, Vec<_>) =
            anchored.into_iter().partition(|a| a.hit.end <= cut);
        let emit: Vec<Hit> = emit.into_iter().map(|a| a.hit).collect();
        let pending: Vec<Hit> = pending.into_iter().map(|a| a.hit).collect();

        let redaction = apply::apply(&buffer[..cut], emit, &self.engine, &self.maskers)?;
        let offset = self.state.offset;
        self.state
            .emitted
            .extend(redaction.hits.iter().cloned().map(|h| absolute(h, offset)));
        self.state.pending = pending
            .into_iter()
            .map(|h| absolute(h, offset))
            .collect();

        self.state.offset += cut as u64;
        self.state.tail = buffer[cut..].to_string();
        Ok(redaction.output)
    }

    /// End of stream: scan and flush the tail, returning the final
    /// redacted bytes and every hit of the whole stream.
    pub fn finish(mut self) -> Result<(String, Vec<Hit>), EngineError> {
        let buffer = std::mem::take(&mut self.state.tail);
        let normalized = normalize_with(&buffer, self.engine.policy().collapse_whitespace);
        let hits = self.engine.detect_normalized(&normalized, &self.opts);
        let redaction = apply::apply(&buffer, hits, &self.engine, &self.maskers)?;

        let offset = self.state.offset;
        let mut all = std::mem::take(&mut self.state.emitted);
        all.extend(redaction.hits.into_iter().map(|h| absolute(h, offset)));
        Ok((redaction.output, all))
    }

    /// Hits whose spans are still growing and are not yet finalized.
    pub fn pending_hits(&self) -> &[Hit] {
        &self.state.pending
    }

    /// Absolute stream position of the first unemitted byte.
    pub fn position(&self) -> u64 {
        self.state.offset
    }
}

fn absolute(mut hit: Hit, offset: u64) -> Hit {
    hit.start += offset as usize;
    hit.end += offset as usize;
    hit
}
