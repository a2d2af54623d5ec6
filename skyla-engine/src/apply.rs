//! Action application.
//!
//! Takes the ordered surviving hits and the original input and produces
//! the redacted output plus the structured hit report. Hits arrive
//! non-overlapping and in offset order, so composition is a single
//! forward splice.

use serde::Serialize;

use skyla_core::detector::Action;
use skyla_core::hit::Hit;
use skyla_core::mask::{generic_label, MaskerRegistry};
use skyla_core::token::tokenize;
use skyla_detection::CompiledEngine;

use crate::error::EngineError;

/// The redacted output plus everything that was found.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redaction {
    pub output: String,
    pub hits: Vec<Hit>,
}

impl Redaction {
    /// Highest confidence across hits; 0 for a clean input.
    pub fn risk(&self) -> u8 {
        self.hits.iter().map(|h| h.confidence).max().unwrap_or(0)
    }
}

/// Replacement text for a single hit.
pub(crate) fn replacement_for(
    hit: &Hit,
    engine: &CompiledEngine,
    maskers: &MaskerRegistry,
) -> Result<Option<String>, EngineError> {
    match hit.action {
        Action::Ignore => Ok(None),
        Action::Remove => Ok(Some(String::new())),
        Action::Mask => {
            let replacement = engine
                .masker_id_for(&hit.detector_id)
                .and_then(|id| maskers.get(id))
                .map(|masker| masker.mask(&hit.matched_text))
                .unwrap_or_else(|| generic_label(&hit.detector_id));
            Ok(Some(replacement))
        }
        Action::Tokenize => {
            let key = engine
                .policy()
                .hmac_key
                .as_ref()
                .ok_or(EngineError::MissingKey)?;
            Ok(Some(tokenize(
                &hit.detector_id,
                &hit.matched_text,
                key.as_bytes(),
            )))
        }
    }
}

/// Splice the hits into `original`, producing the redacted output.
///
/// Hit offsets are into `original`; ignore-actioned hits pass through
/// verbatim but stay in the report.
pub fn apply(
    original: &str,
    hits: Vec<Hit>,
    engine: &CompiledEngine,
    maskers: &MaskerRegistry,
) -> Result<Redaction, EngineError> {
    let mut output = String::with_capacity(original.len());
    let mut cursor = 0usize;

    for hit in &hits {
        output.push_str(&original[cursor..hit.start]);
        match replacement_for(hit, engine, maskers)? {
            None => output.push_str(&original[hit.start..hit.end]),
            Some(replacement) => output.push_str(&replacement),
        }
        cursor = hit.end;
    }
    output.push_str(&original[cursor..]);

    Ok(Redaction { output, hits })
}
