//! Context-aware confidence scoring.
//!
//! The scorer is pure: given a hit span, the surrounding normalized bytes,
//! the detector metadata, and the caller's trust level, it produces the
//! same confidence every time. Each term has a fixed maximum and the sum
//! is clamped to `[0, 100]`.

use skyla_core::detector::{Category, Risk};
use skyla_core::hit::HitFeatures;
use skyla_core::policy::TrustLevel;

use crate::engine::DetectorMeta;

/// Tunable maxima for each score term.
#[derive(Debug, Clone)]
pub struct ScoreParams {
    /// How far (bytes) around a hit context hints are searched.
    pub hint_radius: usize,
    pub boundary_bonus: i16,
    pub context_bonus_max: i16,
    pub negative_penalty_max: i16,
    /// Applied to injection-class hits from system-trusted callers.
    pub trust_system_adjust: i16,
    /// Applied to injection-class hits from untrusted callers.
    pub trust_untrusted_adjust: i16,
    pub structural_penalty: i16,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            hint_radius: 40,
            boundary_bonus: 15,
            context_bonus_max: 25,
            negative_penalty_max: 25,
            trust_system_adjust: -20,
            trust_untrusted_adjust: 15,
            structural_penalty: 20,
        }
    }
}

fn base_risk_score(risk: Risk) -> i16 {
    match risk {
        Risk::Low => 35,
        Risk::Medium => 55,
        Risk::High => 75,
    }
}

/// Word characters for boundary purposes are ASCII alphanumerics and
/// underscore. CJK neighbors do not break a boundary: unsegmented scripts
/// put letters directly against the values we are looking for.
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn ceil_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Distance in bytes from the nearest occurrence of any needle to the hit
/// span, searched within the radius window. `None` when no needle occurs.
fn nearest_hint_distance(
    text: &str,
    start: usize,
    end: usize,
    needles: &[String],
    radius: usize,
) -> Option<usize> {
    if needles.is_empty() {
        return None;
    }
    let window_start = floor_char_boundary(text, start.saturating_sub(radius));
    let window_end = ceil_char_boundary(text, (end + radius).min(text.len()));
    // ASCII lowercasing preserves byte offsets, unlike full case folding.
    let window = text[window_start..window_end].to_ascii_lowercase();

    let mut best: Option<usize> = None;
    for needle in needles {
        let mut from = 0;
        while let Some(pos) = window[from..].find(needle.as_str()) {
            let occ_start = window_start + from + pos;
            let occ_end = occ_start + needle.len();
            let distance = if occ_end <= start {
                start - occ_end
            } else if occ_start >= end {
                occ_start - end
            } else {
                0
            };
            best = Some(best.map_or(distance, |b| b.min(distance)));
            if best == Some(0) {
                return best;
            }
            from = from + pos + 1;
            while from < window.len() && !window.is_char_boundary(from) {
                from += 1;
            }
        }
    }
    best
}

fn decayed_bonus(max: i16, distance: usize, radius: usize) -> i16 {
    if radius == 0 || distance >= radius {
        return 0;
    }
    (max as i64 * (radius - distance) as i64 / radius as i64) as i16
}

/// True when the matched text is itself a redacted form: bullet or
/// asterisk masks, replacement tokens, bracketed labels. Scoring these at
/// zero is what makes redaction idempotent.
fn looks_like_placeholder(matched: &str) -> bool {
    matched.contains('•')
        || matched.contains("**")
        || matched.contains("TKN_")
        || matched.contains("[REDACTED")
}

/// Score one raw hit. Returns the clamped confidence and the term
/// breakdown.
pub fn score_hit(
    text: &str,
    start: usize,
    end: usize,
    meta: &DetectorMeta,
    trust: TrustLevel,
    params: &ScoreParams,
) -> (u8, HitFeatures) {
    if looks_like_placeholder(&text[start..end]) {
        return (0, HitFeatures::default());
    }

    let base = base_risk_score(meta.detector.risk);

    let prev = text[..floor_char_boundary(text, start)].chars().next_back();
    let next = text[ceil_char_boundary(text, end)..].chars().next();
    let flanked_clean = prev.map_or(true, |c| !is_word_char(c))
        && next.map_or(true, |c| !is_word_char(c));
    let boundary = if flanked_clean { params.boundary_bonus } else { 0 };

    let context_distance =
        nearest_hint_distance(text, start, end, &meta.hints, params.hint_radius);
    let context = context_distance
        .map(|d| decayed_bonus(params.context_bonus_max, d, params.hint_radius))
        .unwrap_or(0);

    let negative = nearest_hint_distance(text, start, end, &meta.negative_hints, params.hint_radius)
        .map(|d| decayed_bonus(params.negative_penalty_max, d, params.hint_radius))
        .unwrap_or(0);

    let trust_adjust = if meta.detector.category == Category::Injection {
        match trust {
            TrustLevel::System => params.trust_system_adjust,
            TrustLevel::User => 0,
            TrustLevel::Untrusted => params.trust_untrusted_adjust,
        }
    } else {
        0
    };

    let matched = &text[start..end];
    let digit_run_secret = meta.detector.category == Category::Secret
        && !matched.is_empty()
        && matched.chars().all(|c| c.is_ascii_digit());
    let structural = if !flanked_clean || digit_run_secret {
        params.structural_penalty
    } else {
        0
    };

    let total = base + boundary + context - negative + trust_adjust - structural;
    let confidence = total.clamp(0, 100) as u8;

    (
        confidence,
        HitFeatures {
            boundary,
            context,
            context_distance: context_distance.map(|d| d as u32),
            negative: -negative,
            trust: trust_adjust,
            structural: -structural,
        },
    )
}
