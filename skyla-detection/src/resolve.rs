//! Overlap resolution.
//!
//! The matcher reports every candidate, overlaps included; this stage
//! picks the winners. Candidates arrive already threshold-filtered and are
//! ordered (start ascending, end descending, confidence descending, risk
//! high-first, detector index ascending; detector indexes follow
//! lexicographic id order, so the final tie-break is stable across
//! compilations).

use skyla_core::detector::Risk;
use skyla_core::hit::HitFeatures;

/// A scored candidate in normalized-offset space.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub detector: usize,
    pub start: usize,
    pub end: usize,
    /// Match-context start; equals `start` except for pair detectors.
    pub anchor: usize,
    pub confidence: u8,
    pub risk: Risk,
    pub features: HitFeatures,
}

impl Candidate {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn strictly_contains(&self, other: &Candidate) -> bool {
        self.start <= other.start && other.end <= self.end && self.len() > other.len()
    }
}

/// De-overlap candidates. A candidate overlapping an earlier winner is
/// dropped unless it strictly contains that winner with strictly higher
/// confidence, in which case it replaces it. Survivors come out in offset
/// order.
pub fn resolve(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(b.end.cmp(&a.end))
            .then(b.confidence.cmp(&a.confidence))
            .then(b.risk.cmp(&a.risk))
            .then(a.detector.cmp(&b.detector))
    });

    let mut winners: Vec<Candidate> = Vec::new();
    let mut last_end = 0usize;
    for candidate in candidates {
        if let Some(prior) = winners.last() {
            if candidate.start < last_end {
                if candidate.confidence > prior.confidence
                    && candidate.strictly_contains(prior)
                {
                    last_end = candidate.end;
                    winners.pop();
                    winners.push(candidate);
                }
                continue;
            }
        }
        last_end = candidate.end;
        winners.push(candidate);
    }
    winners
}
