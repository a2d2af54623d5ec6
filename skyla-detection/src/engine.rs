//! The compiled, immutable scan surface.
//!
//! A [`CompiledEngine`] bundles the literal automaton, the regex set, and
//! per-detector metadata resolved against one policy. It is never mutated
//! after construction; hot reload swaps the whole bundle behind an atomic
//! reference, so every in-flight scan keeps the snapshot it started with.

use aho_corasick::AhoCorasick;
use regex::{Regex, RegexSet};
use tracing::warn;

use skyla_core::detector::Action;
use skyla_core::hit::Hit;
use skyla_core::normalize::{normalize_with, Normalized};
use skyla_core::policy::{Policy, TrustLevel};

use crate::resolve::{self, Candidate};
use crate::score::{self, ScoreParams};

/// Per-detector metadata with policy overrides already applied.
#[derive(Debug, Clone)]
pub struct DetectorMeta {
    pub detector: skyla_core::detector::Detector,
    /// Action after policy resolution.
    pub action: Action,
    /// Confidence threshold after policy and environment resolution.
    pub threshold: u8,
    /// Masker after policy resolution.
    pub masker_id: Option<String>,
    /// Detector hints merged with the policy's global hints, ASCII-lowercased.
    pub hints: Vec<String>,
    pub negative_hints: Vec<String>,
}

/// Literal patterns, indexed for the input size they were built at.
pub(crate) enum LiteralIndex {
    Empty,
    /// Below the automaton threshold a direct substring scan is cheaper to
    /// build and no slower to run.
    Linear(Vec<(String, usize)>),
    Automaton {
        ac: AhoCorasick,
        /// Pattern index -> detector index.
        owners: Vec<usize>,
    },
}

pub(crate) struct CompiledRegex {
    pub detector: usize,
    pub regex: Regex,
    /// Pair-shaped detectors (two capture groups) hit on the captured
    /// value and carry the captured name for allowlist filtering.
    pub pair: bool,
}

/// Per-call options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ScanOpts {
    pub trust: TrustLevel,
    /// Extra allowlist globs merged with each pair detector's own.
    pub allow_names: Vec<String>,
}

/// A candidate match straight out of the matcher, offsets into the
/// normalized text. Overlaps included; resolution happens later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHit {
    pub detector: usize,
    pub start: usize,
    pub end: usize,
    /// Where the surrounding match context begins. Equals `start` except
    /// for pair-shaped detectors, whose hit span is the captured value but
    /// whose pattern consumed the name and separator before it.
    pub anchor: usize,
    /// Captured name for pair-shaped detectors.
    pub name: Option<String>,
}

/// A hit plus the original-offset anchor of its match context. Streaming
/// callers must keep bytes from the anchor onwards when a hit is withheld
/// at a chunk boundary, or the context that produced it is lost on
/// re-scan.
#[derive(Debug, Clone)]
pub struct AnchoredHit {
    pub hit: Hit,
    pub anchor: usize,
}

pub struct CompiledEngine {
    pub(crate) detectors: Vec<DetectorMeta>,
    pub(crate) literals: LiteralIndex,
    pub(crate) regexes: Vec<CompiledRegex>,
    pub(crate) prefilter: Option<RegexSet>,
    pub(crate) policy: Policy,
    pub(crate) params: ScoreParams,
    pub(crate) version: String,
    pub(crate) window: usize,
}

impl CompiledEngine {
    /// Stable content stamp of the detector set + policy this engine was
    /// built from.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Overlap window streaming callers must retain across chunks.
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Resolved masker for a detector, if the policy or detector names one.
    pub fn masker_id_for(&self, detector_id: &str) -> Option<&str> {
        self.meta_by_id(detector_id)
            .and_then(|m| m.masker_id.as_deref())
    }

    fn meta_by_id(&self, detector_id: &str) -> Option<&DetectorMeta> {
        // Detectors are stored sorted by id.
        self.detectors
            .binary_search_by(|m| m.detector.id.as_str().cmp(detector_id))
            .ok()
            .map(|i| &self.detectors[i])
    }

    /// Scan normalized text for every occurrence of every pattern.
    ///
    /// Hits come back ordered by start ascending, ties end descending
    /// (longer first), overlaps included.
    pub fn scan(&self, text: &str) -> Vec<RawHit> {
        let mut hits = Vec::new();

        match &self.literals {
            LiteralIndex::Empty => {}
            LiteralIndex::Linear(patterns) => {
                let haystack = text.to_ascii_lowercase();
                for (pattern, detector) in patterns {
                    let mut from = 0;
                    while let Some(pos) = haystack[from..].find(pattern.as_str()) {
                        let start = from + pos;
                        hits.push(RawHit {
                            detector: *detector,
                            start,
                            end: start + pattern.len(),
                            anchor: start,
                            name: None,
                        });
                        from = start + 1;
                        while from < haystack.len() && !haystack.is_char_boundary(from) {
                            from += 1;
                        }
                    }
                }
            }
            LiteralIndex::Automaton { ac, owners } => {
                for m in ac.find_overlapping_iter(text) {
                    hits.push(RawHit {
                        detector: owners[m.pattern().as_usize()],
                        start: m.start(),
                        end: m.end(),
                        anchor: m.start(),
                        name: None,
                    });
                }
            }
        }

        let matched: Vec<usize> = match &self.prefilter {
            Some(set) => set.matches(text).iter().collect(),
            None => (0..self.regexes.len()).collect(),
        };
        for idx in matched {
            let compiled = &self.regexes[idx];
            if compiled.pair {
                for caps in compiled.regex.captures_iter(text) {
                    let anchor = caps.get(0).map(|m| m.start()).unwrap_or(0);
                    let name = caps.get(1).map(|m| m.as_str().to_string());
                    if let Some(value) = caps.get(2) {
                        if value.start() < value.end() {
                            hits.push(RawHit {
                                detector: compiled.detector,
                                start: value.start(),
                                end: value.end(),
                                anchor,
                                name,
                            });
                        }
                    }
                }
            } else {
                for m in compiled.regex.find_iter(text) {
                    if m.start() < m.end() {
                        hits.push(RawHit {
                            detector: compiled.detector,
                            start: m.start(),
                            end: m.end(),
                            anchor: m.start(),
                            name: None,
                        });
                    }
                }
            }
        }

        hits.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then(a.detector.cmp(&b.detector))
        });
        hits.dedup_by(|a, b| a.detector == b.detector && a.start == b.start && a.end == b.end);
        hits
    }

    /// Run the full detection pipeline (normalize, scan, score, resolve)
    /// without producing output text.
    pub fn detect(&self, input: &str, opts: &ScanOpts) -> Vec<Hit> {
        let normalized = normalize_with(input, self.policy.collapse_whitespace);
        self.detect_normalized(&normalized, opts)
    }

    /// Detection over an already-normalized view.
    pub fn detect_normalized(&self, normalized: &Normalized, opts: &ScanOpts) -> Vec<Hit> {
        self.detect_anchored(normalized, opts)
            .into_iter()
            .map(|a| a.hit)
            .collect()
    }

    /// Detection keeping each hit's match-context anchor. Used by the
    /// streaming engine, which must retain context bytes across chunks.
    pub fn detect_anchored(&self, normalized: &Normalized, opts: &ScanOpts) -> Vec<AnchoredHit> {
        let raw = self.scan(&normalized.text);
        let mut candidates = Vec::with_capacity(raw.len());

        for hit in raw {
            let meta = &self.detectors[hit.detector];

            if let Some(name) = &hit.name {
                let allowed = meta
                    .detector
                    .allow_names
                    .iter()
                    .chain(opts.allow_names.iter())
                    .any(|glob| glob_match(glob, name));
                if allowed {
                    continue;
                }
            }

            // A faulty span never takes down the scan; the hit is dropped
            // with a counted warning.
            if normalized.text.get(hit.start..hit.end).is_none() {
                warn!(
                    detector = %meta.detector.id,
                    start = hit.start,
                    end = hit.end,
                    "dropping hit with out-of-bounds span"
                );
                continue;
            }

            let (confidence, features) = score::score_hit(
                &normalized.text,
                hit.start,
                hit.end,
                meta,
                opts.trust,
                &self.params,
            );
            if confidence < meta.threshold {
                continue;
            }
            candidates.push(Candidate {
                detector: hit.detector,
                start: hit.start,
                end: hit.end,
                anchor: hit.anchor,
                confidence,
                risk: meta.detector.risk,
                features,
            });
        }

        let survivors = resolve::resolve(candidates);
        survivors
            .into_iter()
            .map(|c| {
                let meta = &self.detectors[c.detector];
                let (start, end) = normalized.original_span(c.start, c.end);
                let anchor = normalized.map.to_original(c.anchor);
                AnchoredHit {
                    hit: Hit {
                        detector_id: meta.detector.id.clone(),
                        category: meta.detector.category,
                        start,
                        end,
                        matched_text: normalized.text[c.start..c.end].to_string(),
                        confidence: c.confidence,
                        action: meta.action,
                        features: c.features,
                    },
                    anchor,
                }
            })
            .collect()
    }

    /// Highest-risk category present, used by callers that only need a
    /// coarse risk signal.
    pub fn max_confidence(&self, hits: &[Hit]) -> u8 {
        hits.iter().map(|h| h.confidence).max().unwrap_or(0)
    }
}

/// Minimal glob matching for name allowlists: `*` matches any run of
/// characters, everything else is literal. Comparison is ASCII
/// case-insensitive.
pub(crate) fn glob_match(glob: &str, name: &str) -> bool {
    fn inner(glob: &[u8], name: &[u8]) -> bool {
        match glob.split_first() {
            None => name.is_empty(),
            Some((b'*', rest)) => {
                (0..=name.len()).any(|skip| inner(rest, &name[skip..]))
            }
            Some((g, rest)) => match name.split_first() {
                Some((n, name_rest)) => {
                    g.eq_ignore_ascii_case(n) && inner(rest, name_rest)
                }
                None => false,
            },
        }
    }
    inner(glob.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyla_core::detector::{Category, Detector, Risk};
    use skyla_core::policy::Policy;

    fn engine(detectors: Vec<Detector>) -> CompiledEngine {
        crate::compile(&detectors, &Policy::default()).unwrap()
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("theme", "theme"));
        assert!(glob_match("theme", "THEME"));
        assert!(glob_match("consent_*", "consent_analytics"));
        assert!(glob_match("*_token", "session_token"));
        assert!(!glob_match("consent_*", "session_token"));
        assert!(!glob_match("theme", "themes"));
    }

    #[test]
    fn scan_orders_by_start_then_longest() {
        let e = engine(vec![
            Detector::literal("aa", Category::Custom, Risk::Low, ["ab"]),
            Detector::literal("bb", Category::Custom, Risk::Low, ["abc"]),
        ]);
        let hits = e.scan("xxabcxx");
        assert_eq!(hits.len(), 2);
        assert_eq!((hits[0].start, hits[0].end), (2, 5));
        assert_eq!((hits[1].start, hits[1].end), (2, 4));
    }

    #[test]
    fn scan_reports_overlapping_literals() {
        let e = engine(vec![Detector::literal(
            "rep",
            Category::Custom,
            Risk::Low,
            ["aba"],
        )]);
        let hits = e.scan("ababa");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].start, 0);
        assert_eq!(hits[1].start, 2);
    }

    #[test]
    fn pair_detectors_hit_on_the_value_and_carry_the_name() {
        let e = engine(vec![Detector::regex(
            "cookie_pair",
            Category::Secret,
            Risk::Medium,
            r"(?i)(?:;\s*|cookie:\s*)([A-Za-z0-9_\-]+)=([^;\s]+)",
        )]);
        let hits = e.scan("Cookie: sid=abc123; theme=dark");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].name.as_deref(), Some("sid"));
        assert_eq!(&"Cookie: sid=abc123; theme=dark"[hits[0].start..hits[0].end], "abc123");
        assert_eq!(hits[1].name.as_deref(), Some("theme"));
    }

    #[test]
    fn detect_maps_offsets_back_to_the_original() {
        let e = engine(vec![Detector::literal(
            "word",
            Category::Custom,
            Risk::High,
            ["secret"],
        )]);
        let input = "ｓｅｃｒｅｔ here"; // full-width folds to ASCII
        let hits = e.detect(input, &ScanOpts::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].matched_text, "secret");
        assert_eq!(&input[hits[0].start..hits[0].end], "ｓｅｃｒｅｔ");
    }
}
