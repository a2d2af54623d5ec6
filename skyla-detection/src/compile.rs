//! Detector compilation.
//!
//! Turns a detector set plus one policy into an immutable
//! [`CompiledEngine`]. Compilation is deterministic: detectors are
//! processed in lexicographic id order, so the same inputs always produce
//! the same engine, the same hit order, and the same version stamp.
//!
//! Individual failures degrade: an invalid regex drops that detector with
//! a warning. Only a wholly-empty result is fatal.

use aho_corasick::AhoCorasickBuilder;
use regex::{Regex, RegexSet};
use tracing::warn;

use skyla_core::detector::{Action, Detector, DetectorKind};
use skyla_core::policy::Policy;

use crate::engine::{CompiledEngine, CompiledRegex, DetectorMeta, LiteralIndex};
use crate::error::CompileError;
use crate::score::ScoreParams;

/// Literal-pattern count at which the Aho-Corasick automaton pays for its
/// construction cost.
const AUTOMATON_THRESHOLD: usize = 5;

/// Lookahead budget retained across stream chunks for regex detectors.
/// Regex matches longer than this may split across chunk boundaries; that
/// is the bounded-memory tradeoff.
const REGEX_WINDOW: usize = 128;

pub fn compile(detectors: &[Detector], policy: &Policy) -> Result<CompiledEngine, CompileError> {
    compile_with(detectors, policy, ScoreParams::default())
}

/// Compile from raw source documents: the policy JSON plus dictionary
/// bodies keyed by dictionary id. This is the entry point the reloader
/// injects. An unparseable dictionary is dropped with a warning; an
/// unparseable policy is fatal.
pub fn compile_sources(
    policy_raw: &str,
    dicts_raw: &std::collections::BTreeMap<String, String>,
    base_detectors: &[Detector],
) -> Result<CompiledEngine, CompileError> {
    let policy = Policy::from_json(policy_raw)
        .map_err(|e| CompileError::PolicyInvalid(e.to_string()))?;

    let mut detectors = base_detectors.to_vec();
    for (id, raw) in dicts_raw {
        match crate::dictionary::Dictionary::from_json(raw) {
            Ok(dict) => detectors.extend(dict.into_detectors(policy.default_action)),
            Err(error) => {
                warn!(dictionary = %id, %error, "dropping unparseable dictionary");
            }
        }
    }

    compile(&detectors, &policy)
}

pub fn compile_with(
    detectors: &[Detector],
    policy: &Policy,
    params: ScoreParams,
) -> Result<CompiledEngine, CompileError> {
    for (id, rule) in &policy.rules {
        if let Some(min) = rule.min_confidence {
            if min > 100 {
                return Err(CompileError::PolicyInvalid(format!(
                    "rule '{id}': minConfidence {min} is out of range"
                )));
            }
        }
    }

    let mut sorted: Vec<&Detector> = detectors.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));
    sorted.dedup_by(|later, first| {
        if later.id == first.id {
            warn!(detector = %later.id, "duplicate detector id, keeping the first");
            true
        } else {
            false
        }
    });

    let mut metas: Vec<DetectorMeta> = Vec::new();
    let mut literal_patterns: Vec<(String, usize)> = Vec::new();
    let mut regexes: Vec<CompiledRegex> = Vec::new();
    let mut regex_patterns: Vec<String> = Vec::new();
    let mut longest_literal = 0usize;
    let mut hasher = blake3::Hasher::new();

    for detector in sorted {
        let index = metas.len();
        match &detector.kind {
            DetectorKind::Literal { patterns } => {
                let usable: Vec<&String> =
                    patterns.iter().filter(|p| !p.is_empty()).collect();
                if usable.is_empty() {
                    warn!(detector = %detector.id, "dropping literal detector with no patterns");
                    continue;
                }
                for pattern in usable {
                    longest_literal = longest_literal.max(pattern.len());
                    literal_patterns.push((pattern.clone(), index));
                    hasher.update(pattern.as_bytes());
                }
            }
            DetectorKind::Regex { pattern } => {
                if pattern.is_empty() {
                    warn!(detector = %detector.id, "dropping detector with empty pattern");
                    continue;
                }
                match Regex::new(pattern) {
                    Ok(regex) => {
                        let pair = regex.captures_len() >= 3;
                        regexes.push(CompiledRegex {
                            detector: index,
                            regex,
                            pair,
                        });
                        regex_patterns.push(pattern.clone());
                        hasher.update(pattern.as_bytes());
                    }
                    Err(error) => {
                        warn!(
                            detector = %detector.id,
                            %error,
                            "dropping detector with invalid regex"
                        );
                        continue;
                    }
                }
            }
        }

        let action = policy.action_for(&detector.id, detector.default_action);
        let threshold = policy.threshold_for(&detector.id, detector.min_confidence);
        let masker_id = policy
            .rules
            .get(&detector.id)
            .and_then(|r| r.masker_id.clone())
            .or_else(|| detector.masker_id.clone());
        let hints: Vec<String> = detector
            .context_hints
            .iter()
            .chain(policy.context_hints.iter())
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase())
            .collect();
        let negative_hints: Vec<String> = detector
            .negative_hints
            .iter()
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase())
            .collect();

        hasher.update(detector.id.as_bytes());
        hasher.update(&[action as u8, threshold]);

        metas.push(DetectorMeta {
            detector: detector.clone(),
            action,
            threshold,
            masker_id,
            hints,
            negative_hints,
        });
    }

    if metas.is_empty() {
        return Err(CompileError::PolicyEmpty);
    }

    for id in policy.rules.keys() {
        if !metas.iter().any(|m| &m.detector.id == id) {
            warn!(rule = %id, "policy rule references an unknown detector");
        }
    }

    let needs_key =
        metas.iter().any(|m| m.action == Action::Tokenize) || policy.requires_key();
    if needs_key && policy.hmac_key.is_none() {
        return Err(CompileError::MissingKey);
    }

    let literals = if literal_patterns.is_empty() {
        LiteralIndex::Empty
    } else if literal_patterns.len() >= AUTOMATON_THRESHOLD {
        let patterns: Vec<&str> = literal_patterns.iter().map(|(p, _)| p.as_str()).collect();
        let owners: Vec<usize> = literal_patterns.iter().map(|(_, d)| *d).collect();
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .map_err(|e| CompileError::Automaton(e.to_string()))?;
        LiteralIndex::Automaton { ac, owners }
    } else {
        LiteralIndex::Linear(
            literal_patterns
                .into_iter()
                .map(|(p, d)| (p.to_ascii_lowercase(), d))
                .collect(),
        )
    };

    let prefilter = if regex_patterns.len() > 1 {
        match RegexSet::new(&regex_patterns) {
            Ok(set) => Some(set),
            Err(error) => {
                warn!(%error, "regex prefilter unavailable, scanning patterns individually");
                None
            }
        }
    } else {
        None
    };

    // Hash the policy minus the key so the stamp never derives from secret
    // material.
    let mut policy_value = serde_json::to_value(policy)
        .map_err(|e| CompileError::PolicyInvalid(e.to_string()))?;
    if let Some(object) = policy_value.as_object_mut() {
        object.remove("hmacKey");
    }
    hasher.update(policy_value.to_string().as_bytes());

    // The retained window must also cover the hint radius, so context
    // scoring sees the same bytes whether input arrives whole or chunked.
    let window = {
        let literal_window = longest_literal.saturating_sub(1);
        let pattern_window = if regexes.is_empty() {
            literal_window
        } else {
            literal_window.max(REGEX_WINDOW)
        };
        pattern_window.max(params.hint_radius)
    };

    let version = hasher.finalize().to_hex().as_str()[..16].to_string();

    Ok(CompiledEngine {
        detectors: metas,
        literals,
        regexes,
        prefilter,
        policy: policy.clone(),
        params,
        version,
        window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyla_core::detector::{Category, Risk};
    use skyla_core::policy::{HmacKey, PolicyRule};

    fn literal(id: &str, pattern: &str) -> Detector {
        Detector::literal(id, Category::Custom, Risk::Medium, [pattern])
    }

    #[test]
    fn invalid_regex_drops_only_that_detector() {
        let detectors = vec![
            Detector::regex("bad", Category::Custom, Risk::Low, r"([unclosed"),
            literal("good", "keep"),
        ];
        let engine = compile(&detectors, &Policy::default()).unwrap();
        assert_eq!(engine.detector_count(), 1);
        assert_eq!(engine.scan("please keep this").len(), 1);
    }

    #[test]
    fn all_detectors_dropped_is_policy_empty() {
        let detectors = vec![Detector::regex("bad", Category::Custom, Risk::Low, r"(")];
        assert!(matches!(
            compile(&detectors, &Policy::default()),
            Err(CompileError::PolicyEmpty)
        ));
        assert!(matches!(
            compile(&[], &Policy::default()),
            Err(CompileError::PolicyEmpty)
        ));
    }

    #[test]
    fn tokenize_without_key_is_rejected_at_compile_time() {
        let detectors = vec![literal("card", "4242")];
        let mut policy = Policy::default();
        policy.rules.insert(
            "card".into(),
            PolicyRule {
                action: Some(Action::Tokenize),
                ..Default::default()
            },
        );
        assert!(matches!(
            compile(&detectors, &policy),
            Err(CompileError::MissingKey)
        ));

        policy.hmac_key = Some(HmacKey::new(b"key".to_vec()));
        assert!(compile(&detectors, &policy).is_ok());
    }

    #[test]
    fn out_of_range_threshold_is_policy_invalid() {
        let detectors = vec![literal("card", "4242")];
        let mut policy = Policy::default();
        policy.rules.insert(
            "card".into(),
            PolicyRule {
                min_confidence: Some(180),
                ..Default::default()
            },
        );
        assert!(matches!(
            compile(&detectors, &policy),
            Err(CompileError::PolicyInvalid(_))
        ));
    }

    #[test]
    fn version_stamp_is_stable_and_content_sensitive() {
        let detectors = vec![literal("a", "one"), literal("b", "two")];
        let shuffled = vec![literal("b", "two"), literal("a", "one")];
        let policy = Policy::default();
        let v1 = compile(&detectors, &policy).unwrap().version().to_string();
        let v2 = compile(&shuffled, &policy).unwrap().version().to_string();
        assert_eq!(v1, v2);

        let changed = vec![literal("a", "one"), literal("b", "three")];
        let v3 = compile(&changed, &policy).unwrap().version().to_string();
        assert_ne!(v1, v3);
    }

    #[test]
    fn automaton_and_linear_paths_agree() {
        let few = vec![literal("x", "needle")];
        let many: Vec<Detector> = ["needle", "alpha", "beta", "gamma", "delta"]
            .iter()
            .map(|p| literal(&format!("d_{p}"), p))
            .collect();
        let linear = compile(&few, &Policy::default()).unwrap();
        let automaton = compile(&many, &Policy::default()).unwrap();
        let hay = "a needle in a haystack";
        let a = linear.scan(hay);
        let b = automaton.scan(hay);
        assert_eq!(a.len(), 1);
        assert!(b.iter().any(|h| (h.start, h.end) == (a[0].start, a[0].end)));
    }

    #[test]
    fn window_covers_patterns_and_the_hint_radius() {
        // Short literals: the hint radius dominates.
        let engine = compile(&[literal("x", "abcdefgh")], &Policy::default()).unwrap();
        assert_eq!(engine.window(), ScoreParams::default().hint_radius);

        // A literal longer than the radius dominates instead.
        let long = "x".repeat(64);
        let engine = compile(&[literal("x", &long)], &Policy::default()).unwrap();
        assert_eq!(engine.window(), 63);

        // Any regex raises the window to the regex lookahead budget.
        let with_regex = compile(
            &[
                literal("x", "abcdefgh"),
                Detector::regex("r", Category::Custom, Risk::Low, r"\d{4}"),
            ],
            &Policy::default(),
        )
        .unwrap();
        assert_eq!(with_regex.window(), 128);
    }

    #[test]
    fn compile_sources_merges_dictionaries_over_the_base_set() {
        let mut dicts = std::collections::BTreeMap::new();
        dicts.insert(
            "acme".to_string(),
            r#"{"entries":[{"pattern":"ACME-\\d+","type":"acme_id","risk":"high"}]}"#.to_string(),
        );
        let engine = compile_sources("{}", &dicts, &[literal("base", "keep")]).unwrap();
        assert_eq!(engine.detector_count(), 2);
        assert_eq!(engine.scan("ACME-123 and keep").len(), 2);
    }

    #[test]
    fn compile_sources_drops_bad_dictionaries_but_rejects_bad_policy() {
        let mut dicts = std::collections::BTreeMap::new();
        dicts.insert("broken".to_string(), "not json at all".to_string());
        let engine = compile_sources("{}", &dicts, &[literal("base", "keep")]).unwrap();
        assert_eq!(engine.detector_count(), 1);

        assert!(matches!(
            compile_sources("not json", &dicts, &[literal("base", "keep")]),
            Err(CompileError::PolicyInvalid(_))
        ));
    }

    #[test]
    fn duplicate_ids_keep_the_first() {
        let detectors = vec![literal("dup", "one"), literal("dup", "two")];
        let engine = compile(&detectors, &Policy::default()).unwrap();
        assert_eq!(engine.detector_count(), 1);
        assert_eq!(engine.scan("one two").len(), 1);
    }
}
