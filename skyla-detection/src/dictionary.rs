//! Dictionary documents.
//!
//! Dictionaries are remote detector contributions: flat lists of patterns
//! tagged with a detector id and a risk. They carry no actions of their
//! own; entries take the policy's default action. Entries sharing a
//! detector id merge where possible (literals combine into one literal
//! set; one regex per id).

use serde::Deserialize;
use tracing::warn;

use skyla_core::detector::{Action, Category, Detector, DetectorKind, Risk};

#[derive(Debug, Deserialize)]
pub struct Dictionary {
    #[serde(default)]
    pub entries: Vec<DictionaryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryEntry {
    pub pattern: String,
    /// Detector id the entry contributes to.
    #[serde(rename = "type")]
    pub detector_id: String,
    #[serde(default = "default_risk")]
    pub risk: Risk,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_risk() -> Risk {
    Risk::Medium
}

impl Dictionary {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Convert entries into detectors, merging by detector id.
    pub fn into_detectors(self, default_action: Action) -> Vec<Detector> {
        let mut detectors: Vec<Detector> = Vec::new();

        for entry in self.entries {
            if entry.pattern.is_empty() {
                warn!(detector = %entry.detector_id, "skipping dictionary entry with empty pattern");
                continue;
            }
            let is_regex = regex_syntax_present(&entry.pattern);
            match detectors.iter_mut().find(|d| d.id == entry.detector_id) {
                Some(existing) => match (&mut existing.kind, is_regex) {
                    (DetectorKind::Literal { patterns }, false) => {
                        patterns.push(entry.pattern);
                    }
                    _ => {
                        warn!(
                            detector = %entry.detector_id,
                            "dictionary id already bound, dropping extra pattern"
                        );
                    }
                },
                None => {
                    let mut detector = if is_regex {
                        Detector::regex(
                            &entry.detector_id,
                            Category::Custom,
                            entry.risk,
                            &entry.pattern,
                        )
                    } else {
                        Detector::literal(
                            &entry.detector_id,
                            Category::Custom,
                            entry.risk,
                            [entry.pattern],
                        )
                    };
                    detector.default_action = default_action;
                    detectors.push(detector);
                }
            }
        }
        detectors
    }
}

/// Entries may be plain literals or regexes; metacharacters decide which
/// compilation path they take.
fn regex_syntax_present(pattern: &str) -> bool {
    pattern.chars().any(|c| {
        matches!(
            c,
            '\\' | '[' | ']' | '(' | ')' | '{' | '}' | '*' | '+' | '?' | '|' | '^' | '$' | '.'
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_classify_literal_vs_regex() {
        let dict = Dictionary::from_json(
            r#"{"entries":[
                {"pattern":"ACME-ID","type":"acme","risk":"low"},
                {"pattern":"ACME-\\d+","type":"acme_num","risk":"high","description":"numbered ids"}
            ]}"#,
        )
        .unwrap();
        let detectors = dict.into_detectors(Action::Mask);
        assert_eq!(detectors.len(), 2);
        assert!(matches!(detectors[0].kind, DetectorKind::Literal { .. }));
        assert!(matches!(detectors[1].kind, DetectorKind::Regex { .. }));
        assert_eq!(detectors[1].risk, Risk::High);
    }

    #[test]
    fn literal_entries_with_the_same_id_merge() {
        let dict = Dictionary::from_json(
            r#"{"entries":[
                {"pattern":"alpha","type":"codes"},
                {"pattern":"beta","type":"codes"}
            ]}"#,
        )
        .unwrap();
        let detectors = dict.into_detectors(Action::Remove);
        assert_eq!(detectors.len(), 1);
        assert_eq!(detectors[0].default_action, Action::Remove);
        match &detectors[0].kind {
            DetectorKind::Literal { patterns } => assert_eq!(patterns.len(), 2),
            other => panic!("expected literal set, got {other:?}"),
        }
    }

    #[test]
    fn missing_risk_defaults_to_medium() {
        let dict =
            Dictionary::from_json(r#"{"entries":[{"pattern":"x-key","type":"xk"}]}"#).unwrap();
        let detectors = dict.into_detectors(Action::Mask);
        assert_eq!(detectors[0].risk, Risk::Medium);
    }
}
