//! Maskers: matched text to redacted representation.
//!
//! Three output conventions are supported, matching what downstream
//! consumers expect to see in redacted payloads:
//!
//! - `[REDACTED:<TYPE>]` labels for opaque secrets;
//! - format-preserving bullet masks (`•••-••••`) where the shape of the
//!   value should survive;
//! - last-N-visible masks (`***-**-6789`) for identifiers whose suffix is
//!   safe to reveal.

use std::collections::HashMap;
use std::sync::Arc;

/// Turns a matched substring into its redacted representation.
pub trait Masker: Send + Sync {
    fn id(&self) -> &str;
    fn mask(&self, matched: &str) -> String;
}

/// Fixed replacement label, e.g. `[REDACTED:AUTH]`.
pub struct LabelMasker {
    id: String,
    label: String,
}

impl LabelMasker {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
        }
    }
}

impl Masker for LabelMasker {
    fn id(&self) -> &str {
        &self.id
    }

    fn mask(&self, _matched: &str) -> String {
        self.label.clone()
    }
}

/// Replaces every alphanumeric character with a bullet, keeping
/// separators, so `090-1234-5678` becomes `•••-••••-••••`.
pub struct BulletMasker {
    id: String,
}

impl BulletMasker {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl Masker for BulletMasker {
    fn id(&self) -> &str {
        &self.id
    }

    fn mask(&self, matched: &str) -> String {
        matched
            .chars()
            .map(|c| if c.is_alphanumeric() { '•' } else { c })
            .collect()
    }
}

/// Masks all but the last `visible` alphanumeric characters, keeping
/// separators, so an SSN masks to `***-**-6789`.
pub struct LastVisibleMasker {
    id: String,
    visible: usize,
    fill: char,
}

impl LastVisibleMasker {
    pub fn new(id: &str, visible: usize, fill: char) -> Self {
        Self {
            id: id.to_string(),
            visible,
            fill,
        }
    }
}

impl Masker for LastVisibleMasker {
    fn id(&self) -> &str {
        &self.id
    }

    fn mask(&self, matched: &str) -> String {
        let alnum_total = matched.chars().filter(|c| c.is_alphanumeric()).count();
        let hidden = alnum_total.saturating_sub(self.visible);
        let mut seen = 0usize;
        matched
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    seen += 1;
                    if seen <= hidden {
                        self.fill
                    } else {
                        c
                    }
                } else {
                    c
                }
            })
            .collect()
    }
}

/// Reveals a short head and tail with a fixed-width fill between, so a
/// cookie value masks to `se****23`. Values too short to split are fully
/// replaced by the fill.
pub struct PartialMasker {
    id: String,
    head: usize,
    tail: usize,
    fill: char,
    fill_len: usize,
}

impl PartialMasker {
    pub fn new(id: &str, head: usize, tail: usize, fill: char, fill_len: usize) -> Self {
        Self {
            id: id.to_string(),
            head,
            tail,
            fill,
            fill_len,
        }
    }
}

impl Masker for PartialMasker {
    fn id(&self) -> &str {
        &self.id
    }

    fn mask(&self, matched: &str) -> String {
        let chars: Vec<char> = matched.chars().collect();
        let fill: String = std::iter::repeat(self.fill).take(self.fill_len).collect();
        if chars.len() <= self.head + self.tail {
            return fill;
        }
        let head: String = chars[..self.head].iter().collect();
        let tail: String = chars[chars.len() - self.tail..].iter().collect();
        format!("{head}{fill}{tail}")
    }
}

/// The generic placeholder used when a detector names no masker.
pub fn generic_label(detector_id: &str) -> String {
    format!("[REDACTED:{}]", detector_id.to_uppercase())
}

/// Masker lookup by id. Starts with the builtin set; plugin sets extend it.
#[derive(Clone)]
pub struct MaskerRegistry {
    maskers: HashMap<String, Arc<dyn Masker>>,
}

impl MaskerRegistry {
    pub fn empty() -> Self {
        Self {
            maskers: HashMap::new(),
        }
    }

    pub fn register(&mut self, masker: Arc<dyn Masker>) {
        self.maskers.insert(masker.id().to_string(), masker);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Masker>> {
        self.maskers.get(id)
    }
}

impl Default for MaskerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(BulletMasker::new("bullet")));
        registry.register(Arc::new(LastVisibleMasker::new("ssn_last4", 4, '*')));
        registry.register(Arc::new(LastVisibleMasker::new("card_last4", 4, '*')));
        registry.register(Arc::new(PartialMasker::new("cookie_partial", 2, 2, '*', 4)));
        registry.register(Arc::new(LabelMasker::new("auth_label", "[REDACTED:AUTH]")));
        registry.register(Arc::new(LabelMasker::new(
            "api_key_label",
            "[REDACTED:API_KEY]",
        )));
        registry.register(Arc::new(LabelMasker::new(
            "ignore_instructions_label",
            "[REQUEST_TO_IGNORE_INSTRUCTIONS]",
        )));
        registry.register(Arc::new(LabelMasker::new(
            "reveal_prompt_label",
            "[REQUEST_TO_REVEAL_PROMPT]",
        )));
        registry.register(Arc::new(LabelMasker::new(
            "role_switch_label",
            "[REQUEST_TO_SWITCH_ROLE]",
        )));
        registry.register(Arc::new(LabelMasker::new(
            "jailbreak_label",
            "[JAILBREAK_ATTEMPT]",
        )));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullet_mask_preserves_format() {
        let m = BulletMasker::new("bullet");
        assert_eq!(m.mask("090-1234-5678"), "•••-••••-••••");
        assert_eq!(m.mask("94105"), "•••••");
        assert_eq!(m.mask("150-0001"), "•••-••••");
    }

    #[test]
    fn last_visible_reveals_only_the_suffix() {
        let m = LastVisibleMasker::new("ssn_last4", 4, '*');
        assert_eq!(m.mask("123-45-6789"), "***-**-6789");
        assert_eq!(m.mask("4242 4242 4242 4242"), "**** **** **** 4242");
    }

    #[test]
    fn last_visible_handles_short_values() {
        let m = LastVisibleMasker::new("ssn_last4", 4, '*');
        assert_eq!(m.mask("123"), "123");
    }

    #[test]
    fn partial_mask_reveals_head_and_tail() {
        let m = PartialMasker::new("cookie_partial", 2, 2, '*', 4);
        assert_eq!(m.mask("secret123"), "se****23");
        assert_eq!(m.mask("abc"), "****");
    }

    #[test]
    fn generic_label_uses_the_detector_id() {
        assert_eq!(generic_label("api_key"), "[REDACTED:API_KEY]");
    }

    #[test]
    fn registry_resolves_builtins() {
        let registry = MaskerRegistry::default();
        assert!(registry.get("bullet").is_some());
        assert!(registry.get("ssn_last4").is_some());
        assert!(registry.get("nope").is_none());
    }
}
