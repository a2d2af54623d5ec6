//! Input canonicalization.
//!
//! Detection runs over a normalized view of the input: NFKC composition
//! (which also folds full-width ASCII to half-width), with zero-width and
//! bidi-control characters stripped so invisible characters cannot split a
//! pattern. Every normalized byte carries a mapping back to the original
//! input, so hits are always reported and redacted against original bytes.
//!
//! Pure-ASCII input takes an allocation-free fast path with an identity map.

use unicode_normalization::UnicodeNormalization;

/// Monotone mapping from normalized byte offsets back to original offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetMap {
    /// Normalization was a no-op; offsets are shared.
    Identity,
    /// Per-byte tables. `starts[i]` is the original offset of the source
    /// character that produced normalized byte `i`; `ends[i]` is the end of
    /// that character.
    Table {
        starts: Vec<usize>,
        ends: Vec<usize>,
    },
}

impl OffsetMap {
    /// Original offset corresponding to the start of normalized position
    /// `pos`. Total: positions at or past the end map to the end of the
    /// last consumed source character.
    pub fn to_original(&self, pos: usize) -> usize {
        match self {
            OffsetMap::Identity => pos,
            OffsetMap::Table { starts, ends } => starts
                .get(pos)
                .copied()
                .unwrap_or_else(|| ends.last().copied().unwrap_or(0)),
        }
    }

    /// Map a normalized byte span to the original byte span covering the
    /// same characters.
    pub fn span_to_original(&self, start: usize, end: usize) -> (usize, usize) {
        match self {
            OffsetMap::Identity => (start, end),
            OffsetMap::Table { ends, .. } => {
                let orig_start = self.to_original(start);
                if end <= start {
                    return (orig_start, orig_start);
                }
                let orig_end = ends
                    .get(end - 1)
                    .copied()
                    .unwrap_or_else(|| ends.last().copied().unwrap_or(orig_start));
                (orig_start, orig_end)
            }
        }
    }
}

/// The canonicalized text plus its offset map.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub text: String,
    pub map: OffsetMap,
}

impl Normalized {
    /// Map a span in the normalized text back to the original input.
    pub fn original_span(&self, start: usize, end: usize) -> (usize, usize) {
        self.map.span_to_original(start, end)
    }
}

/// Invisible characters that are dropped entirely: zero-width spaces and
/// joiners, bidi marks and overrides, word joiner, BOM.
fn is_stripped(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

fn is_plain_ascii(input: &str) -> bool {
    input
        .bytes()
        .all(|b| (0x20..0x7F).contains(&b) || b == b'\t' || b == b'\n' || b == b'\r')
}

/// Canonicalize `input` without whitespace collapsing.
pub fn normalize(input: &str) -> Normalized {
    normalize_with(input, false)
}

/// Canonicalize `input`, optionally collapsing whitespace runs to a single
/// space.
pub fn normalize_with(input: &str, collapse_whitespace: bool) -> Normalized {
    if !collapse_whitespace && is_plain_ascii(input) {
        return Normalized {
            text: input.to_string(),
            map: OffsetMap::Identity,
        };
    }

    let mut text = String::with_capacity(input.len());
    let mut starts = Vec::with_capacity(input.len());
    let mut ends = Vec::with_capacity(input.len());
    let mut in_whitespace_run = false;

    for (idx, c) in input.char_indices() {
        if is_stripped(c) {
            continue;
        }
        let char_end = idx + c.len_utf8();
        if collapse_whitespace && c.is_whitespace() {
            if in_whitespace_run {
                continue;
            }
            in_whitespace_run = true;
            text.push(' ');
            starts.push(idx);
            ends.push(char_end);
            continue;
        }
        in_whitespace_run = false;
        for folded in std::iter::once(c).nfkc() {
            let len = folded.len_utf8();
            for _ in 0..len {
                starts.push(idx);
                ends.push(char_end);
            }
            text.push(folded);
        }
    }

    Normalized {
        text,
        map: OffsetMap::Table { starts, ends },
    }
}
