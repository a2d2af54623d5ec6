//! ## skyla-detection
//! **Multi-pattern detection with deterministic compilation**
//!
//! ### Expectations:
//! - O(n + m + z) scans over normalized text (n input, m patterns, z hits)
//! - Deterministic engines: same detector set + policy => same hits, same order
//! - Per-detector compile failures degrade, never abort the whole set
//!
//! ### Components:
//! - `compile`: detector set + policy -> immutable [`CompiledEngine`]
//! - `engine`: Aho-Corasick + regex-set scan surface
//! - `score`: context-aware confidence scoring
//! - `resolve`: overlap resolution and threshold filtering
//! - `builtin`: the builtin PII / secret / injection detector packs
//! - `dictionary`: remote detector contributions and their conversion

pub mod builtin;
pub mod compile;
pub mod dictionary;
pub mod engine;
pub mod resolve;
pub mod score;

mod error;

pub use compile::{compile, compile_sources, compile_with};
pub use engine::{AnchoredHit, CompiledEngine, RawHit, ScanOpts};
pub use error::CompileError;
pub use score::ScoreParams;
