//! # skyla-core
//!
//! Foundation layer for the Skyla content-inspection engine.
//! Built with offset fidelity, determinism, and zero-surprise APIs as
//! primary design constraints.
//!
//! ### Expectations (Production):
//! - Identity-map fast path for pure-ASCII input (no allocation)
//! - Deterministic tokenization (same key + text => same token)
//! - Lossless mapping from normalized offsets back to original bytes
//!
//! ### Key Submodules:
//! - `detector`: detector definitions and classification metadata
//! - `policy`: external policy document model (actions, thresholds, keys)
//! - `hit`: located, scored matches and their score breakdown
//! - `normalize`: NFKC canonicalization with invisible-character stripping
//! - `mask`: masker trait and the builtin masker set
//! - `token`: keyed one-way replacement tokens

pub mod detector;
pub mod hit;
pub mod mask;
pub mod normalize;
pub mod policy;
pub mod token;

pub mod prelude {
    pub use crate::detector::{Action, Category, Detector, DetectorKind, Risk};
    pub use crate::hit::{Hit, HitFeatures};
    pub use crate::mask::{Masker, MaskerRegistry};
    pub use crate::normalize::{normalize, Normalized, OffsetMap};
    pub use crate::policy::{Environment, Policy, PolicyRule, TrustLevel};
    pub use crate::token::tokenize;
}
