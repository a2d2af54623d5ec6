//! ## skyla-reload
//! **Hot policy and dictionary reloading**
//!
//! ### Expectations:
//! - Conditional GETs: unchanged sources cost one 304 round trip
//! - Atomic engine publication; readers never see a half-built engine
//! - Fetch failures back off exponentially and never unpublish the
//!   previously-compiled engine
//!
//! ### Components:
//! - `source`: per-URL conditional fetching (http, https, hardened file)
//! - `reloader`: the periodic task, change detection, and engine swap
//!
//! The crate is generic over the compiled-engine type: the compiler is
//! injected, so nothing here depends on how detection works.

pub mod reloader;
pub mod source;

mod error;

pub use error::ReloadError;
pub use reloader::{ReloadHooks, Reloader, ReloaderOptions};
pub use source::{FetchOutcome, SourceClient, SourceMeta};
