//! Hot-reload wiring.
//!
//! Binds a [`Reloader`] to a [`Registry`]: the reloader fetches policy
//! and dictionaries, compiles them over the builtin detector packs, and
//! hands each new engine to the registry through the atomic swap. The
//! previously-published engine serves until the moment of the swap;
//! in-flight calls keep the snapshot they started with.

use std::sync::Arc;

use skyla_detection::{builtin, compile_sources, CompiledEngine};
use skyla_reload::{ReloadHooks, Reloader, ReloaderOptions};

use crate::registry::Registry;

/// Build a reloader that publishes every successful compile into
/// `registry`. The returned reloader is not yet started; call
/// `start().await` to run the first tick and schedule the task.
pub fn bind_reloader(registry: Arc<Registry>, options: ReloaderOptions) -> Reloader<CompiledEngine> {
    let base = builtin::all_detectors();
    let hooks: ReloadHooks<CompiledEngine> = ReloadHooks {
        on_swap: Some(Box::new(move |engine: &Arc<CompiledEngine>, _changed: &[String]| {
            registry.swap_engine(Arc::clone(engine));
        })),
        on_error: None,
    };
    Reloader::new(
        options,
        move |policy_raw, dicts_raw| {
            compile_sources(policy_raw, dicts_raw, &base).map_err(Into::into)
        },
        hooks,
    )
}
