//! The periodic reload task.
//!
//! Fetches the policy, the manifest, and every manifest-listed dictionary
//! on a jittered interval, recompiles through the injected compiler when
//! anything changed (or a reload was forced), and atomically publishes
//! the result. Fetch or compile failures leave the previously-published
//! engine serving and back the interval off exponentially.
//!
//! Callbacks run serialized on the reloader's own task and must not
//! block; post work elsewhere if needed.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ReloadError;
use crate::source::{FetchOutcome, SourceClient, SourceMeta};

/// Injected compiler: `(policy_raw, dict_id -> dict_raw) -> engine`.
pub type CompileFn<E> = dyn Fn(&str, &BTreeMap<String, String>) -> Result<E, Box<dyn std::error::Error + Send + Sync>>
    + Send
    + Sync;

/// Invoked after every successful publication with the change ids
/// (`policy`, `manifest`, `dict:<id>`, `dict-removed:<id>`).
pub type OnSwap<E> = dyn Fn(&Arc<E>, &[String]) + Send + Sync;

/// Invoked for every failed background tick.
pub type OnError = dyn Fn(&ReloadError) + Send + Sync;

pub struct ReloaderOptions {
    pub policy_url: String,
    pub manifest_url: Option<String>,
    /// Base tick interval; each tick is jittered by ±20 %.
    pub interval: Duration,
    /// Backoff ceiling.
    pub max_interval: Duration,
    /// Base directory for `file://` sources; file scheme disabled when
    /// unset.
    pub base_dir: Option<PathBuf>,
    /// Hostnames allowed in `file://host/...` URLs.
    pub allow_hosts: Vec<String>,
    /// Size ceiling for file sources.
    pub max_bytes: u64,
}

impl ReloaderOptions {
    pub fn new(policy_url: impl Into<String>) -> Self {
        Self {
            policy_url: policy_url.into(),
            manifest_url: None,
            interval: Duration::from_secs(30),
            max_interval: Duration::from_secs(300),
            base_dir: None,
            allow_hosts: Vec::new(),
            max_bytes: 1 << 20,
        }
    }
}

/// Optional lifecycle callbacks, supplied at construction.
pub struct ReloadHooks<E> {
    pub on_swap: Option<Box<OnSwap<E>>>,
    pub on_error: Option<Box<OnError>>,
}

impl<E> Default for ReloadHooks<E> {
    fn default() -> Self {
        Self {
            on_swap: None,
            on_error: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    dicts: Vec<DictRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct DictRef {
    id: String,
    url: String,
}

struct DictState {
    url: String,
    meta: SourceMeta,
}

#[derive(Default)]
struct TickState {
    policy: Option<SourceMeta>,
    manifest: Option<SourceMeta>,
    dicts: BTreeMap<String, DictState>,
    consecutive_failures: u32,
}

struct Inner<E> {
    options: ReloaderOptions,
    client: SourceClient,
    compile: Box<CompileFn<E>>,
    hooks: ReloadHooks<E>,
    published: ArcSwapOption<E>,
    /// Serializes ticks and, with them, the callbacks.
    state: Mutex<TickState>,
    stopped: AtomicBool,
    forced: AtomicBool,
    wake: Notify,
}

pub struct Reloader<E> {
    inner: Arc<Inner<E>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<E: Send + Sync + 'static> Reloader<E> {
    pub fn new<F>(options: ReloaderOptions, compile: F, hooks: ReloadHooks<E>) -> Self
    where
        F: Fn(&str, &BTreeMap<String, String>) -> Result<E, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        let client = SourceClient::new(
            options.base_dir.clone(),
            options.allow_hosts.clone(),
            options.max_bytes,
        );
        Self {
            inner: Arc::new(Inner {
                options,
                client,
                compile: Box::new(compile),
                hooks,
                published: ArcSwapOption::empty(),
                state: Mutex::new(TickState::default()),
                stopped: AtomicBool::new(false),
                forced: AtomicBool::new(false),
                wake: Notify::new(),
            }),
            task: std::sync::Mutex::new(None),
        }
    }

    /// Run the first tick to completion, surfacing its error, then
    /// schedule the periodic task regardless of that outcome.
    pub async fn start(&self) -> Result<(), ReloadError> {
        let first = self.inner.tick(false).await;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { run_loop(inner).await });
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }

        first.map(drop)
    }

    /// Halt between ticks; an in-flight tick runs to completion.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    /// Mark the next tick unconditional (cache-busting fetch and a
    /// recompile even without changes) and wake the task.
    pub fn force_reload(&self) {
        self.inner.forced.store(true, Ordering::SeqCst);
        self.inner.wake.notify_one();
    }

    /// Drive a single tick synchronously. Used by operational tooling and
    /// tests; the background task uses the same path.
    pub async fn run_once(&self, force: bool) -> Result<Vec<String>, ReloadError> {
        self.inner.tick(force).await
    }

    /// The most recent successfully-compiled engine.
    pub fn get_compiled(&self) -> Result<Arc<E>, ReloadError> {
        self.inner.published.load_full().ok_or(ReloadError::NotCompiled)
    }
}

async fn run_loop<E: Send + Sync + 'static>(inner: Arc<Inner<E>>) {
    loop {
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        let delay = inner.next_delay().await;
        tokio::select! {
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        if inner.stopped.load(Ordering::SeqCst) {
            break;
        }
        let forced = inner.forced.swap(false, Ordering::SeqCst);
        match inner.tick(forced).await {
            Ok(changed) if !changed.is_empty() => {
                info!(?changed, "reload applied");
            }
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "reload tick failed");
                if let Some(on_error) = &inner.hooks.on_error {
                    on_error(&error);
                }
            }
        }
    }
}

impl<E: Send + Sync + 'static> Inner<E> {
    async fn next_delay(&self) -> Duration {
        let failures = self.state.lock().await.consecutive_failures;
        jittered(backoff_delay(
            self.options.interval,
            self.options.max_interval,
            failures,
        ))
    }

    async fn tick(&self, force: bool) -> Result<Vec<String>, ReloadError> {
        let mut state = self.state.lock().await;
        let result = self.tick_inner(&mut state, force).await;
        match &result {
            Ok(_) => state.consecutive_failures = 0,
            Err(_) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1)
            }
        }
        result
    }

    async fn tick_inner(
        &self,
        state: &mut TickState,
        force: bool,
    ) -> Result<Vec<String>, ReloadError> {
        let mut changed: Vec<String> = Vec::new();

        match self
            .client
            .fetch(&self.options.policy_url, state.policy.as_ref(), force)
            .await?
        {
            FetchOutcome::Changed(meta) => {
                state.policy = Some(meta);
                changed.push("policy".to_string());
            }
            FetchOutcome::Unchanged => {}
        }

        if let Some(manifest_url) = &self.options.manifest_url {
            match self
                .client
                .fetch(manifest_url, state.manifest.as_ref(), force)
                .await?
            {
                FetchOutcome::Changed(meta) => {
                    state.manifest = Some(meta);
                    changed.push("manifest".to_string());
                }
                FetchOutcome::Unchanged => {}
            }

            let refs: Vec<DictRef> = match state.manifest.as_ref().and_then(|m| m.json.clone()) {
                Some(value) => serde_json::from_value::<Manifest>(value)
                    .map_err(|e| ReloadError::fetch(manifest_url, format!("bad manifest: {e}")))?
                    .dicts,
                None if state.manifest.is_some() => {
                    return Err(ReloadError::fetch(manifest_url, "manifest is not JSON"));
                }
                None => Vec::new(),
            };

            let current: HashSet<&str> = refs.iter().map(|d| d.id.as_str()).collect();
            let removed: Vec<String> = state
                .dicts
                .keys()
                .filter(|id| !current.contains(id.as_str()))
                .cloned()
                .collect();
            for id in removed {
                state.dicts.remove(&id);
                changed.push(format!("dict-removed:{id}"));
            }

            for dict in refs {
                // A moved dictionary is fetched fresh; the old validators
                // belong to the old URL.
                let prior = state
                    .dicts
                    .get(&dict.id)
                    .filter(|d| d.url == dict.url)
                    .map(|d| d.meta.clone());
                match self.client.fetch(&dict.url, prior.as_ref(), force).await? {
                    FetchOutcome::Changed(meta) => {
                        changed.push(format!("dict:{}", dict.id));
                        state.dicts.insert(
                            dict.id,
                            DictState {
                                url: dict.url,
                                meta,
                            },
                        );
                    }
                    FetchOutcome::Unchanged => {}
                }
            }
        }

        if changed.is_empty() && !force {
            return Ok(changed);
        }

        let policy_raw = state
            .policy
            .as_ref()
            .and_then(|m| m.body.as_deref())
            .unwrap_or("");
        let dicts_raw: BTreeMap<String, String> = state
            .dicts
            .iter()
            .filter_map(|(id, d)| d.meta.body.clone().map(|body| (id.clone(), body)))
            .collect();

        let engine = (self.compile)(policy_raw, &dicts_raw)
            .map_err(|e| ReloadError::Compile(e.to_string()))?;
        let engine = Arc::new(engine);
        self.published.store(Some(Arc::clone(&engine)));
        info!(?changed, "compiled engine published");

        if let Some(on_swap) = &self.hooks.on_swap {
            on_swap(&engine, &changed);
        }
        Ok(changed)
    }
}

/// Base interval doubled per consecutive failure, capped.
fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    if failures == 0 {
        return base.min(max);
    }
    base.saturating_mul(2u32.saturating_pow(failures.min(16))).min(max)
}

fn jittered(delay: Duration) -> Duration {
    delay.mul_f64(rand::rng().random_range(0.8..1.2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestEngine {
        policy: String,
        dict_ids: Vec<String>,
    }

    struct Fixture {
        reloader: Reloader<TestEngine>,
        compiles: Arc<AtomicUsize>,
        swaps: Arc<StdMutex<Vec<Vec<String>>>>,
    }

    fn fixture(server_uri: &str, with_manifest: bool) -> Fixture {
        let compiles = Arc::new(AtomicUsize::new(0));
        let swaps: Arc<StdMutex<Vec<Vec<String>>>> = Arc::new(StdMutex::new(Vec::new()));

        let mut options = ReloaderOptions::new(format!("{server_uri}/policy"));
        // Long enough that the background task never races the test.
        options.interval = Duration::from_secs(3600);
        if with_manifest {
            options.manifest_url = Some(format!("{server_uri}/manifest"));
        }

        let swaps_hook = Arc::clone(&swaps);
        let hooks = ReloadHooks {
            on_swap: Some(Box::new(move |_, changed: &[String]| {
                swaps_hook.lock().unwrap().push(changed.to_vec());
            })),
            on_error: None,
        };

        let compile_count = Arc::clone(&compiles);
        let reloader = Reloader::new(
            options,
            move |policy: &str, dicts: &BTreeMap<String, String>| {
                compile_count.fetch_add(1, Ordering::SeqCst);
                Ok(TestEngine {
                    policy: policy.to_string(),
                    dict_ids: dicts.keys().cloned().collect(),
                })
            },
            hooks,
        );
        Fixture {
            reloader,
            compiles,
            swaps,
        }
    }

    async fn mount_policy(server: &MockServer, etag: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", etag)
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn get_compiled_before_first_tick_is_not_compiled() {
        let server = MockServer::start().await;
        let f = fixture(&server.uri(), false);
        assert!(matches!(
            f.reloader.get_compiled(),
            Err(ReloadError::NotCompiled)
        ));
    }

    #[tokio::test]
    async fn first_tick_compiles_and_publishes() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"v1\"", r#"{"defaultAction":"mask"}"#).await;

        let f = fixture(&server.uri(), false);
        f.reloader.start().await.unwrap();
        let engine = f.reloader.get_compiled().unwrap();
        assert!(engine.policy.contains("defaultAction"));
        assert_eq!(f.compiles.load(Ordering::SeqCst), 1);
        assert_eq!(f.swaps.lock().unwrap().last().unwrap(), &vec!["policy"]);
        f.reloader.stop();
    }

    #[tokio::test]
    async fn unchanged_etag_means_no_swap() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"v1\"", r#"{"defaultAction":"mask"}"#).await;

        let f = fixture(&server.uri(), false);
        f.reloader.run_once(false).await.unwrap();
        assert_eq!(f.compiles.load(Ordering::SeqCst), 1);

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/policy"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let changed = f.reloader.run_once(false).await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(f.compiles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn changed_etag_swaps_and_notifies() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"v1\"", r#"{"defaultAction":"mask"}"#).await;

        let f = fixture(&server.uri(), false);
        f.reloader.run_once(false).await.unwrap();

        server.reset().await;
        mount_policy(&server, "\"v2\"", r#"{"defaultAction":"remove"}"#).await;

        let changed = f.reloader.run_once(false).await.unwrap();
        assert_eq!(changed, vec!["policy"]);
        assert_eq!(f.compiles.load(Ordering::SeqCst), 2);
        let engine = f.reloader.get_compiled().unwrap();
        assert!(engine.policy.contains("remove"));
        assert_eq!(f.swaps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_validators_fall_back_to_the_body_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), false);
        f.reloader.run_once(false).await.unwrap();
        f.reloader.run_once(false).await.unwrap();
        // Same body twice: one compile.
        assert_eq!(f.compiles.load(Ordering::SeqCst), 1);

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"x":1}"#))
            .mount(&server)
            .await;
        f.reloader.run_once(false).await.unwrap();
        assert_eq!(f.compiles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn manifest_dictionaries_feed_the_compiler_and_removals_report() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"p1\"", "{}").await;
        let dict_url = format!("{}/dict/a", server.uri());
        Mock::given(method("GET"))
            .and(path("/manifest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"{{"dicts":[{{"id":"a","url":"{dict_url}"}}]}}"#
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dict/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"entries":[{"pattern":"ACME-\\d+","type":"acme_id","risk":"low"}]}"#),
            )
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), true);
        let changed = f.reloader.run_once(false).await.unwrap();
        assert!(changed.contains(&"policy".to_string()));
        assert!(changed.contains(&"dict:a".to_string()));
        assert_eq!(f.reloader.get_compiled().unwrap().dict_ids, vec!["a"]);

        // Dictionary dropped from the manifest: gone on the next tick.
        server.reset().await;
        mount_policy(&server, "\"p1\"", "{}").await;
        Mock::given(method("GET"))
            .and(path("/manifest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"dicts":[]}"#))
            .mount(&server)
            .await;

        let changed = f.reloader.run_once(false).await.unwrap();
        assert!(changed.contains(&"dict-removed:a".to_string()));
        assert!(f.reloader.get_compiled().unwrap().dict_ids.is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_the_published_engine() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"v1\"", r#"{"defaultAction":"mask"}"#).await;

        let f = fixture(&server.uri(), false);
        f.reloader.run_once(false).await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = f.reloader.run_once(false).await.unwrap_err();
        assert!(matches!(err, ReloadError::FetchFailed { .. }));
        // The previous engine keeps serving.
        let engine = f.reloader.get_compiled().unwrap();
        assert!(engine.policy.contains("mask"));
    }

    #[tokio::test]
    async fn forced_reload_recompiles_without_changes() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"v1\"", "{}").await;

        let f = fixture(&server.uri(), false);
        f.reloader.run_once(false).await.unwrap();
        assert_eq!(f.compiles.load(Ordering::SeqCst), 1);

        let changed = f.reloader.run_once(true).await.unwrap();
        assert!(changed.is_empty());
        assert_eq!(f.compiles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_tick_error_surfaces_but_the_task_still_runs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/policy"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let f = fixture(&server.uri(), false);
        assert!(f.reloader.start().await.is_err());

        server.reset().await;
        mount_policy(&server, "\"v1\"", "{}").await;
        f.reloader.force_reload();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.reloader.get_compiled().is_ok());
        f.reloader.stop();
    }

    #[tokio::test]
    async fn stop_halts_ticking() {
        let server = MockServer::start().await;
        mount_policy(&server, "\"v1\"", "{}").await;

        let f = fixture(&server.uri(), false);
        f.reloader.start().await.unwrap();
        f.reloader.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let settled = f.compiles.load(Ordering::SeqCst);
        f.reloader.force_reload();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(f.compiles.load(Ordering::SeqCst), settled);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(30);
        let max = Duration::from_secs(300);
        assert_eq!(backoff_delay(base, max, 0), base);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(120));
        assert_eq!(backoff_delay(base, max, 3), Duration::from_secs(240));
        assert_eq!(backoff_delay(base, max, 4), max);
        assert_eq!(backoff_delay(base, max, 60), max);
    }
}
