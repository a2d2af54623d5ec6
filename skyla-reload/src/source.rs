//! Conditional source fetching.
//!
//! Each remote source (policy, manifest, every dictionary) keeps a
//! [`SourceMeta`] with its cache validators and last body. Fetches send
//! `if-none-match` / `if-modified-since` from the stored meta and treat
//! 304 as unchanged. Servers that supply no validator get a weak etag
//! synthesized from the body hash, so change detection stays stable
//! either way.
//!
//! `file://` sources are hardened: symlinks are resolved, the real path
//! must sit under the configured base directory, only regular files are
//! read, a size ceiling applies, and URLs carrying a query, fragment, or
//! non-allowlisted host are rejected.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, PRAGMA};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::error::ReloadError;

/// Cache validators and last-seen content for one source URL.
#[derive(Debug, Clone, Default)]
pub struct SourceMeta {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Option<String>,
    pub json: Option<serde_json::Value>,
}

/// Result of one conditional fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    Unchanged,
    Changed(SourceMeta),
}

/// Shared fetch machinery for http(s) and file sources.
pub struct SourceClient {
    http: reqwest::Client,
    /// Base directory file sources must resolve under; file scheme is
    /// rejected entirely when unset.
    base_dir: Option<PathBuf>,
    /// Hostnames permitted in `file://host/...` URLs.
    allow_hosts: Vec<String>,
    max_bytes: u64,
}

impl SourceClient {
    pub fn new(base_dir: Option<PathBuf>, allow_hosts: Vec<String>, max_bytes: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_dir,
            allow_hosts,
            max_bytes,
        }
    }

    /// Fetch one source conditionally. `bust` forces a full fetch with
    /// cache-busting (`_bust` query parameter, `pragma: no-cache`).
    pub async fn fetch(
        &self,
        url: &str,
        prior: Option<&SourceMeta>,
        bust: bool,
    ) -> Result<FetchOutcome, ReloadError> {
        let parsed = Url::parse(url).map_err(|e| ReloadError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => self.fetch_http(parsed, prior, bust).await,
            "file" => self.fetch_file(parsed, prior).await,
            other => Err(ReloadError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {url}"
            ))),
        }
    }

    async fn fetch_http(
        &self,
        mut url: Url,
        prior: Option<&SourceMeta>,
        bust: bool,
    ) -> Result<FetchOutcome, ReloadError> {
        let display_url = url.to_string();
        if bust {
            let epoch_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            url.query_pairs_mut()
                .append_pair("_bust", &epoch_ms.to_string());
        }

        let mut request = self.http.get(url).header(CACHE_CONTROL, "no-cache");
        if bust {
            request = request.header(PRAGMA, "no-cache");
        } else if let Some(prior) = prior {
            if let Some(etag) = &prior.etag {
                request = request.header(IF_NONE_MATCH, etag);
            } else if let Some(last_modified) = &prior.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReloadError::fetch(&display_url, e))?;

        match response.status().as_u16() {
            304 => Ok(FetchOutcome::Unchanged),
            200 => {
                let etag = header_string(response.headers(), ETAG);
                let last_modified = header_string(response.headers(), LAST_MODIFIED);
                let body = response
                    .text()
                    .await
                    .map_err(|e| ReloadError::fetch(&display_url, e))?;
                let etag = etag.unwrap_or_else(|| weak_etag(&body));

                // Servers without validators still get stable change
                // detection through the synthesized etag.
                if let Some(prior) = prior {
                    if prior.etag.as_deref() == Some(etag.as_str()) {
                        debug!(url = %display_url, "body hash unchanged");
                        return Ok(FetchOutcome::Unchanged);
                    }
                }

                let json = serde_json::from_str(&body).ok();
                Ok(FetchOutcome::Changed(SourceMeta {
                    etag: Some(etag),
                    last_modified,
                    body: Some(body),
                    json,
                }))
            }
            status => Err(ReloadError::fetch(
                &display_url,
                format!("unexpected status {status}"),
            )),
        }
    }

    async fn fetch_file(
        &self,
        url: Url,
        prior: Option<&SourceMeta>,
    ) -> Result<FetchOutcome, ReloadError> {
        let display_url = url.to_string();
        if url.query().is_some() || url.fragment().is_some() {
            return Err(ReloadError::InvalidUrl(format!(
                "file url must not carry query or fragment: {display_url}"
            )));
        }
        if let Some(host) = url.host_str() {
            let local = host.is_empty() || host.eq_ignore_ascii_case("localhost");
            if !local && !self.allow_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
                return Err(ReloadError::InvalidUrl(format!(
                    "file url host '{host}' is not allowlisted"
                )));
            }
        }
        let base = self
            .base_dir
            .as_deref()
            .ok_or_else(|| ReloadError::InvalidUrl("file scheme is not enabled".to_string()))?;
        // Allowlisted hosts still resolve against the local filesystem;
        // strip the host so path conversion succeeds.
        let mut local_url = url.clone();
        let _ = local_url.set_host(None);
        let path = local_url
            .to_file_path()
            .map_err(|_| ReloadError::InvalidUrl(format!("not a file path: {display_url}")))?;

        let real = canonicalized(&display_url, &path).await?;
        let real_base = canonicalized(&display_url, base).await?;
        if !real.starts_with(&real_base) {
            return Err(ReloadError::AccessOutsideBase(real));
        }

        let metadata = tokio::fs::metadata(&real)
            .await
            .map_err(|e| ReloadError::fetch(&display_url, e))?;
        if !metadata.is_file() {
            return Err(ReloadError::fetch(&display_url, "not a regular file"));
        }
        if metadata.len() > self.max_bytes {
            return Err(ReloadError::FileTooLarge {
                path: real,
                limit: self.max_bytes,
            });
        }

        let body = tokio::fs::read_to_string(&real)
            .await
            .map_err(|e| ReloadError::fetch(&display_url, e))?;
        let etag = weak_etag(&body);
        if let Some(prior) = prior {
            if prior.etag.as_deref() == Some(etag.as_str()) {
                return Ok(FetchOutcome::Unchanged);
            }
        }

        let last_modified = metadata.modified().ok().map(httpdate::fmt_http_date);
        let json = serde_json::from_str(&body).ok();
        Ok(FetchOutcome::Changed(SourceMeta {
            etag: Some(etag),
            last_modified,
            body: Some(body),
            json,
        }))
    }
}

async fn canonicalized(url: &str, path: &Path) -> Result<PathBuf, ReloadError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| ReloadError::fetch(url, format!("{}: {e}", path.display())))
}

fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `W/"sha256:<hex>"` over the body, the validator of last resort.
pub fn weak_etag(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    format!("W/\"sha256:{}\"", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: Option<PathBuf>) -> SourceClient {
        SourceClient::new(base, Vec::new(), 1024)
    }

    #[test]
    fn weak_etag_is_stable_and_content_sensitive() {
        assert_eq!(weak_etag("body"), weak_etag("body"));
        assert_ne!(weak_etag("body"), weak_etag("other"));
        assert!(weak_etag("body").starts_with("W/\"sha256:"));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let c = client(None);
        assert!(matches!(
            c.fetch("ftp://example.com/policy", None, false).await,
            Err(ReloadError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn file_url_with_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let c = client(Some(dir.path().to_path_buf()));
        let url = format!("file://{}/p.json?x=1", dir.path().display());
        assert!(matches!(
            c.fetch(&url, None, false).await,
            Err(ReloadError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn file_reads_inside_the_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        tokio::fs::write(&path, r#"{"defaultAction":"mask"}"#)
            .await
            .unwrap();
        let c = client(Some(dir.path().to_path_buf()));
        let url = format!("file://{}", path.display());

        let outcome = c.fetch(&url, None, false).await.unwrap();
        let meta = match outcome {
            FetchOutcome::Changed(meta) => meta,
            FetchOutcome::Unchanged => panic!("first fetch must produce content"),
        };
        assert!(meta.json.is_some());
        assert!(meta.etag.as_deref().unwrap().starts_with("W/\"sha256:"));
        assert!(meta.last_modified.is_some());

        // Second fetch with the stored meta detects no change.
        let outcome = c.fetch(&url, Some(&meta), false).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Unchanged));
    }

    #[tokio::test]
    async fn symlink_escaping_the_base_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.json");
        tokio::fs::write(&secret, "{}").await.unwrap();
        let link = base.path().join("link.json");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let c = client(Some(base.path().to_path_buf()));
        let url = format!("file://{}", link.display());
        assert!(matches!(
            c.fetch(&url, None, false).await,
            Err(ReloadError::AccessOutsideBase(_))
        ));
    }

    #[tokio::test]
    async fn oversized_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.json");
        tokio::fs::write(&path, "x".repeat(4096)).await.unwrap();
        let c = client(Some(dir.path().to_path_buf()));
        let url = format!("file://{}", path.display());
        assert!(matches!(
            c.fetch(&url, None, false).await,
            Err(ReloadError::FileTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn file_scheme_requires_a_base_dir() {
        let c = client(None);
        assert!(matches!(
            c.fetch("file:///etc/passwd", None, false).await,
            Err(ReloadError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn directories_are_not_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        tokio::fs::create_dir(&sub).await.unwrap();
        let c = client(Some(dir.path().to_path_buf()));
        let url = format!("file://{}", sub.display());
        assert!(matches!(
            c.fetch(&url, None, false).await,
            Err(ReloadError::FetchFailed { .. })
        ));
    }
}
