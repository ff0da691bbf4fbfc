//! Dated profile cache + external profile API client for LPI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use lpi_core::{extract_subject_key, ExternalProfile};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lpi-storage";

/// Upper bound on the cache expiration window; larger configured values are clamped.
pub const MAX_EXPIRATION_DAYS: u32 = 3650;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub expiration_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./cache/linkedin"),
            expiration_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub source_url: String,
    pub subject_key: String,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// On-disk cache document: one per subject per calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    pub metadata: CacheMetadata,
    pub profile_data: ExternalProfile,
}

/// File-per-subject-per-day profile cache. Freshness is decided by the embedded
/// `expiresAt`, not by file modification time.
#[derive(Debug, Clone)]
pub struct ProfileCache {
    root: PathBuf,
    expiration: chrono::Duration,
}

impl ProfileCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            root: config.root,
            expiration: chrono::Duration::days(i64::from(config.expiration_days.min(MAX_EXPIRATION_DAYS))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_file_name(subject_key: &str, date: NaiveDate) -> String {
        format!("{subject_key}_{}.json", date.format("%Y-%m-%d"))
    }

    pub fn entry_path(&self, subject_url: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(Self::entry_file_name(&extract_subject_key(subject_url), date))
    }

    pub async fn save(&self, subject_url: &str, data: &ExternalProfile) -> anyhow::Result<CachedEntry> {
        self.save_at(subject_url, data, Utc::now()).await
    }

    /// Write (or overwrite) the entry for `fetched_at`'s calendar day via temp-file rename.
    pub async fn save_at(
        &self,
        subject_url: &str,
        data: &ExternalProfile,
        fetched_at: DateTime<Utc>,
    ) -> anyhow::Result<CachedEntry> {
        let subject_key = extract_subject_key(subject_url);
        let entry = CachedEntry {
            metadata: CacheMetadata {
                source_url: subject_url.to_string(),
                subject_key: subject_key.clone(),
                fetched_at,
                expires_at: fetched_at
                    .checked_add_signed(self.expiration)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
            profile_data: data.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&entry).context("serializing cache entry")?;

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating cache directory {}", self.root.display()))?;

        let path = self
            .root
            .join(Self::entry_file_name(&subject_key, fetched_at.date_naive()));
        let temp_path = self.root.join(format!(".{}.{}.tmp", subject_key, Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp cache file {}", temp_path.display()))?;
        let written = async {
            file.write_all(&bytes).await?;
            file.flush().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| format!("writing temp cache file {}", temp_path.display()));
        }

        if let Err(err) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!("renaming temp cache file {} -> {}", temp_path.display(), path.display())
            });
        }

        debug!(subject_key = %subject_key, path = %path.display(), "cached profile");
        Ok(entry)
    }

    /// Today's cached profile data, or `None` on a miss.
    pub async fn load(&self, subject_url: &str) -> anyhow::Result<Option<ExternalProfile>> {
        Ok(self
            .load_entry(subject_url, Utc::now().date_naive())
            .await?
            .map(|entry| entry.profile_data))
    }

    pub async fn load_entry(&self, subject_url: &str, date: NaiveDate) -> anyhow::Result<Option<CachedEntry>> {
        let path = self.entry_path(subject_url, date);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("reading cache file {}", path.display())),
        };
        let entry = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing cache file {}", path.display()))?;
        Ok(Some(entry))
    }

    pub async fn is_fresh(&self, subject_url: &str) -> anyhow::Result<bool> {
        self.is_fresh_at(subject_url, Utc::now()).await
    }

    pub async fn is_fresh_at(&self, subject_url: &str, now: DateTime<Utc>) -> anyhow::Result<bool> {
        match self.load_entry(subject_url, now.date_naive()).await? {
            None => {
                info!(subject_url, "no cached profile for today");
                Ok(false)
            }
            Some(entry) if now <= entry.metadata.expires_at => Ok(true),
            Some(entry) => {
                info!(
                    subject_url,
                    expires_at = %entry.metadata.expires_at,
                    "cached profile expired"
                );
                Ok(false)
            }
        }
    }

    /// Every dated entry on disk for the subject, oldest first. Stale entries are kept.
    pub async fn list_entries(&self, subject_url: &str) -> anyhow::Result<Vec<PathBuf>> {
        let prefix = format!("{}_", extract_subject_key(subject_url));
        let is_dated_entry = |name: &str| {
            name.strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .is_some_and(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok())
        };
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("reading cache directory {}", self.root.display()))
            }
        };

        let mut out = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("listing cache directory {}", self.root.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_dated_entry(&name) {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited by profile API for {url}")]
    RateLimited {
        url: String,
        retry_after_secs: Option<u64>,
    },
    #[error("profile not found: {url}")]
    NotFound { url: String },
    #[error("access denied (http {status}) for {url}")]
    AccessDenied { status: u16, url: String },
    #[error("request timed out for {url}")]
    Timeout { url: String },
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid request for {url}: {message}")]
    InvalidRequest { url: String, message: String },
    #[error("undecodable response for {url}: {message}")]
    Decode { url: String, message: String },
    #[error("fetch cancelled for {url}")]
    Cancelled { url: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
            Self::HttpStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }

    fn from_transport(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { url: url.to_string() }
        } else {
            Self::Network {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

pub fn classify_status(status: StatusCode, url: &str, retry_after_secs: Option<u64>) -> FetchError {
    let url = url.to_string();
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { url, retry_after_secs },
        StatusCode::NOT_FOUND => FetchError::NotFound { url },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::AccessDenied {
            status: status.as_u16(),
            url,
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchError::Timeout { url },
        _ => FetchError::HttpStatus {
            status: status.as_u16(),
            url,
        },
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// `Retry-After` wins over the exponential schedule, both capped at `max_delay`.
    pub fn delay_for_error(&self, attempt_index: usize, err: &FetchError) -> Duration {
        match err {
            FetchError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Duration::from_secs(*secs).min(self.max_delay),
            _ => self.delay_for_attempt(attempt_index),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProfileApiConfig {
    pub base_url: String,
    pub api_host: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for ProfileApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://linkedin-data-api.p.rapidapi.com".to_string(),
            api_host: "linkedin-data-api.p.rapidapi.com".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            inter_batch_delay: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
pub struct FetchedProfile {
    pub index: usize,
    pub subject_url: String,
    pub profile: ExternalProfile,
}

#[derive(Debug)]
pub struct FailedFetch {
    pub index: usize,
    pub subject_url: String,
    pub error: FetchError,
}

#[derive(Debug, Default)]
pub struct BatchFetchOutcome {
    pub successful: Vec<FetchedProfile>,
    pub failed: Vec<FailedFetch>,
}

/// Anything that can produce an external profile for a subject URL.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, subject_url: &str) -> Result<ExternalProfile, FetchError>;

    async fn fetch_profile_batch(
        &self,
        subject_urls: &[String],
        config: &BatchConfig,
        cancel: &CancellationToken,
    ) -> BatchFetchOutcome {
        fetch_in_batches(self, subject_urls, config, cancel).await
    }
}

/// Fetch fixed-size batches concurrently, sleeping between batches (not after the last).
/// Every subject yields exactly one outcome; subjects not started before cancellation
/// are recorded as `Cancelled`.
pub async fn fetch_in_batches<S: ProfileSource + ?Sized>(
    source: &S,
    subject_urls: &[String],
    config: &BatchConfig,
    cancel: &CancellationToken,
) -> BatchFetchOutcome {
    let batch_size = config.batch_size.max(1);
    let total_batches = subject_urls.len().div_ceil(batch_size);
    let mut outcome = BatchFetchOutcome::default();

    for (batch_index, chunk) in subject_urls.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;

        if cancel.is_cancelled() {
            for (i, url) in chunk.iter().enumerate() {
                outcome.failed.push(FailedFetch {
                    index: offset + i,
                    subject_url: url.clone(),
                    error: FetchError::Cancelled { url: url.clone() },
                });
            }
            continue;
        }

        info!(
            batch = batch_index + 1,
            total_batches,
            size = chunk.len(),
            "fetching profile batch"
        );

        let settled = join_all(chunk.iter().map(|url| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled { url: url.clone() }),
                result = source.fetch_profile(url) => result,
            }
        }))
        .await;

        for (i, (url, result)) in chunk.iter().zip(settled).enumerate() {
            match result {
                Ok(profile) => outcome.successful.push(FetchedProfile {
                    index: offset + i,
                    subject_url: url.clone(),
                    profile,
                }),
                Err(error) => {
                    warn!(subject_url = %url, %error, "profile fetch failed");
                    outcome.failed.push(FailedFetch {
                        index: offset + i,
                        subject_url: url.clone(),
                        error,
                    });
                }
            }
        }

        if batch_index + 1 < total_batches && !config.inter_batch_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(config.inter_batch_delay) => {}
            }
        }
    }

    info!(
        successful = outcome.successful.len(),
        failed = outcome.failed.len(),
        "profile batch fetch complete"
    );
    outcome
}

/// reqwest-backed client for the third-party profile API.
#[derive(Debug, Clone)]
pub struct ProfileApiClient {
    client: reqwest::Client,
    base_url: String,
    api_host: String,
    api_key: Option<String>,
    backoff: BackoffPolicy,
}

impl ProfileApiClient {
    pub fn new(config: ProfileApiConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_host: config.api_host,
            api_key: config.api_key.filter(|k| !k.trim().is_empty()),
            backoff: config.backoff,
        })
    }

    pub fn request_url(&self, subject_url: &str) -> Result<reqwest::Url, FetchError> {
        if subject_url.trim().is_empty() {
            return Err(FetchError::InvalidRequest {
                url: subject_url.to_string(),
                message: "subject url is empty".to_string(),
            });
        }
        reqwest::Url::parse_with_params(
            &format!("{}/get-profile-data-by-url", self.base_url),
            &[("url", subject_url.trim())],
        )
        .map_err(|e| FetchError::InvalidRequest {
            url: subject_url.to_string(),
            message: e.to_string(),
        })
    }

    async fn fetch_once(&self, request_url: &reqwest::Url, subject_url: &str) -> Result<ExternalProfile, FetchError> {
        let mut request = self
            .client
            .get(request_url.clone())
            .header("x-rapidapi-host", &self.api_host);
        if let Some(key) = &self.api_key {
            request = request.header("x-rapidapi-key", key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| FetchError::from_transport(subject_url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(classify_status(status, subject_url, retry_after));
        }

        let body: JsonValue = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: subject_url.to_string(),
                }
            } else {
                FetchError::Decode {
                    url: subject_url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        Ok(ExternalProfile::from_json(&body))
    }
}

#[async_trait]
impl ProfileSource for ProfileApiClient {
    async fn fetch_profile(&self, subject_url: &str) -> Result<ExternalProfile, FetchError> {
        let request_url = self.request_url(subject_url)?;
        let span = info_span!("profile_fetch", url = subject_url);

        async {
            let mut attempt = 0usize;
            loop {
                match self.fetch_once(&request_url, subject_url).await {
                    Ok(profile) => {
                        info!(
                            positions = profile.position_count(),
                            skills = profile.skill_count(),
                            "fetched profile"
                        );
                        return Ok(profile);
                    }
                    Err(err) if err.is_retryable() && attempt < self.backoff.max_retries => {
                        let delay = self.backoff.delay_for_error(attempt, &err);
                        warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "retrying profile fetch");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).expect("ts").with_timezone(&Utc)
    }

    fn sample_profile() -> ExternalProfile {
        ExternalProfile {
            first_name: Some("Satya".into()),
            last_name: Some("Nadella".into()),
            skills: Some(vec![lpi_core::ExternalSkill {
                name: Some("Leadership".into()),
                passed_skill_assessment: Some(true),
                endorsements_count: Some(150),
            }]),
            ..Default::default()
        }
    }

    const URL: &str = "https://www.linkedin.com/in/satyanadella/";

    #[test]
    fn entry_file_name_embeds_subject_and_date() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 24).unwrap();
        assert_eq!(
            ProfileCache::entry_file_name("satyanadella", date),
            "satyanadella_2026-02-24.json"
        );
    }

    #[tokio::test]
    async fn freshness_flips_after_save_and_roundtrips_data() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().join("cache"),
            expiration_days: 7,
        });

        assert!(!cache.is_fresh(URL).await.unwrap());
        assert!(cache.load(URL).await.unwrap().is_none());

        let saved = cache.save(URL, &sample_profile()).await.unwrap();
        assert_eq!(saved.metadata.subject_key, "satyanadella");
        assert_eq!(
            saved.metadata.expires_at - saved.metadata.fetched_at,
            chrono::Duration::days(7)
        );

        assert!(cache.is_fresh(URL).await.unwrap());
        assert_eq!(cache.load(URL).await.unwrap(), Some(sample_profile()));
    }

    #[tokio::test]
    async fn freshness_follows_embedded_expiry() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 0,
        });
        let fetched_at = ts("2026-02-24T12:00:00Z");
        cache.save_at(URL, &sample_profile(), fetched_at).await.unwrap();

        assert!(cache.is_fresh_at(URL, fetched_at).await.unwrap());
        assert!(!cache
            .is_fresh_at(URL, ts("2026-02-24T12:00:01Z"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn same_day_writes_collapse_and_new_day_adds_entry() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 7,
        });

        cache.save_at(URL, &ExternalProfile::default(), ts("2026-02-24T08:00:00Z")).await.unwrap();
        cache.save_at(URL, &sample_profile(), ts("2026-02-24T17:00:00Z")).await.unwrap();
        assert_eq!(cache.list_entries(URL).await.unwrap().len(), 1);

        let day = NaiveDate::from_ymd_opt(2026, 2, 24).unwrap();
        let entry = cache.load_entry(URL, day).await.unwrap().unwrap();
        assert_eq!(entry.profile_data, sample_profile());

        cache.save_at(URL, &sample_profile(), ts("2026-02-25T09:00:00Z")).await.unwrap();
        let entries = cache.list_entries(URL).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("satyanadella_2026-02-24.json"));
    }

    #[tokio::test]
    async fn corrupt_entry_propagates_instead_of_missing() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 7,
        });
        let path = cache.entry_path(URL, Utc::now().date_naive());
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(cache.load(URL).await.is_err());
        assert!(cache.is_fresh(URL).await.is_err());
    }

    #[test]
    fn status_classification_distinguishes_transport_outcomes() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, URL, Some(3)),
            FetchError::RateLimited { retry_after_secs: Some(3), .. }
        ));
        assert!(matches!(classify_status(StatusCode::NOT_FOUND, URL, None), FetchError::NotFound { .. }));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, URL, None),
            FetchError::AccessDenied { status: 403, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, URL, None),
            FetchError::Timeout { .. }
        ));

        let server = classify_status(StatusCode::BAD_GATEWAY, URL, None);
        assert!(server.is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, URL, None).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, URL, None).is_retryable());
    }

    #[test]
    fn backoff_logic_is_exponential_capped_and_honours_retry_after() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));

        let limited = FetchError::RateLimited {
            url: URL.into(),
            retry_after_secs: Some(60),
        };
        assert_eq!(policy.delay_for_error(0, &limited), Duration::from_millis(350));
    }

    #[test]
    fn request_url_encodes_subject_as_query_param() {
        let client = ProfileApiClient::new(ProfileApiConfig {
            base_url: "https://api.example.test/".into(),
            ..Default::default()
        })
        .unwrap();
        let url = client.request_url(URL).unwrap();
        assert_eq!(url.path(), "/get-profile-data-by-url");
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, "url");
        assert_eq!(value, URL);

        assert!(matches!(client.request_url("  "), Err(FetchError::InvalidRequest { .. })));
    }

    struct StubSource {
        missing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(missing: &[&str]) -> Self {
            Self {
                missing: missing.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProfileSource for StubSource {
        async fn fetch_profile(&self, subject_url: &str) -> Result<ExternalProfile, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.missing.contains(subject_url) {
                return Err(FetchError::NotFound {
                    url: subject_url.to_string(),
                });
            }
            Ok(ExternalProfile {
                username: Some(subject_url.to_string()),
                ..Default::default()
            })
        }
    }

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn batch_fetch_isolates_failures_per_subject() {
        let source = StubSource::new(&["urlB", "urlD"]);
        let config = BatchConfig {
            batch_size: 2,
            inter_batch_delay: Duration::ZERO,
        };
        let outcome = source
            .fetch_profile_batch(&urls(&["urlA", "urlB", "urlC", "urlD", "urlE"]), &config, &CancellationToken::new())
            .await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
        let ok: Vec<_> = outcome.successful.iter().map(|s| (s.index, s.subject_url.as_str())).collect();
        assert_eq!(ok, vec![(0, "urlA"), (2, "urlC"), (4, "urlE")]);
        let failed: Vec<_> = outcome.failed.iter().map(|f| f.subject_url.as_str()).collect();
        assert_eq!(failed, vec!["urlB", "urlD"]);
        assert!(matches!(outcome.failed[0].error, FetchError::NotFound { .. }));
    }

    struct SlowSource {
        latency: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ProfileSource for SlowSource {
        async fn fetch_profile(&self, _subject_url: &str) -> Result<ExternalProfile, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ExternalProfile::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_fetch_runs_each_batch_concurrently_and_waits_between_batches_only() {
        let source = SlowSource {
            latency: Duration::from_millis(100),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let config = BatchConfig {
            batch_size: 2,
            inter_batch_delay: Duration::from_millis(40),
        };

        let started = tokio::time::Instant::now();
        let outcome = source
            .fetch_profile_batch(&urls(&["urlA", "urlB", "urlC", "urlD", "urlE"]), &config, &CancellationToken::new())
            .await;

        // three batches of one fetch latency each, two gaps, no trailing gap
        assert_eq!(started.elapsed(), Duration::from_millis(3 * 100 + 2 * 40));
        assert_eq!(source.peak.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.successful.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn single_batch_has_no_delay() {
        let source = StubSource::new(&[]);
        let config = BatchConfig {
            batch_size: 5,
            inter_batch_delay: Duration::from_secs(10),
        };

        let started = tokio::time::Instant::now();
        source
            .fetch_profile_batch(&urls(&["urlA", "urlB"]), &config, &CancellationToken::new())
            .await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn oversized_expiration_is_clamped_instead_of_overflowing() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 100_000_000,
        });
        let fetched_at = ts("2026-02-24T12:00:00Z");
        let saved = cache.save_at(URL, &ExternalProfile::default(), fetched_at).await.unwrap();
        assert_eq!(
            saved.metadata.expires_at - fetched_at,
            chrono::Duration::days(i64::from(MAX_EXPIRATION_DAYS))
        );
        assert!(cache.is_fresh_at(URL, fetched_at).await.unwrap());

        let near_end = DateTime::<Utc>::MAX_UTC - chrono::Duration::days(1);
        let saved = cache.save_at(URL, &ExternalProfile::default(), near_end).await.unwrap();
        assert_eq!(saved.metadata.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[tokio::test]
    async fn subjects_with_similar_slugs_get_separate_entries() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 7,
        });
        let dotted = "https://www.linkedin.com/in/jane.doe";
        let dashed = "https://www.linkedin.com/in/jane-doe";
        let alice = ExternalProfile {
            first_name: Some("Alice".into()),
            ..Default::default()
        };
        cache.save(dotted, &alice).await.unwrap();

        assert!(!cache.is_fresh(dashed).await.unwrap());
        assert!(cache.load(dashed).await.unwrap().is_none());
        assert!(cache.list_entries(dashed).await.unwrap().is_empty());
        assert_eq!(cache.load(dotted).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn listing_ignores_keys_that_share_a_prefix() {
        let dir = tempdir().expect("tempdir");
        let cache = ProfileCache::new(CacheConfig {
            root: dir.path().to_path_buf(),
            expiration_days: 7,
        });
        cache.save("https://www.linkedin.com/in/jane_doe", &ExternalProfile::default()).await.unwrap();
        cache.save("https://www.linkedin.com/in/jane", &ExternalProfile::default()).await.unwrap();

        assert_eq!(cache.list_entries("https://www.linkedin.com/in/jane").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_batch_records_every_subject_as_failed() {
        let source = StubSource::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = source
            .fetch_profile_batch(&urls(&["urlA", "urlB", "urlC"]), &BatchConfig::default(), &cancel)
            .await;

        assert!(outcome.successful.is_empty());
        assert_eq!(outcome.failed.len(), 3);
        assert!(outcome
            .failed
            .iter()
            .all(|f| matches!(f.error, FetchError::Cancelled { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
