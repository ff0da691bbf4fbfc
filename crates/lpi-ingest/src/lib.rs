//! Single and bulk profile ingestion: cache-first lookup, optional fixtures, external
//! fetch with write-back, then reconciliation, mapping and validation.

use std::sync::Arc;

use chrono::Utc;
use lpi_core::{
    BatchResult, BatchSuccess, CandidateProfileDocument, ExternalProfile, IngestMetadata,
    IngestResult, IngestSource, SkillRepository, Validation,
};
use lpi_mapping::{FixtureCatalog, ProfileMapper, SkillReconciler};
use lpi_storage::{BatchConfig, FetchError, ProfileCache, ProfileSource};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod db;
pub mod memory;
mod persist;

pub use db::{connect_pool, PgCandidateRepository, PgSkillRepository};
pub use memory::{InMemoryCandidateRepository, InMemorySkillRepository};
pub use persist::{persist_ingested, PersistOutcome};

pub const CRATE_NAME: &str = "lpi-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no subject urls supplied")]
    EmptyBatch,
    #[error("subject url is empty")]
    EmptySubject,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("cache error: {0:#}")]
    Cache(anyhow::Error),
    #[error("skill reconciliation failed: {0:#}")]
    Skills(anyhow::Error),
    #[error("ingestion cancelled")]
    Cancelled,
}

/// Per-call switches for the resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestOptions {
    pub use_cache: bool,
    pub use_fixtures: bool,
    pub write_back: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_fixtures: false,
            write_back: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    pub batch: BatchConfig,
    pub options: IngestOptions,
}

pub struct IngestPipeline {
    config: IngestConfig,
    cache: ProfileCache,
    source: Arc<dyn ProfileSource>,
    reconciler: SkillReconciler,
    mapper: ProfileMapper,
    fixtures: FixtureCatalog,
}

impl IngestPipeline {
    pub fn new(
        cache: ProfileCache,
        source: Arc<dyn ProfileSource>,
        skills: Arc<dyn SkillRepository>,
    ) -> Self {
        Self {
            config: IngestConfig::default(),
            cache,
            source,
            reconciler: SkillReconciler::new(skills),
            mapper: ProfileMapper::new(),
            fixtures: FixtureCatalog::default(),
        }
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fixtures(mut self, fixtures: FixtureCatalog) -> Self {
        self.fixtures = fixtures;
        self
    }

    pub fn with_mapper(mut self, mapper: ProfileMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    pub fn default_options(&self) -> IngestOptions {
        self.config.options
    }

    pub async fn ingest_one(
        &self,
        subject_url: &str,
        options: IngestOptions,
    ) -> Result<IngestResult, IngestError> {
        self.ingest_one_cancellable(subject_url, options, &CancellationToken::new())
            .await
    }

    pub async fn ingest_one_cancellable(
        &self,
        subject_url: &str,
        options: IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<IngestResult, IngestError> {
        let subject_url = subject_url.trim();
        if subject_url.is_empty() {
            return Err(IngestError::EmptySubject);
        }

        let (profile, source) = match self.resolve_local(subject_url, options).await? {
            Some(found) => found,
            None => (self.fetch_remote(subject_url, options, cancel).await?, IngestSource::Api),
        };
        self.assemble(subject_url, &profile, source).await
    }

    /// Uses the pipeline's default options and a token that never fires.
    pub async fn ingest_many(&self, subject_urls: &[String]) -> Result<BatchResult, IngestError> {
        self.ingest_many_cancellable(subject_urls, self.config.options, &CancellationToken::new())
            .await
    }

    /// Fails only when there is nothing to ingest; every subject otherwise lands in
    /// exactly one of `successful` / `failed`, in input order.
    pub async fn ingest_many_cancellable(
        &self,
        subject_urls: &[String],
        options: IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, IngestError> {
        if subject_urls.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("profile_batch", %run_id, total = subject_urls.len());
        async move {
            let mut result = BatchResult::default();
            let mut resolved = Vec::new();
            let mut pending: Vec<(usize, String)> = Vec::new();

            for (index, raw) in subject_urls.iter().enumerate() {
                let subject_url = raw.trim();
                if subject_url.is_empty() {
                    result.push_failure(index, raw.clone(), IngestError::EmptySubject);
                    continue;
                }
                match self.resolve_local(subject_url, options).await {
                    Ok(Some((profile, source))) => {
                        resolved.push((index, subject_url.to_string(), profile, source))
                    }
                    Ok(None) => pending.push((index, subject_url.to_string())),
                    Err(err) => result.push_failure(index, subject_url, err),
                }
            }

            if !pending.is_empty() {
                let urls: Vec<String> = pending.iter().map(|(_, url)| url.clone()).collect();
                let outcome = self
                    .source
                    .fetch_profile_batch(&urls, &self.config.batch, cancel)
                    .await;

                for fetched in outcome.successful {
                    let index = pending[fetched.index].0;
                    if options.write_back {
                        if let Err(err) = self.cache.save(&fetched.subject_url, &fetched.profile).await {
                            result.push_failure(index, fetched.subject_url, IngestError::Cache(err));
                            continue;
                        }
                    }
                    resolved.push((index, fetched.subject_url, fetched.profile, IngestSource::Api));
                }
                for failed in outcome.failed {
                    result.push_failure(
                        pending[failed.index].0,
                        failed.subject_url,
                        IngestError::from(failed.error),
                    );
                }
            }

            for (index, subject_url, profile, source) in resolved {
                let assembled = self.assemble(&subject_url, &profile, source).await;
                match assembled {
                    Ok(ingested) => result.push_success(BatchSuccess {
                        index,
                        subject_url,
                        source: ingested.source,
                        profile: ingested.profile,
                        validation: ingested.validation,
                        warnings: ingested.warnings,
                    }),
                    Err(err) => {
                        warn!(%subject_url, error = %err, "profile assembly failed");
                        result.push_failure(index, subject_url, err);
                    }
                }
            }

            let result = result.finish();
            info!(
                successful = result.summary.successful,
                failed = result.summary.failed,
                "batch ingestion complete"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Tiers that never touch the network: fresh cache, then fixtures when enabled.
    async fn resolve_local(
        &self,
        subject_url: &str,
        options: IngestOptions,
    ) -> Result<Option<(ExternalProfile, IngestSource)>, IngestError> {
        if options.use_cache && self.cache.is_fresh(subject_url).await.map_err(IngestError::Cache)? {
            if let Some(profile) = self.cache.load(subject_url).await.map_err(IngestError::Cache)? {
                info!(%subject_url, "serving profile from cache");
                return Ok(Some((profile, IngestSource::Cache)));
            }
        }

        if options.use_fixtures {
            if let Some(profile) = self.fixtures.lookup(subject_url) {
                info!(%subject_url, "serving fixture profile");
                return Ok(Some((profile.clone(), IngestSource::Mock)));
            }
            debug!(%subject_url, "no fixture for subject");
        }

        Ok(None)
    }

    async fn fetch_remote(
        &self,
        subject_url: &str,
        options: IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<ExternalProfile, IngestError> {
        let profile = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            fetched = self.source.fetch_profile(subject_url) => fetched?,
        };
        if options.write_back {
            self.cache
                .save(subject_url, &profile)
                .await
                .map_err(IngestError::Cache)?;
        }
        Ok(profile)
    }

    async fn assemble(
        &self,
        subject_url: &str,
        profile: &ExternalProfile,
        source: IngestSource,
    ) -> Result<IngestResult, IngestError> {
        let skills = self
            .reconciler
            .resolve_skills(profile.skills.as_deref().unwrap_or_default())
            .await
            .map_err(IngestError::Skills)?;
        let mapped = self.mapper.map_to_profile(profile, subject_url, skills);
        let validation = validate(&mapped.document);
        if !validation.is_valid {
            warn!(%subject_url, errors = ?validation.errors, "mapped profile is incomplete");
        }

        Ok(IngestResult {
            success: true,
            source,
            profile: mapped.document,
            validation,
            warnings: mapped.warnings,
            metadata: IngestMetadata {
                subject_url: subject_url.to_string(),
                processed_at: Utc::now(),
                total_positions: profile.position_count(),
                total_skills: profile.skill_count(),
            },
        })
    }
}

/// Presence checks only. The document is never modified.
pub fn validate(document: &CandidateProfileDocument) -> Validation {
    let mut errors = Vec::new();
    if document.first_name.trim().is_empty() {
        errors.push("First name is required".to_string());
    }
    if document.last_name.trim().is_empty() {
        errors.push("Last name is required".to_string());
    }
    if document.email.trim().is_empty() {
        errors.push("Email is required".to_string());
    }
    if document.date_of_birth > Utc::now().date_naive() {
        errors.push("Date of birth is invalid".to_string());
    }
    Validation {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lpi_mapping::placeholder_date_of_birth;

    fn mapped(first: &str, last: &str) -> CandidateProfileDocument {
        let profile = ExternalProfile {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            ..Default::default()
        };
        ProfileMapper::new()
            .map_to_profile(&profile, "https://www.linkedin.com/in/x", Vec::new())
            .document
    }

    #[test]
    fn complete_document_is_valid() {
        let validation = validate(&mapped("Ada", "Lovelace"));
        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
    }

    #[test]
    fn missing_email_is_reported_and_document_untouched() {
        let mut document = mapped("Ada", "Lovelace");
        document.email.clear();
        let before = document.clone();

        let validation = validate(&document);
        assert!(!validation.is_valid);
        assert!(validation.errors.iter().any(|e| e.contains("Email")));
        assert_eq!(document, before);
    }

    #[test]
    fn missing_names_report_each_field() {
        let document = mapped("", "  ");
        let validation = validate(&document);
        assert_eq!(
            validation.errors,
            vec![
                "First name is required".to_string(),
                "Last name is required".to_string(),
                "Email is required".to_string(),
            ]
        );
        assert_eq!(document.date_of_birth, placeholder_date_of_birth());
    }

    #[test]
    fn options_default_to_cache_with_write_back() {
        let options: IngestOptions = serde_json::from_str(r#"{"useFixtures":true}"#).unwrap();
        assert!(options.use_cache);
        assert!(options.use_fixtures);
        assert!(options.write_back);
        assert!(!IngestOptions::default().use_fixtures);
    }
}
