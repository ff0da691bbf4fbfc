use std::path::PathBuf;
use std::time::Duration;

use lpi_ingest::{IngestConfig, IngestOptions};
use lpi_storage::{BackoffPolicy, BatchConfig, CacheConfig, ProfileApiConfig, MAX_EXPIRATION_DAYS};

const DEFAULT_API_HOST: &str = "linkedin-data-api.p.rapidapi.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ProfileApiConfig,
    pub cache: CacheConfig,
    pub ingest: IngestConfig,
    pub fixtures_dir: PathBuf,
    pub database_url: Option<String>,
    pub web_port: u16,
    pub log_json: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        let api_host = var("LPI_API_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string());
        let api = ProfileApiConfig {
            base_url: var("LPI_API_BASE_URL").unwrap_or_else(|| format!("https://{api_host}")),
            api_key: var("LPI_API_KEY"),
            timeout: Duration::from_secs(parsed("LPI_HTTP_TIMEOUT_SECS").unwrap_or(30)),
            user_agent: Some(format!("lpi-cli/{}", env!("CARGO_PKG_VERSION"))),
            backoff: BackoffPolicy {
                max_retries: parsed("LPI_MAX_RETRIES").unwrap_or(0) as usize,
                ..Default::default()
            },
            api_host,
        };

        let cache = CacheConfig {
            root: var("LPI_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./cache/linkedin")),
            expiration_days: parsed("LPI_CACHE_EXPIRATION_DAYS")
                .map(|v| u32::try_from(v).unwrap_or(u32::MAX).min(MAX_EXPIRATION_DAYS))
                .unwrap_or(7),
        };

        let ingest = IngestConfig {
            batch: BatchConfig {
                batch_size: parsed("LPI_BATCH_SIZE").unwrap_or(5).max(1) as usize,
                inter_batch_delay: Duration::from_millis(parsed("LPI_BATCH_DELAY_MS").unwrap_or(1000)),
            },
            options: IngestOptions::default(),
        };

        Self {
            api,
            cache,
            ingest,
            fixtures_dir: var("LPI_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./fixtures/profiles")),
            database_url: var("DATABASE_URL"),
            web_port: parsed("LPI_WEB_PORT")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(8000),
            log_json: var("LPI_LOG_JSON")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
        }
    }
}
