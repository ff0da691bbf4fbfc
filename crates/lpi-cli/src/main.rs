use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lpi_core::{extract_subject_key, CandidateRepository, SkillRepository};
use lpi_ingest::{
    connect_pool, persist_ingested, InMemoryCandidateRepository, InMemorySkillRepository,
    IngestOptions, IngestPipeline, PgCandidateRepository, PgSkillRepository,
};
use lpi_mapping::FixtureCatalog;
use lpi_storage::{ProfileApiClient, ProfileCache};
use lpi_web::AppState;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "lpi-cli")]
#[command(about = "LinkedIn profile ingestion command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a single profile and print the result as JSON
    Ingest(IngestArgs),
    /// Ingest many profiles in rate-limited batches
    Batch(BatchArgs),
    /// Show cache entries and freshness for a subject
    CacheStatus { subject_url: String },
    /// Serve the JSON API
    Serve,
}

#[derive(Debug, Args)]
struct IngestArgs {
    subject_url: String,
    /// Serve from the fixture catalog when it has the subject
    #[arg(long)]
    fixtures: bool,
    /// Skip the cache lookup
    #[arg(long)]
    no_cache: bool,
    /// Create missing skills and insert the candidate
    #[arg(long)]
    persist: bool,
}

#[derive(Debug, Args)]
struct BatchArgs {
    subject_urls: Vec<String>,
    /// Newline-separated subject URLs; blank lines and `#` comments are ignored
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    persist: bool,
}

struct Repositories {
    skills: Arc<dyn SkillRepository>,
    candidates: Arc<dyn CandidateRepository>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();
    init_tracing(config.log_json);

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest(args) => {
            let repos = repositories(&config).await?;
            let pipeline = build_pipeline(&config, &repos)?;
            let options = IngestOptions {
                use_cache: !args.no_cache,
                use_fixtures: args.fixtures,
                ..pipeline.default_options()
            };
            let mut result = pipeline.ingest_one(&args.subject_url, options).await?;
            let persisted = if args.persist {
                let outcome =
                    persist_ingested(repos.skills.as_ref(), repos.candidates.as_ref(), &mut result.profile)
                        .await?;
                Some(outcome)
            } else {
                None
            };
            print_json(&json!({ "result": result, "persisted": persisted }))?;
        }
        Commands::Batch(args) => {
            let repos = repositories(&config).await?;
            let pipeline = build_pipeline(&config, &repos)?;
            let mut subject_urls = args.subject_urls;
            if let Some(path) = &args.file {
                subject_urls.extend(read_subject_file(path).await?);
            }

            let mut result = pipeline.ingest_many(&subject_urls).await?;
            let mut persisted = Vec::new();
            if args.persist {
                for success in &mut result.successful {
                    let outcome = persist_ingested(
                        repos.skills.as_ref(),
                        repos.candidates.as_ref(),
                        &mut success.profile,
                    )
                    .await;
                    match outcome {
                        Ok(outcome) => persisted.push(json!({
                            "subjectUrl": success.subject_url,
                            "candidateId": outcome.candidate_id,
                        })),
                        Err(err) => {
                            let error = format!("{err:#}");
                            warn!(subject_url = %success.subject_url, %error, "persist failed");
                            persisted.push(json!({ "subjectUrl": success.subject_url, "error": error }));
                        }
                    }
                }
            }
            print_json(&json!({ "result": result, "persisted": persisted }))?;
        }
        Commands::CacheStatus { subject_url } => {
            let cache = ProfileCache::new(config.cache.clone());
            let fresh = cache.is_fresh(&subject_url).await?;
            let entries = cache
                .list_entries(&subject_url)
                .await?
                .into_iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>();
            print_json(&json!({
                "subjectUrl": subject_url,
                "subjectKey": extract_subject_key(&subject_url),
                "fresh": fresh,
                "entries": entries,
            }))?;
        }
        Commands::Serve => {
            let repos = repositories(&config).await?;
            let pipeline = build_pipeline(&config, &repos)?;
            info!(port = config.web_port, "starting lpi web server");
            lpi_web::serve(config.web_port, AppState::new(pipeline)).await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn repositories(config: &AppConfig) -> Result<Repositories> {
    match &config.database_url {
        Some(url) => {
            let pool = connect_pool(url).await?;
            Ok(Repositories {
                skills: Arc::new(PgSkillRepository::new(pool.clone())),
                candidates: Arc::new(PgCandidateRepository::new(pool)),
            })
        }
        None => {
            info!("DATABASE_URL unset; using in-memory repositories");
            Ok(Repositories {
                skills: Arc::new(InMemorySkillRepository::new()),
                candidates: Arc::new(InMemoryCandidateRepository::new()),
            })
        }
    }
}

fn build_pipeline(config: &AppConfig, repos: &Repositories) -> Result<IngestPipeline> {
    let client = ProfileApiClient::new(config.api.clone())?;
    let fixtures = if config.fixtures_dir.join("catalog.yaml").exists() {
        FixtureCatalog::load(&config.fixtures_dir)?
    } else {
        warn!(dir = %config.fixtures_dir.display(), "no fixture catalog found");
        FixtureCatalog::default()
    };

    Ok(IngestPipeline::new(
        ProfileCache::new(config.cache.clone()),
        Arc::new(client),
        repos.skills.clone(),
    )
    .with_config(config.ingest.clone())
    .with_fixtures(fixtures))
}

async fn read_subject_file(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serializing output")?;
    println!("{text}");
    Ok(())
}
