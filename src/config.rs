use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::env;

/// Which storage client the tour talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// SQLite metadata plus payloads on local disk.
    Local,
    /// The AWS SDK against S3 or an S3-compatible endpoint.
    S3,
}

/// What the binary should do once the store is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Tour,
    Purge(String),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendKind,
    /// `None` lets the S3 client fall back to its provider chain.
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub storage_dir: String,
    pub database_url: String,
    pub scratch_dir: String,
    pub first_prefix: String,
    pub second_prefix: String,
    pub versioning: bool,
    pub keep_scratch: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Guided tour of an object-storage API")]
pub struct Args {
    /// Storage backend (overrides BUCKET_TOUR_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Region for new buckets (overrides BUCKET_TOUR_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3-compatible endpoint (overrides BUCKET_TOUR_ENDPOINT_URL)
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Directory for local payloads (overrides BUCKET_TOUR_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Local metadata database URL (overrides BUCKET_TOUR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory for generated upload/download files (overrides BUCKET_TOUR_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Name prefix of the first bucket
    #[arg(long, default_value = "firstrustbucket")]
    pub first_prefix: String,

    /// Name prefix of the second bucket
    #[arg(long, default_value = "secondrustbucket")]
    pub second_prefix: String,

    /// Enable versioning on the first bucket before uploading
    #[arg(long)]
    pub versioning: bool,

    /// Leave generated scratch files on disk
    #[arg(long)]
    pub keep_scratch: bool,

    /// Empty and delete every bucket starting with this prefix, then exit
    #[arg(long, value_name = "PREFIX")]
    pub purge: Option<String>,
}

/// UUID suffix length; prefixes must leave room for it within 63 characters.
const MAX_PREFIX_LEN: usize = 63 - 36;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the run mode.
    pub fn from_env_and_args() -> Result<(Self, Mode)> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<(Self, Mode)> {
        // --- Environment fallback ---
        let env_backend = match env::var("BUCKET_TOUR_BACKEND") {
            Ok(value) => BackendKind::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("parsing BUCKET_TOUR_BACKEND value `{}`", value))?,
            Err(env::VarError::NotPresent) => BackendKind::Local,
            Err(err) => return Err(err).context("reading BUCKET_TOUR_BACKEND"),
        };
        let env_region = env::var("BUCKET_TOUR_REGION").ok();
        let env_endpoint = env::var("BUCKET_TOUR_ENDPOINT_URL").ok();
        let env_storage =
            env::var("BUCKET_TOUR_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("BUCKET_TOUR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/bucket_tour.db".into());
        let env_scratch =
            env::var("BUCKET_TOUR_SCRATCH_DIR").unwrap_or_else(|_| "./scratch".into());

        // --- Merge ---
        let cfg = Self {
            backend: args.backend.unwrap_or(env_backend),
            region: args.region.or(env_region),
            endpoint_url: args.endpoint_url.or(env_endpoint),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            scratch_dir: args.scratch_dir.unwrap_or(env_scratch),
            first_prefix: args.first_prefix,
            second_prefix: args.second_prefix,
            versioning: args.versioning,
            keep_scratch: args.keep_scratch,
        };

        for prefix in [&cfg.first_prefix, &cfg.second_prefix] {
            if prefix.len() > MAX_PREFIX_LEN {
                bail!(
                    "bucket prefix `{}` is longer than {} characters",
                    prefix,
                    MAX_PREFIX_LEN
                );
            }
        }

        let mode = match args.purge {
            Some(prefix) if prefix.is_empty() => bail!("--purge needs a non-empty prefix"),
            Some(prefix) => Mode::Purge(prefix),
            None => Mode::Tour,
        };

        Ok((cfg, mode))
    }

    /// Region used by the local backend when none is configured.
    pub fn local_region(&self) -> &str {
        self.region.as_deref().unwrap_or("local")
    }
}
