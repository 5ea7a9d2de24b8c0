use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod models;
mod scratch;
mod services;
mod tour;

use config::{AppConfig, BackendKind, Mode};
use errors::StoreError;
use services::{local_store::LocalStore, s3_store::S3Store, store::ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = run().await;
    if let Err(err) = &result {
        match err.downcast_ref::<StoreError>() {
            Some(store_err) => {
                tracing::error!(kind = ?store_err.kind(), "bucket-tour failed: {:#}", err)
            }
            None => tracing::error!("bucket-tour failed: {:#}", err),
        }
    }
    result
}

async fn run() -> Result<()> {
    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting bucket-tour with config: {:?}", cfg);

    // --- Build the storage client ---
    let store: Box<dyn ObjectStore> = match cfg.backend {
        BackendKind::Local => Box::new(
            LocalStore::connect(&cfg.database_url, &cfg.storage_dir, cfg.local_region()).await?,
        ),
        BackendKind::S3 => Box::new(
            S3Store::from_env(cfg.region.as_deref(), cfg.endpoint_url.as_deref()).await,
        ),
    };
    tracing::info!("Using {:?} backend in region {}", cfg.backend, store.region());

    // --- Purge leftovers and exit ---
    if let Mode::Purge(prefix) = &mode {
        let purged = services::bucket_ops::purge_buckets_with_prefix(store.as_ref(), prefix).await?;
        tracing::info!("Purged {} bucket(s) starting with `{}`", purged.len(), prefix);
        return Ok(());
    }

    // --- Run the tour ---
    let mut scratch = scratch::ScratchSpace::new(&cfg.scratch_dir, cfg.keep_scratch).await?;
    tracing::debug!("Scratch files go to {}", scratch.dir().display());
    let options = tour::TourOptions {
        first_prefix: cfg.first_prefix.clone(),
        second_prefix: cfg.second_prefix.clone(),
        versioning: cfg.versioning,
    };
    let report = tour::run(store.as_ref(), &mut scratch, &options).await?;

    tracing::info!(
        "Tour finished: {} bucket(s) seen, {} version(s) deleted in {} batch(es)",
        report.buckets_seen.len(),
        report.emptied.deleted,
        report.emptied.batches
    );
    tracing::debug!("Tour report: {}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
