//! The guided tour: every step of the object-storage walkthrough, in order,
//! against whichever `ObjectStore` the caller hands in.

use crate::{
    models::{
        acl::{CannedAcl, Grant},
        object::{ObjectDetails, ObjectSummary, PutOptions, ServerSideEncryption},
    },
    scratch::ScratchSpace,
    services::{
        bucket_ops::{self, DeleteSummary},
        store::ObjectStore,
    },
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub struct TourOptions {
    pub first_prefix: String,
    pub second_prefix: String,
    /// Turn on versioning for the first bucket before anything is uploaded.
    pub versioning: bool,
}

impl Default for TourOptions {
    fn default() -> Self {
        Self {
            first_prefix: "firstrustbucket".into(),
            second_prefix: "secondrustbucket".into(),
            versioning: false,
        }
    }
}

/// What the tour observed along the way.
#[derive(Debug, Clone, Serialize)]
pub struct TourReport {
    pub first_bucket: String,
    pub second_bucket: String,
    pub uploaded_keys: Vec<String>,
    pub downloaded_bytes: u64,
    pub second_bucket_after_copy: Vec<ObjectSummary>,
    pub second_bucket_after_delete: Vec<ObjectSummary>,
    pub grants_public: Vec<Grant>,
    pub grants_private: Vec<Grant>,
    pub encryption: Option<ServerSideEncryption>,
    pub buckets_seen: Vec<String>,
    pub first_bucket_objects: Vec<ObjectDetails>,
    pub emptied: DeleteSummary,
}

fn key_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("scratch file {} has no usable name", path.display()))
}

/// Run the walkthrough. Errors propagate and stop the tour; buckets created
/// before the failure are left behind for `--purge` to clean up.
pub async fn run(
    store: &dyn ObjectStore,
    scratch: &mut ScratchSpace,
    options: &TourOptions,
) -> Result<TourReport> {
    // --- Buckets ---
    let (first_bucket, first_response) =
        bucket_ops::create_bucket(store, &options.first_prefix).await?;
    info!(?first_response, "first bucket response");
    let (second_bucket, second_response) =
        bucket_ops::create_bucket(store, &options.second_prefix).await?;
    info!(?second_response, "second bucket response");

    if options.versioning {
        store.put_bucket_versioning(&first_bucket, true).await?;
        info!(bucket = %first_bucket, "enabled versioning");
    }

    // --- Upload, then upload again ---
    let first_file = scratch.create_file(300, "firstfile.txt", "f").await?;
    let first_key = key_of(&first_file)?;
    info!(file = %first_file.display(), "wrote first file");

    for attempt in 1..=2 {
        let put = store
            .upload_file(&first_bucket, &first_key, &first_file, &PutOptions::default())
            .await?;
        info!(key = %first_key, attempt, etag = ?put.etag, version_id = ?put.version_id, "uploaded");
    }

    // --- Download ---
    let download_path = scratch.track(Path::new("tmp").join(&first_key));
    let downloaded_bytes = store
        .download_file(&first_bucket, &first_key, &download_path)
        .await?;
    info!(path = %download_path.display(), bytes = downloaded_bytes, "downloaded");

    // --- Copy between buckets, then delete the copy ---
    bucket_ops::copy_to_bucket(store, &first_bucket, &second_bucket, &first_key).await?;
    let second_bucket_after_copy = store.list_objects(&second_bucket).await?;
    info!(bucket = %second_bucket, objects = second_bucket_after_copy.len(), "after copy");

    store.delete_object(&second_bucket, &first_key).await?;
    let second_bucket_after_delete = store.list_objects(&second_bucket).await?;
    info!(bucket = %second_bucket, objects = second_bucket_after_delete.len(), "after delete");

    // --- ACLs ---
    store.allow_public_acls(&first_bucket).await?;
    let second_file = scratch.create_file(400, "secondfile.txt", "s").await?;
    let second_key = key_of(&second_file)?;
    store
        .upload_file(
            &first_bucket,
            &second_key,
            &second_file,
            &PutOptions::with_acl(CannedAcl::PublicRead),
        )
        .await?;
    let grants_public = store.get_object_acl(&first_bucket, &second_key).await?;
    info!(
        key = %second_key,
        public = grants_public.iter().any(Grant::is_public_read),
        grants = ?grants_public,
        "public-read grants"
    );

    store
        .put_object_acl(&first_bucket, &second_key, CannedAcl::Private)
        .await?;
    let grants_private = store.get_object_acl(&first_bucket, &second_key).await?;
    info!(
        key = %second_key,
        public = grants_private.iter().any(Grant::is_public_read),
        grants = ?grants_private,
        "private grants"
    );

    // --- Server-side encryption ---
    let third_file = scratch.create_file(300, "thirdfile.txt", "t").await?;
    let third_key = key_of(&third_file)?;
    store
        .upload_file(
            &first_bucket,
            &third_key,
            &third_file,
            &PutOptions::with_encryption(ServerSideEncryption::Aes256),
        )
        .await?;
    let encryption = store
        .head_object(&first_bucket, &third_key)
        .await?
        .server_side_encryption;
    info!(key = %third_key, ?encryption, "uploaded encrypted");

    // --- Traversals ---
    let buckets_seen: Vec<String> = store
        .list_buckets()
        .await?
        .into_iter()
        .map(|bucket| bucket.name)
        .collect();
    for name in &buckets_seen {
        info!(bucket = %name, "bucket");
    }

    let mut first_bucket_objects = Vec::new();
    for summary in store.list_objects(&first_bucket).await? {
        info!(key = %summary.key, "object");
        let details = store.head_object(&first_bucket, &summary.key).await?;
        info!(
            key = %details.key,
            storage_class = ?details.storage_class,
            last_modified = ?details.last_modified,
            version_id = ?details.version_id,
            metadata = ?details.metadata,
            "object details"
        );
        first_bucket_objects.push(details);
    }

    // --- Teardown ---
    let emptied = bucket_ops::delete_all_objects(store, &first_bucket).await?;
    store.delete_bucket(&first_bucket).await?;
    store.delete_bucket(&second_bucket).await?;
    info!(first = %first_bucket, second = %second_bucket, "deleted buckets");

    Ok(TourReport {
        first_bucket,
        second_bucket,
        uploaded_keys: vec![first_key, second_key, third_key],
        downloaded_bytes,
        second_bucket_after_copy,
        second_bucket_after_delete,
        grants_public,
        grants_private,
        encryption,
        buckets_seen,
        first_bucket_objects,
        emptied,
    })
}
