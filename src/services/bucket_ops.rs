//! Bucket-level helpers built on top of any `ObjectStore`.

use crate::{
    errors::{ErrorKind, StoreError, StoreResult},
    models::{
        bucket::CreateBucketOutput,
        object::{ObjectIdentifier, ObjectVersion},
    },
    services::store::{MAX_DELETE_BATCH, ObjectStore},
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of emptying a bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeleteSummary {
    /// Version entries found (versions and delete markers).
    pub requested: usize,
    pub deleted: usize,
    /// Batch-delete requests issued.
    pub batches: usize,
}

/// `prefix` followed by a random UUID.
///
/// Bucket names must be 3–63 characters; the UUID takes 36, so keep the
/// prefix at 27 characters or fewer.
pub fn create_bucket_name(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4())
}

/// Create a uniquely named bucket in the store's configured region.
///
/// Returns the generated name together with the service's response.
pub async fn create_bucket(
    store: &dyn ObjectStore,
    prefix: &str,
) -> StoreResult<(String, CreateBucketOutput)> {
    let region = store.region().to_string();
    let name = create_bucket_name(prefix);
    let response = store.create_bucket(&name, &region).await?;
    info!(bucket = %name, %region, location = ?response.location, "created bucket");
    Ok((name, response))
}

/// Server-side copy of `key` from one bucket to another under the same key.
pub async fn copy_to_bucket(
    store: &dyn ObjectStore,
    from_bucket: &str,
    to_bucket: &str,
    key: &str,
) -> StoreResult<()> {
    store.copy_object(from_bucket, key, to_bucket, key).await?;
    debug!(from = from_bucket, to = to_bucket, key, "copied object");
    Ok(())
}

/// Delete every version and delete marker in `bucket` so the bucket itself
/// can be deleted.
pub async fn delete_all_objects(store: &dyn ObjectStore, bucket: &str) -> StoreResult<DeleteSummary> {
    let versions = store.list_object_versions(bucket).await?;
    let ids: Vec<ObjectIdentifier> = versions.iter().map(ObjectVersion::identifier).collect();
    debug!(bucket, entries = ids.len(), "collected object versions");
    delete_versions(store, bucket, &ids, MAX_DELETE_BATCH).await
}

/// Delete `ids` in requests of at most `batch_size` entries.
///
/// Per-item failures from every batch are collected and reported together as
/// `BatchDeleteFailed`; whatever was deleted stays deleted. A failed request
/// stops immediately.
pub async fn delete_versions(
    store: &dyn ObjectStore,
    bucket: &str,
    ids: &[ObjectIdentifier],
    batch_size: usize,
) -> StoreResult<DeleteSummary> {
    let batch_size = batch_size.clamp(1, MAX_DELETE_BATCH);
    let mut summary = DeleteSummary {
        requested: ids.len(),
        ..DeleteSummary::default()
    };
    let mut failures = Vec::new();

    for chunk in ids.chunks(batch_size) {
        let report = store.delete_objects(bucket, chunk).await?;
        summary.batches += 1;
        summary.deleted += report.deleted.len();
        for failure in &report.errors {
            warn!(
                bucket,
                key = %failure.key,
                version_id = ?failure.version_id,
                code = %failure.code,
                "delete rejected"
            );
        }
        failures.extend(report.errors);
    }

    if !failures.is_empty() {
        return Err(StoreError::BatchDeleteFailed {
            deleted: summary.deleted,
            failures,
        });
    }

    info!(
        bucket,
        deleted = summary.deleted,
        batches = summary.batches,
        "emptied bucket"
    );
    Ok(summary)
}

/// Empty and delete every bucket whose name starts with `prefix`.
///
/// Returns the names of the buckets removed. Buckets that disappear between
/// the listing and their deletion are skipped.
pub async fn purge_buckets_with_prefix(
    store: &dyn ObjectStore,
    prefix: &str,
) -> StoreResult<Vec<String>> {
    let mut purged = Vec::new();
    for bucket in store.list_buckets().await? {
        if !bucket.name.starts_with(prefix) {
            continue;
        }
        if purge_bucket(store, &bucket.name).await? {
            info!(bucket = %bucket.name, "purged bucket");
            purged.push(bucket.name);
        }
    }
    Ok(purged)
}

/// Empty and delete one bucket. `Ok(false)` when it no longer exists.
async fn purge_bucket(store: &dyn ObjectStore, bucket: &str) -> StoreResult<bool> {
    let outcome: StoreResult<()> = async {
        delete_all_objects(store, bucket).await?;
        store.delete_bucket(bucket).await
    }
    .await;

    match outcome {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!(bucket, %err, "bucket vanished before it could be purged");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::PutOptions;
    use crate::services::local_store::test_support::temp_store;

    #[test]
    fn bucket_names_keep_prefix_and_fit_limits() {
        let name = create_bucket_name("firstrustbucket");
        assert!(name.starts_with("firstrustbucket"));
        assert!((3..=63).contains(&name.len()));
        assert_ne!(create_bucket_name("x"), create_bucket_name("x"));
    }

    #[tokio::test]
    async fn create_bucket_uses_store_region() {
        let (store, _dir) = temp_store().await;
        let (name, response) = create_bucket(&store, "regional").await.unwrap();
        assert!(name.starts_with("regional"));
        assert_eq!(response.name, name);

        let buckets = store.list_buckets().await.unwrap();
        assert_eq!(buckets[0].region.as_deref(), Some("local"));
    }

    #[tokio::test]
    async fn copy_then_delete_leaves_destination_empty() {
        let (store, dir) = temp_store().await;
        let (b1, _) = create_bucket(&store, "b1-").await.unwrap();
        let (b2, _) = create_bucket(&store, "b2-").await.unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "f".repeat(300)).unwrap();
        store
            .upload_file(&b1, "f", &file, &PutOptions::default())
            .await
            .unwrap();

        copy_to_bucket(&store, &b1, &b2, "f").await.unwrap();
        let keys: Vec<_> = store
            .list_objects(&b2)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["f".to_string()]);

        store.delete_object(&b2, "f").await.unwrap();
        assert!(store.list_objects(&b2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn emptying_a_versioned_bucket_covers_every_version() {
        let (store, dir) = temp_store().await;
        let (bucket, _) = create_bucket(&store, "versioned-").await.unwrap();
        store.put_bucket_versioning(&bucket, true).await.unwrap();

        let file = dir.path().join("payload");
        for round in 0..4 {
            std::fs::write(&file, format!("round {round}")).unwrap();
            store
                .upload_file(&bucket, "doc", &file, &PutOptions::default())
                .await
                .unwrap();
        }
        store
            .upload_file(&bucket, "other", &file, &PutOptions::default())
            .await
            .unwrap();
        store.delete_object(&bucket, "doc").await.unwrap();
        assert_eq!(store.list_object_versions(&bucket).await.unwrap().len(), 6);

        let summary = delete_all_objects(&store, &bucket).await.unwrap();
        assert_eq!(
            summary,
            DeleteSummary {
                requested: 6,
                deleted: 6,
                batches: 1
            }
        );
        assert!(store.list_object_versions(&bucket).await.unwrap().is_empty());
        store.delete_bucket(&bucket).await.unwrap();
    }

    #[tokio::test]
    async fn deletes_are_chunked_and_failures_aggregated() {
        let (store, dir) = temp_store().await;
        let (bucket, _) = create_bucket(&store, "chunked-").await.unwrap();
        let file = dir.path().join("payload");
        std::fs::write(&file, "x").unwrap();
        for key in ["a", "b", "c", "d", "e"] {
            store
                .upload_file(&bucket, key, &file, &PutOptions::default())
                .await
                .unwrap();
        }

        let versions = store.list_object_versions(&bucket).await.unwrap();
        let ids: Vec<_> = versions.iter().map(ObjectVersion::identifier).collect();
        let summary = delete_versions(&store, &bucket, &ids, 2).await.unwrap();
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.deleted, 5);

        store
            .upload_file(&bucket, "keep", &file, &PutOptions::default())
            .await
            .unwrap();
        let ids = vec![
            ObjectIdentifier::new("keep"),
            ObjectIdentifier::new("/rooted"),
            ObjectIdentifier::new("bad..key"),
        ];
        let err = delete_versions(&store, &bucket, &ids, 1).await.unwrap_err();
        match err {
            StoreError::BatchDeleteFailed { deleted, failures } => {
                assert_eq!(deleted, 1);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.list_objects(&bucket).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_only_touches_matching_buckets() {
        let (store, dir) = temp_store().await;
        let (doomed, _) = create_bucket(&store, "leftover-").await.unwrap();
        let (kept, _) = create_bucket(&store, "keeper-").await.unwrap();
        let file = dir.path().join("payload");
        std::fs::write(&file, "x").unwrap();
        store
            .upload_file(&doomed, "x", &file, &PutOptions::default())
            .await
            .unwrap();

        let purged = purge_buckets_with_prefix(&store, "leftover-").await.unwrap();
        assert_eq!(purged, vec![doomed]);
        let remaining: Vec<_> = store
            .list_buckets()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(remaining, vec![kept]);
    }

    #[tokio::test]
    async fn purging_a_vanished_bucket_is_skipped() {
        let (store, _dir) = temp_store().await;
        let (bucket, _) = create_bucket(&store, "racing-").await.unwrap();
        store.delete_bucket(&bucket).await.unwrap();

        assert!(!purge_bucket(&store, &bucket).await.unwrap());

        let (live, _) = create_bucket(&store, "racing-").await.unwrap();
        assert!(purge_bucket(&store, &live).await.unwrap());
        assert!(store.list_buckets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_still_fails_on_other_errors() {
        let (store, _dir) = temp_store().await;
        create_bucket(&store, "stuck-").await.unwrap();

        // An invalid name is a request error, not a vanished bucket.
        let err = purge_bucket(&store, "Not_A_Bucket").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(store.list_buckets().await.unwrap().len(), 1);
    }
}
