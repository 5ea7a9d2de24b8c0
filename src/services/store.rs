//! The storage client boundary.
//!
//! Everything the tour does to buckets and objects goes through an
//! `ObjectStore` handed in by the caller. `S3Store` talks to the real service
//! through the AWS SDK; `LocalStore` keeps the same contract on local disk so
//! runs and tests need no cloud account.

use crate::{
    errors::StoreResult,
    models::{
        acl::{CannedAcl, Grant},
        bucket::{BucketInfo, CreateBucketOutput},
        object::{
            DeleteReport, ObjectDetails, ObjectIdentifier, ObjectSummary, ObjectVersion,
            PutOptions, PutOutput,
        },
    },
};
use async_trait::async_trait;
use std::path::Path;

/// Maximum number of keys the service accepts in one batch-delete request.
pub const MAX_DELETE_BATCH: usize = 1000;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Region new buckets are created in.
    fn region(&self) -> &str;

    async fn create_bucket(&self, name: &str, region: &str) -> StoreResult<CreateBucketOutput>;

    async fn put_bucket_versioning(&self, bucket: &str, enabled: bool) -> StoreResult<()>;

    /// Lift the bucket's public access block so public canned ACLs are
    /// accepted. Backends without such a block only check the bucket exists.
    async fn allow_public_acls(&self, bucket: &str) -> StoreResult<()>;

    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>>;

    /// Fails with `BucketNotEmpty` while any version or delete marker remains.
    async fn delete_bucket(&self, name: &str) -> StoreResult<()>;

    /// Upload the file at `path` as `bucket/key`.
    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StoreResult<PutOutput>;

    /// Download the latest version of `bucket/key` into `dest`, returning the
    /// number of bytes written.
    async fn download_file(&self, bucket: &str, key: &str, dest: &Path) -> StoreResult<u64>;

    /// Server-side copy; the payload never transits the caller.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()>;

    /// Delete `bucket/key`. Succeeds when the key does not exist.
    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;

    /// Every current (non-deleted) object in the bucket, in key order.
    async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<ObjectSummary>>;

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDetails>;

    async fn get_object_acl(&self, bucket: &str, key: &str) -> StoreResult<Vec<Grant>>;

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> StoreResult<()>;

    /// Every version and delete marker in the bucket.
    async fn list_object_versions(&self, bucket: &str) -> StoreResult<Vec<ObjectVersion>>;

    /// One batch-delete request. At most [`MAX_DELETE_BATCH`] entries.
    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> StoreResult<DeleteReport>;
}
