//! src/services/local_store.rs
//!
//! LocalStore: an `ObjectStore` backed by SQLite for bucket and version
//! metadata and by local disk for payloads, sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{row id}`. It follows the service's
//! observable rules closely enough for the tour and the tests to run offline:
//! bucket naming, regions, versioning with delete markers, canned ACLs,
//! "bucket not empty", and the batch-delete key limit.

use crate::{
    errors::{StoreError, StoreResult},
    models::{
        acl::{CannedAcl, Grant},
        bucket::{Bucket, BucketInfo, CreateBucketOutput, VersioningState},
        object::{
            DEFAULT_STORAGE_CLASS, DeleteFailure, DeleteReport, DeletedObject, NULL_VERSION_ID,
            ObjectDetails, ObjectIdentifier, ObjectSummary, ObjectVersion, PutOptions, PutOutput,
            StoredVersion,
        },
    },
    services::store::{MAX_DELETE_BATCH, ObjectStore},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::{
    Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const VERSION_COLUMNS: &str = "id, bucket_id, key, version_id, is_latest, is_delete_marker, \
     content_type, size_bytes, etag, storage_class, last_modified, acl, \
     server_side_encryption, metadata";

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const SUPPORTED_REGIONS: &[&str] = &[
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "sa-east-1",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-southeast-2",
    "ap-northeast-2",
    "me-south-1",
];

/// Attributes of a version about to be inserted.
struct NewVersion {
    id: Uuid,
    key: String,
    is_delete_marker: bool,
    content_type: Option<String>,
    size_bytes: i64,
    etag: Option<String>,
    storage_class: String,
    acl: CannedAcl,
    server_side_encryption: Option<String>,
    metadata: String,
}

impl NewVersion {
    fn delete_marker(key: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.to_string(),
            is_delete_marker: true,
            content_type: None,
            size_bytes: 0,
            etag: None,
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            acl: CannedAcl::Private,
            server_side_encryption: None,
            metadata: "{}".to_string(),
        }
    }
}

/// Upload-time attributes shared by plain uploads and copies.
struct WriteAttrs {
    content_type: Option<String>,
    storage_class: String,
    acl: CannedAcl,
    server_side_encryption: Option<String>,
    metadata: HashMap<String, String>,
}

#[derive(Clone)]
pub struct LocalStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    region: String,
}

impl LocalStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            region: region.into(),
        }
    }

    /// Open (creating if needed) the SQLite database at `database_url`, make
    /// sure the payload directory exists, and apply the schema.
    pub async fn connect(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        region: impl Into<String>,
    ) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }

        Self::connect_with(options, base_path, region).await
    }

    pub async fn connect_with(
        options: SqliteConnectOptions,
        base_path: impl Into<PathBuf>,
        region: impl Into<String>,
    ) -> StoreResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
            tracing::info!("Created storage directory at {}", base_path.display());
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(Arc::new(pool), base_path, region);
        store.run_migrations().await?;
        Ok(store)
    }

    /// Apply the embedded schema one statement at a time.
    async fn run_migrations(&self) -> StoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let invalid = || StoreError::InvalidObjectKey(key.to_string());
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(invalid());
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(invalid());
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        if name.trim() != name {
            return Err(invalid("cannot begin or end with whitespace"));
        }

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    /// Case-insensitive check against SUPPORTED_REGIONS.
    fn ensure_region_valid(&self, region: &str) -> StoreResult<()> {
        if SUPPORTED_REGIONS
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(region))
        {
            Ok(())
        } else {
            Err(StoreError::UnsupportedRegion(region.to_string()))
        }
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Payload path of one stored version. Parent directories may not exist yet.
    fn payload_path(&self, bucket_name: &str, key: &str, id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.simple().to_string());
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, owner_id, region, created_at, versioning
             FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::BucketNotFound(bucket.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// The current version of a key, unless it is missing or a delete marker.
    async fn fetch_current(&self, bucket: &Bucket, key: &str) -> StoreResult<StoredVersion> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket_id = ? AND key = ? AND is_latest = 1"
        );
        let latest = sqlx::query_as::<_, StoredVersion>(&sql)
            .bind(bucket.id)
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;

        match latest {
            Some(version) if !version.is_delete_marker => Ok(version),
            _ => Err(StoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            }),
        }
    }

    /// Stream a payload to disk and record it as the newest version of `key`.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into its final location.
    /// - Inserts the version row; without versioning the previous `null`
    ///   version is replaced and its payload removed.
    async fn write_version<S>(
        &self,
        bucket: &Bucket,
        key: &str,
        stream: S,
        attrs: WriteAttrs,
    ) -> StoreResult<StoredVersion>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let id = Uuid::new_v4();
        let file_path = self.payload_path(&bucket.name, key, id);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "payload path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let metadata = serde_json::to_string(&attrs.metadata)
            .map_err(|err| StoreError::MalformedRequest(format!("metadata: {err}")))?;
        let row = NewVersion {
            id,
            key: key.to_string(),
            is_delete_marker: false,
            content_type: attrs.content_type,
            size_bytes,
            etag: Some(format!("{:x}", digest.compute())),
            storage_class: attrs.storage_class,
            acl: attrs.acl,
            server_side_encryption: attrs.server_side_encryption,
            metadata,
        };

        match self.insert_version(bucket, row).await {
            Ok(version) => Ok(version),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(err)
            }
        }
    }

    /// Insert `row` as the latest version of its key in one transaction.
    async fn insert_version(&self, bucket: &Bucket, row: NewVersion) -> StoreResult<StoredVersion> {
        let version_id = if bucket.versioning.assigns_version_ids() {
            Uuid::new_v4().simple().to_string()
        } else {
            NULL_VERSION_ID.to_string()
        };

        let mut tx = self.db.begin().await?;

        let replaced = if bucket.versioning.assigns_version_ids() {
            None
        } else {
            sqlx::query_as::<_, (Uuid, bool)>(
                "DELETE FROM object_versions
                 WHERE bucket_id = ? AND key = ? AND version_id = ?
                 RETURNING id, is_delete_marker",
            )
            .bind(bucket.id)
            .bind(&row.key)
            .bind(NULL_VERSION_ID)
            .fetch_optional(&mut *tx)
            .await?
        };

        sqlx::query("UPDATE object_versions SET is_latest = 0 WHERE bucket_id = ? AND key = ?")
            .bind(bucket.id)
            .bind(&row.key)
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "INSERT INTO object_versions (
                id, bucket_id, key, version_id, is_latest, is_delete_marker,
                content_type, size_bytes, etag, storage_class, last_modified, acl,
                server_side_encryption, metadata
            ) VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {VERSION_COLUMNS}"
        );
        let version = sqlx::query_as::<_, StoredVersion>(&sql)
            .bind(row.id)
            .bind(bucket.id)
            .bind(&row.key)
            .bind(&version_id)
            .bind(row.is_delete_marker)
            .bind(row.content_type)
            .bind(row.size_bytes)
            .bind(row.etag)
            .bind(row.storage_class)
            .bind(Utc::now())
            .bind(row.acl.as_str())
            .bind(row.server_side_encryption)
            .bind(row.metadata)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        if let Some((old_id, was_marker)) = replaced {
            if !was_marker {
                self.remove_payload(&bucket.name, &row.key, old_id).await?;
            }
        }

        Ok(version)
    }

    /// Point `is_latest` at the newest remaining row of `key`.
    async fn refresh_latest(
        tx: &mut Transaction<'_, Sqlite>,
        bucket_id: Uuid,
        key: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE object_versions
             SET is_latest = (rowid = (
                 SELECT MAX(rowid) FROM object_versions WHERE bucket_id = ? AND key = ?
             ))
             WHERE bucket_id = ? AND key = ?",
        )
        .bind(bucket_id)
        .bind(key)
        .bind(bucket_id)
        .bind(key)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Permanently remove one version (or delete marker) and its payload.
    async fn remove_version(
        &self,
        bucket: &Bucket,
        key: &str,
        version_id: &str,
    ) -> StoreResult<DeletedObject> {
        let mut tx = self.db.begin().await?;
        let removed = sqlx::query_as::<_, (Uuid, bool)>(
            "DELETE FROM object_versions
             WHERE bucket_id = ? AND key = ? AND version_id = ?
             RETURNING id, is_delete_marker",
        )
        .bind(bucket.id)
        .bind(key)
        .bind(version_id)
        .fetch_optional(&mut *tx)
        .await?;
        Self::refresh_latest(&mut tx, bucket.id, key).await?;
        tx.commit().await?;

        let delete_marker = match removed {
            Some((id, false)) => {
                self.remove_payload(&bucket.name, key, id).await?;
                false
            }
            Some((_, true)) => true,
            None => {
                debug!(bucket = %bucket.name, key, version_id, "version already absent");
                false
            }
        };

        Ok(DeletedObject {
            key: key.to_string(),
            version_id: Some(version_id.to_string()),
            delete_marker,
        })
    }

    /// Unversioned delete removes the `null` version. Once versioning has been
    /// on, a delete adds a marker and keeps history; while suspended the marker
    /// takes the `null` version id and replaces any `null` version.
    async fn delete_current(&self, bucket: &Bucket, key: &str) -> StoreResult<DeletedObject> {
        if bucket.versioning.keeps_history() {
            let marker = self
                .insert_version(bucket, NewVersion::delete_marker(key))
                .await?;
            return Ok(DeletedObject {
                key: key.to_string(),
                version_id: Some(marker.version_id),
                delete_marker: true,
            });
        }

        let mut removed = self.remove_version(bucket, key, NULL_VERSION_ID).await?;
        removed.version_id = None;
        Ok(removed)
    }

    async fn remove_payload(&self, bucket_name: &str, key: &str, id: Uuid) -> StoreResult<()> {
        let file_path = self.payload_path(bucket_name, key, id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket_name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Remove empty shard directories up to (not including) the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn delete_one(&self, bucket: &Bucket, id: &ObjectIdentifier) -> StoreResult<DeletedObject> {
        self.ensure_key_safe(&id.key)?;
        match id.version_id.as_deref() {
            Some(version_id) => self.remove_version(bucket, &id.key, version_id).await,
            None => self.delete_current(bucket, &id.key).await,
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_bucket(&self, name: &str, region: &str) -> StoreResult<CreateBucketOutput> {
        self.ensure_bucket_name_safe(name)?;
        let normalized_region = region.to_lowercase();
        self.ensure_region_valid(&normalized_region)?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            owner_id: Uuid::new_v4(),
            region: normalized_region,
            created_at: Utc::now(),
            versioning: VersioningState::Unversioned,
        };

        let inserted = sqlx::query(
            "INSERT INTO buckets (id, name, owner_id, region, created_at, versioning)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(bucket.id)
        .bind(&bucket.name)
        .bind(bucket.owner_id)
        .bind(&bucket.region)
        .bind(bucket.created_at)
        .bind(bucket.versioning)
        .execute(&*self.db)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::BucketAlreadyExists(name.to_string()));
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }

        fs::create_dir_all(self.bucket_root(name)).await?;

        Ok(CreateBucketOutput {
            name: bucket.name,
            location: Some(format!("/{name}")),
        })
    }

    async fn put_bucket_versioning(&self, bucket: &str, enabled: bool) -> StoreResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let state = bucket_rec.versioning.apply(enabled);
        sqlx::query("UPDATE buckets SET versioning = ? WHERE id = ?")
            .bind(state)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;
        debug!(bucket, ?state, "updated versioning");
        Ok(())
    }

    async fn allow_public_acls(&self, bucket: &str) -> StoreResult<()> {
        self.fetch_bucket(bucket).await?;
        Ok(())
    }

    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        let buckets = sqlx::query_as::<_, Bucket>(
            "SELECT id, name, owner_id, region, created_at, versioning
             FROM buckets ORDER BY name ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(buckets.into_iter().map(BucketInfo::from).collect())
    }

    async fn delete_bucket(&self, name: &str) -> StoreResult<()> {
        let bucket = self.fetch_bucket(name).await?;

        let remaining =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM object_versions WHERE bucket_id = ?")
                .bind(bucket.id)
                .fetch_one(&*self.db)
                .await?;
        if remaining > 0 {
            return Err(StoreError::BucketNotEmpty(name.to_string()));
        }

        sqlx::query("DELETE FROM buckets WHERE id = ?")
            .bind(bucket.id)
            .execute(&*self.db)
            .await?;

        let bucket_path = self.bucket_root(name);
        if let Err(err) = fs::remove_dir_all(&bucket_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!(
                    "failed to remove bucket directory {} after delete: {}",
                    bucket_path.display(),
                    err
                );
            }
        }

        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StoreResult<PutOutput> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file = File::open(path).await?;
        let attrs = WriteAttrs {
            content_type: options.content_type.clone(),
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            acl: options.acl.unwrap_or_default(),
            server_side_encryption: options
                .server_side_encryption
                .map(|sse| sse.as_str().to_string()),
            metadata: options.metadata.clone(),
        };
        let version = self
            .write_version(&bucket_rec, key, ReaderStream::new(file), attrs)
            .await?;

        Ok(PutOutput {
            etag: version.etag,
            version_id: Some(version.version_id).filter(|v| v != NULL_VERSION_ID),
        })
    }

    async fn download_file(&self, bucket: &str, key: &str, dest: &Path) -> StoreResult<u64> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let version = self.fetch_current(&bucket_rec, key).await?;

        let payload = self.payload_path(&bucket_rec.name, key, version.id);
        let mut source = File::open(&payload).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut target = File::create(dest).await?;
        let written = tokio::io::copy(&mut source, &mut target).await?;
        target.flush().await?;
        Ok(written)
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        self.ensure_key_safe(src_key)?;
        self.ensure_key_safe(dst_key)?;
        let source_bucket = self.fetch_bucket(src_bucket).await?;
        let target_bucket = self.fetch_bucket(dst_bucket).await?;
        let source = self.fetch_current(&source_bucket, src_key).await?;

        let payload = self.payload_path(&source_bucket.name, src_key, source.id);
        let file = File::open(&payload).await?;
        let details = source.details()?;
        let attrs = WriteAttrs {
            content_type: details.content_type,
            storage_class: source.storage_class.clone(),
            acl: CannedAcl::Private,
            server_side_encryption: None,
            metadata: details.metadata,
        };
        self.write_version(&target_bucket, dst_key, ReaderStream::new(file), attrs)
            .await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.delete_current(&bucket_rec, key).await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<ObjectSummary>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket_id = ? AND is_latest = 1 AND is_delete_marker = 0
             ORDER BY key ASC"
        );
        let rows = sqlx::query_as::<_, StoredVersion>(&sql)
            .bind(bucket_rec.id)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.iter().map(StoredVersion::summary).collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDetails> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_current(&bucket_rec, key).await?.details()
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> StoreResult<Vec<Grant>> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let version = self.fetch_current(&bucket_rec, key).await?;
        let acl = version.canned_acl()?;
        Ok(acl.grants(&bucket_rec.owner_id.simple().to_string()))
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let version = self.fetch_current(&bucket_rec, key).await?;
        sqlx::query("UPDATE object_versions SET acl = ? WHERE id = ?")
            .bind(acl.as_str())
            .bind(version.id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn list_object_versions(&self, bucket: &str) -> StoreResult<Vec<ObjectVersion>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM object_versions
             WHERE bucket_id = ?
             ORDER BY key ASC, rowid DESC"
        );
        let rows = sqlx::query_as::<_, StoredVersion>(&sql)
            .bind(bucket_rec.id)
            .fetch_all(&*self.db)
            .await?;
        Ok(rows.iter().map(StoredVersion::version).collect())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        objects: &[ObjectIdentifier],
    ) -> StoreResult<DeleteReport> {
        if objects.len() > MAX_DELETE_BATCH {
            return Err(StoreError::TooManyKeys {
                count: objects.len(),
                max: MAX_DELETE_BATCH,
            });
        }
        if objects.is_empty() {
            return Err(StoreError::MalformedRequest(
                "batch delete needs at least one key".into(),
            ));
        }
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let mut report = DeleteReport::default();
        for id in objects {
            match self.delete_one(&bucket_rec, id).await {
                Ok(deleted) => report.deleted.push(deleted),
                Err(err) => {
                    let code = match err {
                        StoreError::InvalidObjectKey(_) => "InvalidArgument",
                        _ => "InternalError",
                    };
                    report.errors.push(DeleteFailure {
                        key: id.key.clone(),
                        version_id: id.version_id.clone(),
                        code: code.to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::LocalStore;
    use sqlx::sqlite::SqliteConnectOptions;
    use tempfile::TempDir;

    /// A store rooted in a fresh temp directory; keep the `TempDir` alive for
    /// as long as the store is used.
    pub(crate) async fn temp_store() -> (LocalStore, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("meta.db"))
            .create_if_missing(true);
        let store = LocalStore::connect_with(options, dir.path().join("objects"), "local")
            .await
            .expect("open local store");
        (store, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_store;
    use super::*;
    use crate::errors::ErrorKind as StoreErrorKind;
    use crate::models::object::ServerSideEncryption;

    fn write_payload(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn create_bucket_validates_name_region_and_uniqueness() {
        let (store, _dir) = temp_store().await;

        let err = store.create_bucket("Bad_Name", "local").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBucketName { .. }));

        let err = store.create_bucket("192.168.1.10", "local").await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::InvalidRequest);

        let err = store.create_bucket("fine-name", "mars-north-1").await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedRegion(_)));

        let out = store.create_bucket("fine-name", "US-EAST-1").await.unwrap();
        assert_eq!(out.location.as_deref(), Some("/fine-name"));

        let err = store.create_bucket("fine-name", "local").await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Conflict);

        let buckets = store.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].region.as_deref(), Some("us-east-1"));
    }

    #[tokio::test]
    async fn upload_download_and_head_round_trip() {
        let (store, dir) = temp_store().await;
        store.create_bucket("photos", "local").await.unwrap();

        let src = write_payload(dir.path(), "in.txt", &"f".repeat(300));
        let mut options = PutOptions::with_encryption(ServerSideEncryption::Aes256);
        options.metadata.insert("author".into(), "tour".into());
        let put = store
            .upload_file("photos", "docs/in.txt", &src, &options)
            .await
            .unwrap();
        assert_eq!(put.version_id, None);
        assert!(put.etag.is_some());

        let dest = dir.path().join("out/copy.txt");
        let written = store
            .download_file("photos", "docs/in.txt", &dest)
            .await
            .unwrap();
        assert_eq!(written, 300);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "f".repeat(300));

        let details = store.head_object("photos", "docs/in.txt").await.unwrap();
        assert_eq!(details.size, 300);
        assert_eq!(details.version_id.as_deref(), Some(NULL_VERSION_ID));
        assert_eq!(
            details.server_side_encryption,
            Some(ServerSideEncryption::Aes256)
        );
        assert_eq!(details.metadata.get("author").map(String::as_str), Some("tour"));
        assert_eq!(details.storage_class.as_deref(), Some(DEFAULT_STORAGE_CLASS));
    }

    #[tokio::test]
    async fn unversioned_overwrite_keeps_a_single_null_version() {
        let (store, dir) = temp_store().await;
        store.create_bucket("plain", "local").await.unwrap();
        let first = write_payload(dir.path(), "a.txt", "one");
        let second = write_payload(dir.path(), "b.txt", "second");

        store
            .upload_file("plain", "k", &first, &PutOptions::default())
            .await
            .unwrap();
        store
            .upload_file("plain", "k", &second, &PutOptions::default())
            .await
            .unwrap();

        let versions = store.list_object_versions("plain").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, NULL_VERSION_ID);
        assert_eq!(versions[0].size, 6);

        store.delete_object("plain", "k").await.unwrap();
        assert!(store.list_object_versions("plain").await.unwrap().is_empty());
        store.delete_bucket("plain").await.unwrap();
    }

    #[tokio::test]
    async fn versioned_delete_leaves_marker_and_history() {
        let (store, dir) = temp_store().await;
        store.create_bucket("history", "local").await.unwrap();
        store.put_bucket_versioning("history", true).await.unwrap();
        let v1 = write_payload(dir.path(), "v1.txt", "v1");
        let v2 = write_payload(dir.path(), "v2.txt", "v2-longer");

        let first = store
            .upload_file("history", "doc", &v1, &PutOptions::default())
            .await
            .unwrap();
        store
            .upload_file("history", "doc", &v2, &PutOptions::default())
            .await
            .unwrap();
        store.delete_object("history", "doc").await.unwrap();

        let versions = store.list_object_versions("history").await.unwrap();
        assert_eq!(versions.len(), 3);
        assert!(versions[0].is_delete_marker && versions[0].is_latest);
        assert!(store.list_objects("history").await.unwrap().is_empty());
        let err = store.head_object("history", "doc").await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);

        let err = store.delete_bucket("history").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotEmpty(_)));

        // Removing the marker brings the newest real version back.
        let marker = versions[0].identifier();
        store.delete_objects("history", &[marker]).await.unwrap();
        let details = store.head_object("history", "doc").await.unwrap();
        assert_eq!(details.size, 9);

        let first_id = ObjectIdentifier::versioned("doc", first.version_id.unwrap());
        let report = store.delete_objects("history", &[first_id]).await.unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(store.list_object_versions("history").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn suspended_versioning_writes_null_delete_markers() {
        let (store, dir) = temp_store().await;
        store.create_bucket("susp", "local").await.unwrap();
        store.put_bucket_versioning("susp", true).await.unwrap();
        let v1 = write_payload(dir.path(), "v1.txt", "v1");
        let v2 = write_payload(dir.path(), "v2.txt", "v2-null");

        let first = store
            .upload_file("susp", "doc", &v1, &PutOptions::default())
            .await
            .unwrap();
        let first_version = first.version_id.unwrap();
        assert_ne!(first_version, NULL_VERSION_ID);

        store.put_bucket_versioning("susp", false).await.unwrap();
        store.delete_object("susp", "doc").await.unwrap();

        let err = store.head_object("susp", "doc").await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        assert!(store.list_objects("susp").await.unwrap().is_empty());

        let versions = store.list_object_versions("susp").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_delete_marker && versions[0].is_latest);
        assert_eq!(versions[0].version_id, NULL_VERSION_ID);
        assert_eq!(versions[1].version_id, first_version);

        // A suspended upload takes over the `null` slot from the marker.
        let put = store
            .upload_file("susp", "doc", &v2, &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(put.version_id, None);
        let versions = store.list_object_versions("susp").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(!versions[0].is_delete_marker);
        assert_eq!(store.head_object("susp", "doc").await.unwrap().size, 7);

        // A second delete replaces that null version with a fresh marker.
        store.delete_object("susp", "doc").await.unwrap();
        let versions = store.list_object_versions("susp").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_delete_marker);
        assert_eq!(versions[1].version_id, first_version);
    }

    #[tokio::test]
    async fn batch_delete_rejects_oversized_and_reports_bad_keys() {
        let (store, dir) = temp_store().await;
        store.create_bucket("batchy", "local").await.unwrap();
        let payload = write_payload(dir.path(), "p.txt", "p");
        store
            .upload_file("batchy", "good", &payload, &PutOptions::default())
            .await
            .unwrap();

        let too_many: Vec<_> = (0..=MAX_DELETE_BATCH)
            .map(|i| ObjectIdentifier::new(format!("k{i}")))
            .collect();
        let err = store.delete_objects("batchy", &too_many).await.unwrap_err();
        assert!(matches!(err, StoreError::TooManyKeys { count: 1001, max: 1000 }));

        let report = store
            .delete_objects(
                "batchy",
                &[ObjectIdentifier::new("good"), ObjectIdentifier::new("../etc")],
            )
            .await
            .unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].code, "InvalidArgument");
    }

    #[tokio::test]
    async fn acl_moves_between_public_and_private() {
        let (store, dir) = temp_store().await;
        store.create_bucket("shared", "local").await.unwrap();
        store.allow_public_acls("shared").await.unwrap();
        let err = store.allow_public_acls("nobody-home").await.unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        let payload = write_payload(dir.path(), "s.txt", &"s".repeat(400));
        store
            .upload_file(
                "shared",
                "s.txt",
                &payload,
                &PutOptions::with_acl(CannedAcl::PublicRead),
            )
            .await
            .unwrap();

        let grants = store.get_object_acl("shared", "s.txt").await.unwrap();
        assert!(grants.iter().any(Grant::is_public_read));

        store
            .put_object_acl("shared", "s.txt", CannedAcl::Private)
            .await
            .unwrap();
        let grants = store.get_object_acl("shared", "s.txt").await.unwrap();
        assert_eq!(grants.len(), 1);
        assert!(!grants.iter().any(Grant::is_public_read));
    }

    #[tokio::test]
    async fn unreadable_stored_columns_are_reported() {
        let (store, dir) = temp_store().await;
        store.create_bucket("damaged", "local").await.unwrap();
        let payload = write_payload(dir.path(), "d.txt", "d");
        store
            .upload_file("damaged", "d.txt", &payload, &PutOptions::default())
            .await
            .unwrap();

        sqlx::query("UPDATE object_versions SET acl = 'everyone', metadata = 'oops'")
            .execute(&*store.db)
            .await
            .unwrap();

        let err = store.get_object_acl("damaged", "d.txt").await.unwrap_err();
        assert!(matches!(err, StoreError::Service { ref code, .. } if code == "InternalError"));
        let err = store.head_object("damaged", "d.txt").await.unwrap_err();
        assert!(err.to_string().contains("metadata"));
    }

    #[tokio::test]
    async fn copy_and_missing_resources() {
        let (store, dir) = temp_store().await;
        store.create_bucket("from-here", "local").await.unwrap();
        store.create_bucket("to-there", "local").await.unwrap();
        let payload = write_payload(dir.path(), "c.txt", "copy me");
        store
            .upload_file("from-here", "c.txt", &payload, &PutOptions::default())
            .await
            .unwrap();

        store
            .copy_object("from-here", "c.txt", "to-there", "c.txt")
            .await
            .unwrap();
        let listed = store.list_objects("to-there").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "c.txt");
        assert_eq!(listed[0].size, 7);

        let err = store
            .copy_object("from-here", "nope", "to-there", "nope")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::NotFound);
        let err = store.list_objects("never-made").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));

        // Deleting an absent key is not an error.
        store.delete_object("to-there", "absent").await.unwrap();
    }
}
