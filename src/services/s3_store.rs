//! `ObjectStore` over the AWS SDK.
//!
//! Every method is one SDK call (or one paging loop of them). Credentials,
//! signing, retries and endpoint resolution stay inside the SDK; this file
//! only shapes requests and maps responses and error codes onto our types.

use crate::{
    errors::{StoreError, StoreResult},
    models::{
        acl::{CannedAcl, Grant, Grantee},
        bucket::{BucketInfo, CreateBucketOutput},
        object::{
            DeleteFailure, DeleteReport, DeletedObject, NULL_VERSION_ID, ObjectDetails,
            ObjectIdentifier, ObjectSummary, ObjectVersion, PutOptions, PutOutput,
        },
    },
    services::store::{MAX_DELETE_BATCH, ObjectStore},
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::Region,
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    operation::{
        delete_objects::DeleteObjectsOutput, list_object_versions::ListObjectVersionsOutput,
        list_objects_v2::ListObjectsV2Output,
    },
    primitives::{ByteStream, DateTime as SdkDateTime},
    types::{
        BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
        ObjectCannedAcl, ObjectOwnership, ServerSideEncryption as SdkServerSideEncryption,
        Type as GranteeType, VersioningConfiguration,
    },
};
use chrono::{DateTime, Utc};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{io, path::Path};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, instrument};

/// The one region in which S3 rejects an explicit location constraint.
const DEFAULT_S3_REGION: &str = "us-east-1";

/// Key bytes left as-is in `x-amz-copy-source`; everything else is escaped.
const COPY_SOURCE_KEY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    region: String,
}

impl S3Store {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    ///
    /// `region` overrides the provider chain. `endpoint_url` points the client
    /// at an S3-compatible service and switches to path-style addressing.
    #[instrument]
    pub async fn from_env(region: Option<&str>, endpoint_url: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;

        let region = sdk_config
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint_url {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        debug!(%region, "built S3 client");
        Self::new(Client::from_conf(s3_config_builder.build()), region)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn region(&self) -> &str {
        &self.region
    }

    async fn create_bucket(&self, name: &str, region: &str) -> StoreResult<CreateBucketOutput> {
        // New buckets default to BucketOwnerEnforced, which rejects every ACL.
        let mut request = self
            .client
            .create_bucket()
            .bucket(name)
            .object_ownership(ObjectOwnership::ObjectWriter);
        if region != DEFAULT_S3_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        let output = request
            .send()
            .await
            .map_err(|err| map_sdk_error(err, name, None))?;

        Ok(CreateBucketOutput {
            name: name.to_string(),
            location: output.location().map(str::to_string),
        })
    }

    async fn put_bucket_versioning(&self, bucket: &str, enabled: bool) -> StoreResult<()> {
        let status = if enabled {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;
        Ok(())
    }

    async fn allow_public_acls(&self, bucket: &str) -> StoreResult<()> {
        let result = self
            .client
            .delete_public_access_block()
            .bucket(bucket)
            .send()
            .await;
        match result {
            Ok(_) => debug!(bucket, "removed public access block"),
            Err(err) if err.code() == Some("NoSuchPublicAccessBlockConfiguration") => {
                debug!(bucket, "bucket has no public access block");
            }
            Err(err) => return Err(map_sdk_error(err, bucket, None)),
        }
        Ok(())
    }

    async fn list_buckets(&self) -> StoreResult<Vec<BucketInfo>> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|err| map_sdk_error(err, "", None))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| {
                bucket.name().map(|name| BucketInfo {
                    name: name.to_string(),
                    created_at: bucket.creation_date().and_then(to_chrono),
                    region: None,
                })
            })
            .collect())
    }

    async fn delete_bucket(&self, name: &str) -> StoreResult<()> {
        self.client
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, name, None))?;
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StoreResult<PutOutput> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| StoreError::Io(io::Error::other(err)))?;

        let mut request = self.client.put_object().bucket(bucket).key(key).body(body);
        if let Some(acl) = options.acl {
            request = request.acl(ObjectCannedAcl::from(acl.as_str()));
        }
        if let Some(sse) = options.server_side_encryption {
            request = request.server_side_encryption(SdkServerSideEncryption::from(sse.as_str()));
        }
        if let Some(content_type) = &options.content_type {
            request = request.content_type(content_type);
        }
        for (name, value) in &options.metadata {
            request = request.metadata(name, value);
        }

        let output = request
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;

        Ok(PutOutput {
            etag: output.e_tag().map(trim_etag),
            version_id: output.version_id().map(str::to_string),
        })
    }

    async fn download_file(&self, bucket: &str, key: &str, dest: &Path) -> StoreResult<u64> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut target = File::create(dest).await?;
        let mut body = output.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|err| StoreError::Io(io::Error::other(err)))?
        {
            target.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
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
        self.client
            .copy_object()
            .copy_source(copy_source(src_bucket, src_key))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, src_bucket, Some(src_key)))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> StoreResult<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|err| map_sdk_error(err, bucket, None))?;

            let (page, next) = object_page(&output);
            objects.extend(page);
            match next {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectDetails> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;

        Ok(ObjectDetails {
            key: key.to_string(),
            size: output.content_length().unwrap_or_default(),
            version_id: output.version_id().map(str::to_string),
            // HEAD omits the storage class for STANDARD objects.
            storage_class: Some(
                output
                    .storage_class()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "STANDARD".to_string()),
            ),
            last_modified: output.last_modified().and_then(to_chrono),
            content_type: output.content_type().map(str::to_string),
            etag: output.e_tag().map(trim_etag),
            server_side_encryption: output
                .server_side_encryption()
                .and_then(|sse| sse.as_str().parse().ok()),
            metadata: output.metadata().cloned().unwrap_or_default(),
        })
    }

    async fn get_object_acl(&self, bucket: &str, key: &str) -> StoreResult<Vec<Grant>> {
        let output = self
            .client
            .get_object_acl()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;

        Ok(output.grants().iter().filter_map(convert_grant).collect())
    }

    async fn put_object_acl(&self, bucket: &str, key: &str, acl: CannedAcl) -> StoreResult<()> {
        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(acl.as_str()))
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, Some(key)))?;
        Ok(())
    }

    async fn list_object_versions(&self, bucket: &str) -> StoreResult<Vec<ObjectVersion>> {
        let mut versions = Vec::new();
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;
        loop {
            let output = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
                .map_err(|err| map_sdk_error(err, bucket, None))?;

            let (page, next) = version_page(&output);
            versions.extend(page);
            match next {
                Some((key, version_id)) => {
                    key_marker = Some(key);
                    version_id_marker = version_id;
                }
                None => break,
            }
        }
        Ok(versions)
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

        let identifiers = objects
            .iter()
            .map(|id| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(&id.key)
                    .set_version_id(id.version_id.clone())
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::MalformedRequest(err.to_string()))?;
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .build()
            .map_err(|err| StoreError::MalformedRequest(err.to_string()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| map_sdk_error(err, bucket, None))?;

        Ok(delete_report(&output))
    }
}

/// Entries of one `ListObjectsV2` page, plus the continuation token when
/// another page follows.
fn object_page(output: &ListObjectsV2Output) -> (Vec<ObjectSummary>, Option<String>) {
    let objects = output
        .contents()
        .iter()
        .filter_map(|obj| {
            Some(ObjectSummary {
                key: obj.key()?.to_string(),
                size: obj.size().unwrap_or_default(),
                storage_class: obj.storage_class().map(|c| c.as_str().to_string()),
                last_modified: obj.last_modified().and_then(to_chrono),
                etag: obj.e_tag().map(trim_etag),
            })
        })
        .collect();

    let next = match output.is_truncated() {
        Some(false) => None,
        _ => output.next_continuation_token().map(str::to_string),
    };
    (objects, next)
}

/// Versions and delete markers of one `ListObjectVersions` page, plus the
/// key and version-id markers when the listing is truncated.
fn version_page(
    output: &ListObjectVersionsOutput,
) -> (Vec<ObjectVersion>, Option<(String, Option<String>)>) {
    let versions = output.versions().iter().filter_map(|version| {
        Some(ObjectVersion {
            key: version.key()?.to_string(),
            version_id: version.version_id().unwrap_or(NULL_VERSION_ID).to_string(),
            is_latest: version.is_latest().unwrap_or(false),
            is_delete_marker: false,
            size: version.size().unwrap_or_default(),
            last_modified: version.last_modified().and_then(to_chrono),
        })
    });
    let markers = output.delete_markers().iter().filter_map(|marker| {
        Some(ObjectVersion {
            key: marker.key()?.to_string(),
            version_id: marker.version_id().unwrap_or(NULL_VERSION_ID).to_string(),
            is_latest: marker.is_latest().unwrap_or(false),
            is_delete_marker: true,
            size: 0,
            last_modified: marker.last_modified().and_then(to_chrono),
        })
    });
    let entries = versions.chain(markers).collect();

    if output.is_truncated() != Some(true) {
        return (entries, None);
    }
    let next = output.next_key_marker().map(|key| {
        (
            key.to_string(),
            output.next_version_id_marker().map(str::to_string),
        )
    });
    (entries, next)
}

fn delete_report(output: &DeleteObjectsOutput) -> DeleteReport {
    DeleteReport {
        deleted: output
            .deleted()
            .iter()
            .map(|d| DeletedObject {
                key: d.key().unwrap_or_default().to_string(),
                version_id: d.version_id().map(str::to_string),
                delete_marker: d.delete_marker().unwrap_or(false),
            })
            .collect(),
        errors: output
            .errors()
            .iter()
            .map(|e| DeleteFailure {
                key: e.key().unwrap_or_default().to_string(),
                version_id: e.version_id().map(str::to_string),
                code: e.code().unwrap_or("Unknown").to_string(),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect(),
    }
}

/// `bucket/key` with the key percent-encoded, as `x-amz-copy-source` expects.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_KEY))
}

/// Translate an SDK failure into a `StoreError`, keyed on the service's
/// error code.
fn map_sdk_error<E, R>(err: SdkError<E, R>, bucket: &str, key: Option<&str>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    debug!(?code, %message, bucket, ?key, "storage service error");
    classify(code.as_deref(), message, bucket, key)
}

fn classify(code: Option<&str>, message: String, bucket: &str, key: Option<&str>) -> StoreError {
    let Some(code) = code else {
        return StoreError::Service {
            code: "Unknown".into(),
            message,
        };
    };
    match code {
        "NoSuchBucket" => StoreError::BucketNotFound(bucket.to_string()),
        "NoSuchKey" | "NotFound" => StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.unwrap_or_default().to_string(),
        },
        "NoSuchVersion" => StoreError::VersionNotFound {
            bucket: bucket.to_string(),
            key: key.unwrap_or_default().to_string(),
        },
        "AccessDenied" | "AllAccessDisabled" | "AccessControlListNotSupported" => {
            StoreError::AccessDenied(message)
        }
        "BucketAlreadyExists" | "BucketAlreadyOwnedByYou" => {
            StoreError::BucketAlreadyExists(bucket.to_string())
        }
        "BucketNotEmpty" => StoreError::BucketNotEmpty(bucket.to_string()),
        "InvalidBucketName" => StoreError::InvalidBucketName {
            name: bucket.to_string(),
            reason: message,
        },
        "InvalidLocationConstraint" | "IllegalLocationConstraintException" => {
            StoreError::UnsupportedRegion(message)
        }
        "MalformedXML" | "InvalidRequest" | "InvalidArgument" | "EntityTooLarge" => {
            StoreError::MalformedRequest(message)
        }
        other => StoreError::Service {
            code: other.to_string(),
            message,
        },
    }
}

fn convert_grant(grant: &aws_sdk_s3::types::Grant) -> Option<Grant> {
    let grantee = grant.grantee()?;
    let permission = grant.permission()?.as_str().parse().ok()?;
    let grantee = match grantee.r#type() {
        GranteeType::CanonicalUser => Grantee::CanonicalUser {
            id: grantee.id()?.to_string(),
            display_name: grantee.display_name().map(str::to_string),
        },
        GranteeType::Group => Grantee::Group {
            uri: grantee.uri()?.to_string(),
        },
        GranteeType::AmazonCustomerByEmail => Grantee::Email {
            address: grantee.email_address()?.to_string(),
        },
        _ => return None,
    };
    Some(Grant {
        grantee,
        permission,
    })
}

fn to_chrono(dt: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// The service quotes ETags; the rest of the crate uses bare hex.
fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}
