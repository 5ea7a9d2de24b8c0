#![allow(dead_code)]
//! Objects, their versions, and the request/response shapes that carry them.

use crate::{
    errors::{StoreError, StoreResult},
    models::acl::CannedAcl,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{collections::HashMap, fmt, str::FromStr};
use uuid::Uuid;

/// Version id S3 reports for objects written while versioning is off.
pub const NULL_VERSION_ID: &str = "null";

pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";

/// One stored version (or delete marker) of an object, as persisted by the
/// local backend. The latest non-marker version is "the object".
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredVersion {
    /// Internal UUID for DB indexing; also names the payload file.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// `"null"` when written without versioning, otherwise a UUID string.
    pub version_id: String,

    pub is_latest: bool,

    /// Delete markers carry no payload.
    pub is_delete_marker: bool,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: Option<String>,

    /// Storage class (e.g., STANDARD, INFREQUENT_ACCESS).
    pub storage_class: String,

    /// Timestamp when this version was written.
    pub last_modified: DateTime<Utc>,

    /// Canned ACL applied to this version.
    pub acl: String,

    /// Server-side encryption algorithm requested at upload time.
    pub server_side_encryption: Option<String>,

    /// User metadata as a JSON object.
    pub metadata: String,
}

impl StoredVersion {
    pub fn summary(&self) -> ObjectSummary {
        ObjectSummary {
            key: self.key.clone(),
            size: self.size_bytes,
            storage_class: Some(self.storage_class.clone()),
            last_modified: Some(self.last_modified),
            etag: self.etag.clone(),
        }
    }

    pub fn version(&self) -> ObjectVersion {
        ObjectVersion {
            key: self.key.clone(),
            version_id: self.version_id.clone(),
            is_latest: self.is_latest,
            is_delete_marker: self.is_delete_marker,
            size: self.size_bytes,
            last_modified: Some(self.last_modified),
        }
    }

    /// Fails when a stored column no longer parses; the row is corrupt.
    pub fn details(&self) -> StoreResult<ObjectDetails> {
        let server_side_encryption = self
            .server_side_encryption
            .as_deref()
            .map(str::parse::<ServerSideEncryption>)
            .transpose()
            .map_err(|err| self.corrupt("server_side_encryption", err))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|err| self.corrupt("metadata", err.to_string()))?;

        Ok(ObjectDetails {
            key: self.key.clone(),
            size: self.size_bytes,
            version_id: Some(self.version_id.clone()),
            storage_class: Some(self.storage_class.clone()),
            last_modified: Some(self.last_modified),
            content_type: self.content_type.clone(),
            etag: self.etag.clone(),
            server_side_encryption,
            metadata,
        })
    }

    pub fn canned_acl(&self) -> StoreResult<CannedAcl> {
        self.acl.parse().map_err(|err| self.corrupt("acl", err))
    }

    fn corrupt(&self, column: &str, reason: String) -> StoreError {
        StoreError::Service {
            code: "InternalError".into(),
            message: format!(
                "stored {column} of `{}` (version {}) is unreadable: {reason}",
                self.key, self.version_id
            ),
        }
    }
}

/// Lightweight listing entry, as returned by "list objects".
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub storage_class: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// The full record of an object, as returned by a head request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectDetails {
    pub key: String,
    pub size: i64,
    pub version_id: Option<String>,
    pub storage_class: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub server_side_encryption: Option<ServerSideEncryption>,
    pub metadata: HashMap<String, String>,
}

/// An entry of "list object versions": a version or a delete marker.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub is_delete_marker: bool,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ObjectVersion {
    pub fn identifier(&self) -> ObjectIdentifier {
        ObjectIdentifier {
            key: self.key.clone(),
            version_id: Some(self.version_id.clone()),
        }
    }
}

/// One `{key, version_id}` entry of a batch delete.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectIdentifier {
    pub key: String,
    pub version_id: Option<String>,
}

impl ObjectIdentifier {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: None,
        }
    }

    pub fn versioned(key: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version_id: Some(version_id.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeletedObject {
    pub key: String,
    pub version_id: Option<String>,
    /// True when the delete created (or removed) a delete marker.
    pub delete_marker: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeleteFailure {
    pub key: String,
    pub version_id: Option<String>,
    pub code: String,
    pub message: String,
}

/// Per-item outcome of a single batch-delete request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DeleteReport {
    pub deleted: Vec<DeletedObject>,
    pub errors: Vec<DeleteFailure>,
}

/// Extra arguments accepted by an upload.
#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    pub acl: Option<CannedAcl>,
    pub server_side_encryption: Option<ServerSideEncryption>,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    pub fn with_acl(acl: CannedAcl) -> Self {
        Self {
            acl: Some(acl),
            ..Self::default()
        }
    }

    pub fn with_encryption(sse: ServerSideEncryption) -> Self {
        Self {
            server_side_encryption: Some(sse),
            ..Self::default()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PutOutput {
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// Server-side encryption algorithms understood by the service.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerSideEncryption {
    Aes256,
    AwsKms,
}

impl ServerSideEncryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerSideEncryption::Aes256 => "AES256",
            ServerSideEncryption::AwsKms => "aws:kms",
        }
    }
}

impl fmt::Display for ServerSideEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerSideEncryption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES256" => Ok(ServerSideEncryption::Aes256),
            "aws:kms" => Ok(ServerSideEncryption::AwsKms),
            other => Err(format!("unknown server-side encryption `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn stored(acl: &str, metadata: &str) -> StoredVersion {
        StoredVersion {
            id: Uuid::new_v4(),
            bucket_id: Uuid::new_v4(),
            key: "doc".into(),
            version_id: NULL_VERSION_ID.into(),
            is_latest: true,
            is_delete_marker: false,
            content_type: None,
            size_bytes: 3,
            etag: None,
            storage_class: DEFAULT_STORAGE_CLASS.into(),
            last_modified: Utc::now(),
            acl: acl.into(),
            server_side_encryption: Some("AES256".into()),
            metadata: metadata.into(),
        }
    }

    #[test]
    fn details_parse_stored_columns() {
        let details = stored("private", r#"{"owner":"me"}"#).details().unwrap();
        assert_eq!(details.server_side_encryption, Some(ServerSideEncryption::Aes256));
        assert_eq!(details.metadata.get("owner").map(String::as_str), Some("me"));
    }

    #[test]
    fn corrupt_columns_surface_as_errors() {
        let err = stored("private", "not json").details().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.to_string().contains("metadata"));

        let err = stored("world-writable", "{}").canned_acl().unwrap_err();
        assert!(matches!(err, StoreError::Service { ref code, .. } if code == "InternalError"));
        assert!(err.to_string().contains("world-writable"));
    }
}
