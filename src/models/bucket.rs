//! Buckets: top-level, region-scoped containers for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket row as persisted by the local backend.
///
/// The owner id doubles as the canonical-user id that appears in ACL grants
/// for objects in this bucket.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Globally unique bucket name (must conform to DNS naming rules).
    pub name: String,

    /// Canonical id of the account that owns this bucket.
    pub owner_id: Uuid,

    /// Region where the bucket was created (e.g. "us-west-2").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,

    /// Versioning state; see [`VersioningState`].
    pub versioning: VersioningState,
}

/// Bucket versioning as S3 models it. A bucket starts unversioned; once
/// versioning has been enabled it can only be suspended, never turned off.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum VersioningState {
    #[default]
    Unversioned,
    Enabled,
    Suspended,
}

impl VersioningState {
    /// State after a "put bucket versioning" request with `enabled`.
    pub fn apply(self, enabled: bool) -> Self {
        match (self, enabled) {
            (_, true) => VersioningState::Enabled,
            (VersioningState::Unversioned, false) => VersioningState::Unversioned,
            (_, false) => VersioningState::Suspended,
        }
    }

    /// New writes get a fresh version id only while versioning is enabled;
    /// otherwise they land on the `null` version.
    pub fn assigns_version_ids(self) -> bool {
        self == VersioningState::Enabled
    }

    /// A simple delete leaves a delete marker once versioning has ever been on.
    pub fn keeps_history(self) -> bool {
        self != VersioningState::Unversioned
    }
}

/// A bucket as reported by a "list buckets" call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BucketInfo {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Only some backends report the region in listings.
    pub region: Option<String>,
}

impl From<Bucket> for BucketInfo {
    fn from(bucket: Bucket) -> Self {
        Self {
            name: bucket.name,
            created_at: Some(bucket.created_at),
            region: Some(bucket.region),
        }
    }
}

/// The service's answer to a "create bucket" request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CreateBucketOutput {
    pub name: String,
    /// `Location` returned by the service, e.g. `/my-bucket` or a full URL.
    pub location: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioning_can_be_suspended_but_not_undone() {
        let state = VersioningState::default();
        assert_eq!(state.apply(false), VersioningState::Unversioned);

        let enabled = state.apply(true);
        assert!(enabled.assigns_version_ids());
        assert!(enabled.keeps_history());

        let suspended = enabled.apply(false);
        assert_eq!(suspended, VersioningState::Suspended);
        assert!(!suspended.assigns_version_ids());
        assert!(suspended.keeps_history());
        assert_eq!(suspended.apply(true), VersioningState::Enabled);
    }
}
