//! Access-control lists: canned ACLs and the grants they expand to.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const ALL_USERS_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
pub const AUTHENTICATED_USERS_URI: &str =
    "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

/// Named ACL presets accepted on upload and by "put object ACL".
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CannedAcl {
    #[default]
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CannedAcl::Private => "private",
            CannedAcl::PublicRead => "public-read",
            CannedAcl::PublicReadWrite => "public-read-write",
            CannedAcl::AuthenticatedRead => "authenticated-read",
        }
    }

    /// Expand into the grant list the service reports for an object owned by
    /// `owner_id`.
    pub fn grants(&self, owner_id: &str) -> Vec<Grant> {
        let mut grants = vec![Grant {
            grantee: Grantee::CanonicalUser {
                id: owner_id.to_string(),
                display_name: None,
            },
            permission: Permission::FullControl,
        }];
        let group = |uri: &str, permission| Grant {
            grantee: Grantee::Group {
                uri: uri.to_string(),
            },
            permission,
        };
        match self {
            CannedAcl::Private => {}
            CannedAcl::PublicRead => grants.push(group(ALL_USERS_URI, Permission::Read)),
            CannedAcl::PublicReadWrite => {
                grants.push(group(ALL_USERS_URI, Permission::Read));
                grants.push(group(ALL_USERS_URI, Permission::Write));
            }
            CannedAcl::AuthenticatedRead => {
                grants.push(group(AUTHENTICATED_USERS_URI, Permission::Read))
            }
        }
        grants
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CannedAcl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(CannedAcl::Private),
            "public-read" => Ok(CannedAcl::PublicRead),
            "public-read-write" => Ok(CannedAcl::PublicReadWrite),
            "authenticated-read" => Ok(CannedAcl::AuthenticatedRead),
            other => Err(format!("unknown canned ACL `{other}`")),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Grantee {
    CanonicalUser {
        id: String,
        display_name: Option<String>,
    },
    Group {
        uri: String,
    },
    Email {
        address: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    FullControl,
    Read,
    Write,
    ReadAcp,
    WriteAcp,
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL_CONTROL" => Ok(Permission::FullControl),
            "READ" => Ok(Permission::Read),
            "WRITE" => Ok(Permission::Write),
            "READ_ACP" => Ok(Permission::ReadAcp),
            "WRITE_ACP" => Ok(Permission::WriteAcp),
            other => Err(format!("unknown permission `{other}`")),
        }
    }
}

/// A single (grantee, permission) pair of an object's ACL.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Grant {
    pub grantee: Grantee,
    pub permission: Permission,
}

impl Grant {
    /// True if this grant lets anonymous users read the object.
    pub fn is_public_read(&self) -> bool {
        matches!(&self.grantee, Grantee::Group { uri } if uri == ALL_USERS_URI)
            && matches!(self.permission, Permission::Read | Permission::FullControl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_read_adds_all_users_read() {
        let grants = CannedAcl::PublicRead.grants("owner");
        assert_eq!(grants.len(), 2);
        assert!(grants.iter().any(Grant::is_public_read));
        assert!(!CannedAcl::Private.grants("owner").iter().any(Grant::is_public_read));
    }

    #[test]
    fn authenticated_read_is_not_public() {
        let grants = CannedAcl::AuthenticatedRead.grants("owner");
        assert!(!grants.iter().any(Grant::is_public_read));
        assert!(grants.iter().any(|g| matches!(
            &g.grantee,
            Grantee::Group { uri } if uri == AUTHENTICATED_USERS_URI
        )));
    }

    #[test]
    fn canned_acl_parses_wire_names() {
        assert_eq!("public-read".parse::<CannedAcl>(), Ok(CannedAcl::PublicRead));
        assert!("world-writable".parse::<CannedAcl>().is_err());
    }
}
