//! Transient descriptors for buckets, objects and ACLs.
//!
//! Nothing here is a long-lived in-memory model: the storage service owns
//! every entity and these types only carry what a call returned. Rows of the
//! local backend map onto them via `sqlx::FromRow`; all of them serialize via
//! `serde` so they can be logged as structured fields.

pub mod acl;
pub mod bucket;
pub mod object;
