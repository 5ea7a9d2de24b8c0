//! Storage clients and the bucket-level helpers built on them.

pub mod bucket_ops;
pub mod local_store;
pub mod s3_store;
pub mod store;
