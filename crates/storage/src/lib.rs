//! Storage layer for the ingestion pipeline.
//!
//! Provides unified interfaces for:
//! - Object storage (MinIO/S3) for source files and rendered assets
//! - PostgreSQL for the per-file ingestion log and Item/Asset records
//! - Bucket path layout builders and source path parsing

pub mod ingest_log;
pub mod object_store;
pub mod paths;
pub mod records;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig};
pub use ingest_log::{IngestLog, IngestLogEntry, IngestState, LOCK_TIMEOUT_MINUTES, MAX_RETRIES};
pub use paths::{
    archive_path, asset_dir, asset_path, parse_incoming, parse_reference_time, pyramid_prefix,
    ParsedSource, WATCHED_PREFIXES,
};
pub use records::{
    media_type_for, role_for, AssetRecord, CollectionExtent, ItemRecord, MetadataStore,
};
