//! File ingestion core.
//!
//! Directory watchers hand batches of candidate filenames to
//! [`pipeline::ingest_batch`], which filters, de-duplicates and publishes
//! them into the staging pool, optionally splitting WMO bulletin files
//! into their constituent messages on the way.

pub mod chown;
pub mod counter;
pub mod dupcheck;
pub mod entry;
pub mod error;
pub mod gating;
pub mod logs;
pub mod pipeline;
pub mod retrieval;
pub mod staging;

pub use entry::{DirectoryEntry, DupActions, DupCheckPolicy, DupFingerprint};
pub use error::{IngestionError, Result};
pub use pipeline::{ingest_batch, IngestContext, WatchList};
pub use staging::DISK_FULL_RESCAN_TIME;
