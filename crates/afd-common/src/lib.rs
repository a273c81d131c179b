//! Shared types for the AFD ingestion services.
//!
//! Holds the pieces every other crate needs: the common error type, the
//! file-mask dialect used by directory filters and extractor filters, the
//! per-directory runtime status shared with the watcher daemon, and the
//! event kinds raised when a directory enters or leaves an error state.

pub mod error;
pub mod events;
pub mod mask;
pub mod status;

pub use error::{AfdError, AfdResult};
pub use events::{EventKind, EventSink};
pub use mask::{wanted, Mask, MaskGroup};
pub use status::{DirFlags, DirectoryRuntimeStatus, SharedStatus};
