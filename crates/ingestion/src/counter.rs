//! The process-wide unique counter.
//!
//! A single ASCII number in `<work>/counter`, incremented for every
//! staged file and every extracted artefact that asks for a unique
//! suffix. The handle is cheap to clone and serialises access
//! internally.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::error::{IngestionError, Result};

const COUNTER_WRAP: u32 = 0xffff;

#[derive(Debug, Clone)]
pub struct CounterFile {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    value: u32,
}

impl CounterFile {
    /// Open (or create) the counter file under `work_dir`.
    pub fn open(work_dir: &Path) -> Result<Self> {
        let path = work_dir.join("counter");
        let value = match fs::read_to_string(&path) {
            Ok(text) => match text.trim().parse::<u32>() {
                Ok(v) => v & COUNTER_WRAP,
                Err(_) => {
                    warn!(path = %path.display(), "counter file unreadable, restarting at 0");
                    0
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(source) => return Err(IngestionError::Io { path, source }),
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner { path, value })),
        })
    }

    /// Return the next value, wrapping at 16 bits, and persist it.
    pub fn next(&self) -> Result<u32> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.value = (inner.value + 1) & COUNTER_WRAP;
        let value = inner.value;
        fs::write(&inner.path, format!("{value}\n")).map_err(|source| IngestionError::Io {
            path: inner.path.clone(),
            source,
        })?;
        Ok(value)
    }
}
