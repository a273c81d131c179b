//! Ownership fixing for staged files.
//!
//! When the kernel protects hardlinks, a staged file owned by another uid
//! cannot be hardlinked by the transfer side, so it is chowned to the
//! process uid. The capability state is process-global, acquired lazily
//! and released at the end of each batch. A permission failure is sticky:
//! once `PermanentIncorrect` is reached no further chown is attempted.

use std::path::Path;

use tracing::{debug, warn};

/// Capability state. Transitions move only toward `PermanentIncorrect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChownState {
    /// Capability not yet acquired.
    No,
    /// Capability acquired for the current batch.
    Yes,
    /// Ownership fixing is unnecessary on this system.
    Neither,
    /// A chown failed with a permission error. No further attempts.
    PermanentIncorrect,
}

#[derive(Debug)]
pub struct ChownCapability {
    state: ChownState,
    process_uid: u32,
}

impl ChownCapability {
    #[cfg(unix)]
    pub fn new() -> Self {
        Self {
            state: ChownState::No,
            process_uid: unsafe { libc::geteuid() } as u32,
        }
    }

    #[cfg(not(unix))]
    pub fn new() -> Self {
        Self {
            state: ChownState::Neither,
            process_uid: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_uid(process_uid: u32) -> Self {
        Self {
            state: ChownState::No,
            process_uid,
        }
    }

    pub fn state(&self) -> ChownState {
        self.state
    }

    /// Fix the staged file's ownership when its uid differs from ours.
    #[cfg(unix)]
    pub fn apply(&mut self, path: &Path, file_uid: u32) {
        if file_uid == self.process_uid {
            return;
        }
        match self.state {
            ChownState::Neither | ChownState::PermanentIncorrect => return,
            ChownState::No => {
                self.state = ChownState::Yes;
            }
            ChownState::Yes => {}
        }
        match std::os::unix::fs::chown(path, Some(self.process_uid), None) {
            Ok(()) => {
                debug!(path = %path.display(), "fixed ownership of staged file");
            }
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                warn!(
                    path = %path.display(),
                    "cannot change ownership of staged files, disabling ownership fixing"
                );
                self.state = ChownState::PermanentIncorrect;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "chown of staged file failed");
            }
        }
    }

    #[cfg(not(unix))]
    pub fn apply(&mut self, _path: &Path, _file_uid: u32) {}

    /// Drop the capability at the end of a batch. The sticky failure
    /// state survives.
    pub fn release(&mut self) {
        if self.state == ChownState::Yes {
            self.state = ChownState::No;
        }
    }
}

impl Default for ChownCapability {
    fn default() -> Self {
        Self::new()
    }
}
