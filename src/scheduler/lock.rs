//! Filesystem lock marker preventing overlapping pipeline runs.
//!
//! The lock is advisory and host-local: it stops two invocations of the
//! local scheduler from overlapping, nothing more. Its presence is the only
//! signal; no content is read. The interface is deliberately narrow
//! (`acquire`/`release`) so it could be swapped for a database advisory
//! lock without touching the scheduler.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Errors that can occur while manipulating the lock marker.
#[derive(Debug, Error)]
pub enum LockError {
    /// IO error on the marker path.
    #[error("Lock marker {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Mutual-exclusion marker on a filesystem path.
#[derive(Debug, Clone)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Creates a guard over the given marker path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the marker is currently present.
    pub fn is_held(&self) -> bool {
        self.path.exists()
    }

    /// Creates the marker. Returns `false` without touching anything when
    /// the marker already exists.
    pub fn acquire(&self) -> Result<bool, LockError> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Removes the marker if present.
    pub fn release(&self) -> Result<(), LockError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Acquires the lock as a scoped handle that releases on drop, on every
    /// exit path including unwinding. Returns `None` when the lock is held.
    pub fn try_hold(&self) -> Result<Option<LockHandle<'_>>, LockError> {
        if self.acquire()? {
            Ok(Some(LockHandle { guard: self }))
        } else {
            Ok(None)
        }
    }
}

/// Scoped acquisition of a [`LockGuard`]; releases the marker on drop.
pub struct LockHandle<'a> {
    guard: &'a LockGuard,
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.guard.release() {
            warn!("Could not release lock marker: {}", e);
        }
    }
}
