//! Per-service rollout locks.
//!
//! A lock is held from the first readiness poll until supervision ends.
//! Within a process the registry is a shared set; across processes (two CI
//! jobs promoting the same service) an optional lock directory holds one
//! `create_new` file per service.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use cutover_core::ServiceRef;

use crate::error::{RolloutError, RolloutResult};

#[derive(Clone, Default)]
pub struct ServiceLocks {
    held: Arc<Mutex<HashSet<String>>>,
    dir: Option<PathBuf>,
}

impl ServiceLocks {
    /// In-process locks only.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-process locks plus lock files under `dir`.
    pub fn with_dir(dir: &Path) -> Self {
        Self {
            held: Arc::default(),
            dir: Some(dir.to_path_buf()),
        }
    }

    /// Take the lock for `service` or fail immediately.
    pub fn try_acquire(&self, service: &ServiceRef) -> RolloutResult<ServiceLockGuard> {
        let key = service.key();
        {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            if !held.insert(key.clone()) {
                return Err(RolloutError::RolloutInProgress { service: key });
            }
        }

        let file = match &self.dir {
            Some(dir) => match create_lock_file(dir, service) {
                Ok(path) => Some(path),
                Err(e) => {
                    self.release(&key);
                    return Err(e);
                }
            },
            None => None,
        };

        debug!(service = %key, "rollout lock acquired");
        Ok(ServiceLockGuard {
            locks: self.clone(),
            key,
            file,
        })
    }

    pub fn is_held(&self, service: &ServiceRef) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&service.key())
    }

    fn release(&self, key: &str) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

fn lock_file_path(dir: &Path, service: &ServiceRef) -> PathBuf {
    dir.join(format!("{}_{}.lock", service.namespace, service.name))
}

fn create_lock_file(dir: &Path, service: &ServiceRef) -> RolloutResult<PathBuf> {
    let path = lock_file_path(dir, service);
    let busy = |e: std::io::Error| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            warn!(lock = %path.display(), "lock file present; remove it if no rollout is running");
            RolloutError::RolloutInProgress {
                service: service.key(),
            }
        } else {
            RolloutError::Lock(format!("cannot create {}: {e}", path.display()))
        }
    };
    std::fs::create_dir_all(dir).map_err(busy)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(busy)?;
    let _ = writeln!(file, "{}", std::process::id());
    Ok(path)
}

/// Releases the service lock on drop.
pub struct ServiceLockGuard {
    locks: ServiceLocks,
    key: String,
    file: Option<PathBuf>,
}

impl Drop for ServiceLockGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.file {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(lock = %path.display(), error = %e, "failed to remove lock file");
            }
        }
        self.locks.release(&self.key);
        debug!(service = %self.key, "rollout lock released");
    }
}
