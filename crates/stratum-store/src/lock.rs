//! Advisory locks for cluster-wide single-flight
//!
//! The update manager takes a lock named after the updater before running
//! it, so only one holder works on a feed at a time. Two implementations:
//! process-local locks for a single deployment, and file locks for
//! replicas sharing a filesystem. File locks are released by the OS when
//! the holder dies, so a crashed replica never wedges the fleet.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

/// RAII lock hold; dropping it releases the lock
pub struct LockGuard {
    _inner: Box<dyn Send>,
}

/// Source of advisory locks keyed by name
pub trait LockSource: Send + Sync {
    /// Acquire without blocking; `None` when another holder owns the name
    fn try_lock(&self, name: &str) -> Option<LockGuard>;

    /// Acquire, blocking until the name is free
    fn lock(&self, name: &str) -> LockGuard;
}

/// In-process lock source
#[derive(Default)]
pub struct ProcessLocks {
    state: Arc<(Mutex<HashSet<String>>, Condvar)>,
}

impl ProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

struct ProcessHold {
    state: Arc<(Mutex<HashSet<String>>, Condvar)>,
    name: String,
}

impl Drop for ProcessHold {
    fn drop(&mut self) {
        let (set, cv) = &*self.state;
        set.lock().expect("lock set poisoned").remove(&self.name);
        cv.notify_all();
    }
}

impl LockSource for ProcessLocks {
    fn try_lock(&self, name: &str) -> Option<LockGuard> {
        let (set, _) = &*self.state;
        let mut held = set.lock().expect("lock set poisoned");
        if !held.insert(name.to_string()) {
            return None;
        }
        drop(held);
        Some(LockGuard {
            _inner: Box::new(ProcessHold {
                state: self.state.clone(),
                name: name.to_string(),
            }),
        })
    }

    fn lock(&self, name: &str) -> LockGuard {
        let (set, cv) = &*self.state;
        let mut held = set.lock().expect("lock set poisoned");
        while held.contains(name) {
            held = cv.wait(held).expect("lock set poisoned");
        }
        held.insert(name.to_string());
        drop(held);
        LockGuard {
            _inner: Box::new(ProcessHold {
                state: self.state.clone(),
                name: name.to_string(),
            }),
        }
    }
}

/// File-backed lock source: one lock file per name under a directory
pub struct FileLocks {
    dir: PathBuf,
}

impl FileLocks {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn open(&self, name: &str) -> std::io::Result<File> {
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            })
            .collect();
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(format!("{}.lock", safe)))
    }
}

struct FileHold {
    file: File,
}

impl Drop for FileHold {
    fn drop(&mut self) {
        // closing the descriptor also releases the lock; unlocking first
        // keeps the release prompt on platforms that buffer the close
        let _ = FileExt::unlock(&self.file);
    }
}

impl LockSource for FileLocks {
    fn try_lock(&self, name: &str) -> Option<LockGuard> {
        let file = match self.open(name) {
            Ok(f) => f,
            Err(e) => {
                warn!(name, error = %e, "failed to open lock file");
                return None;
            }
        };
        match file.try_lock_exclusive() {
            Ok(true) => {
                debug!(name, "file lock acquired");
                Some(LockGuard {
                    _inner: Box::new(FileHold { file }),
                })
            }
            Ok(false) => None,
            Err(e) => {
                warn!(name, error = %e, "failed to take file lock");
                None
            }
        }
    }

    fn lock(&self, name: &str) -> LockGuard {
        let file = self.open(name).expect("failed to open lock file");
        file.lock_exclusive().expect("failed to take file lock");
        LockGuard {
            _inner: Box::new(FileHold { file }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_try_lock_excludes() {
        let locks = ProcessLocks::new();
        let g = locks.try_lock("alpine-updater").unwrap();
        assert!(locks.try_lock("alpine-updater").is_none());
        // a different name is independent
        assert!(locks.try_lock("debian-updater").is_some());
        drop(g);
        assert!(locks.try_lock("alpine-updater").is_some());
    }

    #[test]
    fn test_process_lock_blocks_until_release() {
        let locks = Arc::new(ProcessLocks::new());
        let g = locks.lock("feed");
        let l2 = locks.clone();
        let handle = std::thread::spawn(move || {
            let _g = l2.lock("feed");
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(g);
        handle.join().unwrap();
    }

    #[test]
    fn test_file_try_lock_excludes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = FileLocks::new(tmp.path()).unwrap();
        let b = FileLocks::new(tmp.path()).unwrap();
        let g = a.try_lock("rhel-8-updater").unwrap();
        assert!(b.try_lock("rhel-8-updater").is_none());
        drop(g);
        assert!(b.try_lock("rhel-8-updater").is_some());
    }
}
