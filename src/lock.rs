use fs2::FileExt;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

/// Keys currently held by some thread of this process.
static HELD: Lazy<(Mutex<HashSet<String>>, Condvar)> =
    Lazy::new(|| (Mutex::new(HashSet::new()), Condvar::new()));

/// Exclusive ownership of one cache identity, within this process (keyed set)
/// and across processes (`fs2` lock on a sidecar file). Released on drop.
///
/// The lock file is left in place: removing it would let a waiter lock an
/// unlinked inode while a newcomer locks a fresh file under the same name.
#[derive(Debug)]
pub struct IdentityLock {
    key: String,
    file: File,
    path: PathBuf,
}

impl IdentityLock {
    /// Block until `key` is free in this process and `lock_path` can be locked exclusively.
    pub fn acquire(key: &str, lock_path: &Path) -> io::Result<IdentityLock> {
        {
            let (set, cvar) = &*HELD;
            let mut held = set.lock().unwrap_or_else(PoisonError::into_inner);
            while held.contains(key) {
                held = cvar.wait(held).unwrap_or_else(PoisonError::into_inner);
            }
            held.insert(key.to_string());
        }

        match open_locked(lock_path) {
            Ok(file) => Ok(IdentityLock {
                key: key.to_string(),
                file,
                path: lock_path.to_path_buf(),
            }),
            Err(e) => {
                release_key(key);
                Err(e)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_locked(p: &Path) -> io::Result<File> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent)?;
    }
    let f = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(p)?;
    f.lock_exclusive()?;
    Ok(f)
}

fn release_key(key: &str) {
    let (set, cvar) = &*HELD;
    let mut held = set.lock().unwrap_or_else(PoisonError::into_inner);
    held.remove(key);
    cvar.notify_all();
}

impl Drop for IdentityLock {
    fn drop(&mut self) {
        // Best-effort unlock; ignore errors
        let _ = self.file.unlock();
        release_key(&self.key);
    }
}
