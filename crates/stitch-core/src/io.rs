use crate::error::Result;
use fs2::FileExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting state files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

fn lock_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    target.with_file_name(format!(".{name}.lock"))
}

/// Run `f` while holding an exclusive advisory lock scoped to `target`.
///
/// The lock lives on a sidecar file rather than `target` itself: atomic
/// rename-over-target would otherwise swap the locked inode out from under
/// a waiting process. Blocking on a held lock is legitimate wait, not an
/// error. Locks are host-local; multi-host writers are unsupported.
pub fn with_file_lock<T>(target: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path_for(target))?;
    lock_file.lock_exclusive()?;
    let result = f();
    let _ = fs2::FileExt::unlock(&lock_file);
    result
}
