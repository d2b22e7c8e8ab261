//! File replacement and best-effort removal in the working area.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Sibling path used while a stage rewrites `path`: `<stem>_<tag>.<ext>`.
///
/// The extension is kept so the encoder can pick the muxer from it.
pub fn sibling_path(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, tag, ext.to_string_lossy()),
        None => format!("{}_{}", stem, tag),
    };
    path.with_file_name(name)
}

/// Moves `replacement` over `target`.
///
/// Renames when possible. When a rename is refused (cross-filesystem moves)
/// the content is copied next to `target` and renamed from there, so
/// `target` is never half-written either way.
pub fn replace_file(replacement: &Path, target: &Path) -> io::Result<()> {
    if fs::rename(replacement, target).is_ok() {
        return Ok(());
    }
    copy_then_rename(replacement, target)
}

fn copy_then_rename(replacement: &Path, target: &Path) -> io::Result<()> {
    let staged = sibling_path(target, "incoming");
    if let Err(e) = fs::copy(replacement, &staged).and_then(|_| fs::rename(&staged, target)) {
        if let Err(cleanup) = remove_path(&staged) {
            warn!(path = %staged.display(), error = %cleanup, "failed to remove staged copy");
        }
        return Err(e);
    }
    fs::remove_file(replacement)
}

/// Deletes a file or directory tree; an already-absent path counts as removed.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
