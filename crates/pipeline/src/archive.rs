//! Archive stage: bundles a directory of rendered loops into one zip file.

use crate::error::PipelineError;
use crate::replace::remove_path;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_EXTENSION: &str = "zip";

/// `<base>.zip`, appended so dots already in the base name survive
pub fn archive_path_for(archive_base: &Path) -> PathBuf {
    let mut path = archive_base.as_os_str().to_owned();
    path.push(".");
    path.push(ARCHIVE_EXTENSION);
    PathBuf::from(path)
}

/// Compress everything under `source_dir` into `<archive_base>.zip`.
///
/// Entry names are relative to `source_dir`. Once the archive is written,
/// `source_dir` is removed; failing to remove it is only logged. If the
/// archive cannot be written the partial file is deleted and `source_dir`
/// is left untouched.
pub fn archive(source_dir: &Path, archive_base: &Path) -> Result<PathBuf, PipelineError> {
    let archive_path = archive_path_for(archive_base);

    if let Err(e) = write_archive(source_dir, &archive_path) {
        if let Err(cleanup) = remove_path(&archive_path) {
            warn!(path = %archive_path.display(), error = %cleanup, "failed to remove partial archive");
        }
        return Err(e);
    }

    info!(archive = %archive_path.display(), "archive written");

    if let Err(e) = fs::remove_dir_all(source_dir) {
        warn!(path = %source_dir.display(), error = %e, "failed to remove archived directory");
    }

    Ok(archive_path)
}

fn write_archive(source_dir: &Path, archive_path: &Path) -> Result<(), PipelineError> {
    if !source_dir.is_dir() {
        return Err(PipelineError::Archive(format!(
            "{} is not a directory",
            source_dir.display()
        )));
    }

    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent).map_err(archive_error)?;
    }

    let file = File::create(archive_path).map_err(archive_error)?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| PipelineError::Archive(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| PipelineError::Archive(e.to_string()))?;
        } else {
            writer
                .start_file(name, options)
                .map_err(|e| PipelineError::Archive(e.to_string()))?;
            let mut input = File::open(entry.path()).map_err(archive_error)?;
            io::copy(&mut input, &mut writer).map_err(archive_error)?;
        }
    }

    writer
        .finish()
        .map_err(|e| PipelineError::Archive(e.to_string()))?;
    Ok(())
}

fn archive_error(e: io::Error) -> PipelineError {
    PipelineError::Archive(e.to_string())
}
