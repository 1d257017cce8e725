//! Folder archiving.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::HubError;

/// Path of the archive [`zip_folder`] writes for `dir`: a sibling named
/// `<dir>.zip`.
pub fn archive_path(dir: &Path) -> PathBuf {
    let mut name = dir.as_os_str().to_owned();
    name.push(".zip");
    PathBuf::from(name)
}

/// Deflate every file under `dir` into `<dir>.zip`. Entry names are
/// relative to `dir` and always use `/` separators. Empty directories
/// are kept as directory entries and symlinks are followed. A partial
/// archive is removed when anything fails.
pub fn zip_folder(dir: &Path) -> Result<PathBuf, HubError> {
    let dir: PathBuf = dir.components().collect();
    let zip_path = archive_path(&dir);
    let file = File::create(&zip_path).map_err(|e| HubError::io(&zip_path, e))?;

    match write_archive(&dir, &zip_path, file) {
        Ok(files) => {
            tracing::info!(source = %dir.display(), archive = %zip_path.display(), files, "Folder archived");
            Ok(zip_path)
        }
        Err(e) => {
            if let Err(remove) = std::fs::remove_file(&zip_path) {
                tracing::warn!(archive = %zip_path.display(), error = %remove, "Failed to remove partial archive");
            }
            Err(e)
        }
    }
}

/// Returns the number of files written.
fn write_archive(dir: &Path, zip_path: &Path, file: File) -> Result<usize, HubError> {
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = 0usize;
    for entry in WalkDir::new(dir).min_depth(1).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|source| HubError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(dir) else {
            continue;
        };
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            writer.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            let bytes = std::fs::read(path).map_err(|e| HubError::io(path, e))?;
            writer.start_file(name, options)?;
            writer.write_all(&bytes).map_err(|e| HubError::io(zip_path, e))?;
            files += 1;
        }
    }
    writer.finish()?;
    Ok(files)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
