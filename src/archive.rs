//! tar.gz archiving of restored files
//!
//! Entries are the contents of the source directory at their relative paths.
//! The source directory itself is never an entry, so unpacking the archive
//! anywhere reproduces the restored tree without an extra leading directory.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;
use walkdir::WalkDir;

use restore_task_common::Error;

/// Archive `source` into `dest_dir/file_name`
///
/// Runs on the blocking pool. Returns the path of the created archive.
pub async fn archive_dir(source: &Path, dest_dir: &Path, file_name: &str) -> Result<PathBuf, Error> {
    let source = source.to_path_buf();
    let dest = dest_dir.join(file_name);
    tokio::task::spawn_blocking(move || {
        write_archive(&source, &dest)?;
        Ok(dest)
    })
    .await
    .map_err(|e| Error::internal_with_context("archive", e.to_string()))?
}

/// Write a gzip-compressed tar of the contents of `source` to `dest`
pub fn write_archive(source: &Path, dest: &Path) -> Result<(), Error> {
    let meta = std::fs::metadata(source).map_err(|e| {
        Error::archive(
            "stat",
            format!("invalid restore target {}: {}", source.display(), e),
        )
    })?;
    if !meta.is_dir() {
        return Err(Error::archive(
            "stat",
            format!("invalid restore target {}: not a directory", source.display()),
        ));
    }

    let entries = collect_entries(source)?;

    let file = File::create(dest).map_err(|e| {
        Error::archive(
            "create",
            format!("failed to create archive {}: {}", dest.display(), e),
        )
    })?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let compress_err =
        |e: std::io::Error| Error::archive("compress", format!("failed to archive restore: {}", e));

    for (path, relative) in &entries {
        if path.is_dir() && !path.is_symlink() {
            builder.append_dir(relative, path).map_err(compress_err)?;
        } else {
            builder
                .append_path_with_name(path, relative)
                .map_err(compress_err)?;
        }
    }
    debug!(entries = entries.len(), archive = %dest.display(), "Archived restored files");

    let mut writer = builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(compress_err)?;
    writer.flush().map_err(compress_err)?;
    Ok(())
}

/// Every path below `source` with its path relative to `source`, in sorted order
fn collect_entries(source: &Path) -> Result<Vec<(PathBuf, PathBuf)>, Error> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(source)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            Error::archive("walk", format!("failed to parse restore target files: {}", e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::archive("walk", e.to_string()))?
            .to_path_buf();
        entries.push((entry.into_path(), relative));
    }
    Ok(entries)
}

/// Format a byte count with decimal units, as in "4.2 MB"
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if value < 10.0 {
        format!("{:.1} {}", value, UNITS[unit])
    } else {
        format!("{:.0} {}", value, UNITS[unit])
    }
}
