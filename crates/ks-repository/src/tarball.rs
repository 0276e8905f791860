//! Snapshot archives: gzip-compressed tarballs whose entries all live under a directory
//! named after the archive, e.g. `abc123.tar.gz` holds `abc123/train.py`.

use crate::walk::{files_to_put, slash_path};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ks_core::{Error, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const TAR_SUFFIX: &str = ".tar.gz";

/// Archive name without directories or the `.tar.gz` suffix.
pub fn tar_base_name(tar_path: &str) -> String {
    let name = tar_path.rsplit('/').next().unwrap_or(tar_path);
    name.strip_suffix(TAR_SUFFIX).unwrap_or(name).to_string()
}

pub fn check_tar_path(tar_path: &str) -> Result<()> {
    if !tar_path.ends_with(TAR_SUFFIX) {
        return Err(Error::other("PutPathTar: tarPath must end with .tar.gz"));
    }
    Ok(())
}

/// Writes `local_path/include_path` as a tarball named `tar_file_name` into `out`.
pub fn write_tar<W: Write>(
    local_path: &Path,
    include_path: &str,
    tar_file_name: &str,
    out: W,
) -> Result<W> {
    let dest_prefix = crate::join_key(&[&tar_base_name(tar_file_name), include_path]);
    let files = files_to_put(&local_path.join(include_path), &dest_prefix)?;

    let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
    builder.follow_symlinks(true);
    for file in &files {
        builder
            .append_path_with_name(&file.source, &file.dest)
            .map_err(|e| Error::Write(format!("Failed to add {} to tarball: {}", file.dest, e)))?;
    }
    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Write(e.to_string()))?;
    let out = encoder.finish().map_err(|e| Error::Write(e.to_string()))?;
    debug!(files = files.len(), tar = tar_file_name, "wrote tarball");
    Ok(out)
}

/// Extracts every entry of `tar_path` into `local_path` with the first path component
/// removed, overwriting existing files.
pub fn extract_tar(tar_path: &Path, local_path: &Path) -> Result<()> {
    extract_matching(tar_path, local_path, |_| true)
}

fn extract_matching(
    tar_path: &Path,
    local_path: &Path,
    keep: impl Fn(&str) -> bool,
) -> Result<()> {
    let mut archive = open_archive(tar_path)?;
    let entries = archive.entries().map_err(read_error(tar_path))?;
    for entry in entries {
        let mut entry = entry.map_err(read_error(tar_path))?;
        let name = entry_name(&entry)?;
        if !keep(&name) {
            continue;
        }
        let Some(rel) = strip_first_component(&name) else {
            continue;
        };
        let dest = local_path.join(rel);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if dest.is_file() {
            fs::remove_file(&dest)?;
        }
        entry.unpack(&dest).map_err(|e| {
            Error::other(format!("Failed to extract {} to {}: {}", name, dest.display(), e))
        })?;
    }
    Ok(())
}

/// Names of the regular files in the tarball, as stored.
pub fn list_files_in_tar(tar_path: &Path) -> Result<Vec<String>> {
    let mut archive = open_archive(tar_path)?;
    let mut names = Vec::new();
    for entry in archive.entries().map_err(read_error(tar_path))? {
        let entry = entry.map_err(read_error(tar_path))?;
        if entry.header().entry_type().is_file() {
            names.push(entry_name(&entry)?);
        }
    }
    Ok(names)
}

/// Like [`list_files_in_tar`] with the archive's top-level directory removed.
pub fn list_tar_contents(tar_path: &Path, tar_name: &str) -> Result<Vec<String>> {
    let prefix = format!("{}/", tar_base_name(tar_name));
    Ok(list_files_in_tar(tar_path)?
        .into_iter()
        .map(|name| name.strip_prefix(&prefix).map(str::to_string).unwrap_or(name))
        .collect())
}

/// Extracts one file or directory from the tarball into `local_path`, keeping its path
/// relative to the archive root.
pub fn extract_tar_item(tar_path: &Path, item_path: &str, local_path: &Path) -> Result<()> {
    let base = tar_base_name(&tar_path.to_string_lossy());
    let full_item = crate::join_key(&[&base, item_path]);

    let child_prefix = format!("{}/", full_item);
    let in_item = |name: &str| name == full_item || name.starts_with(&child_prefix);

    let names = list_files_in_tar(tar_path)?;
    if !names.iter().any(|n| in_item(n.as_str())) {
        return Err(Error::DoesNotExist(format!(
            "Path does not exist inside the tarfile: {}",
            item_path
        )));
    }

    let tmp = tempfile::Builder::new()
        .prefix("temp-extract-dir")
        .tempdir()?;
    extract_matching(tar_path, tmp.path(), in_item)?;

    for entry in WalkDir::new(tmp.path()) {
        let entry = entry.map_err(crate::walk::walk_error)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(tmp.path()).unwrap_or(entry.path());
        let target = local_path.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::other(format!(
                    "Failed to create directory {:?}: {}",
                    parent.display().to_string(),
                    e
                ))
            })?;
        }
        move_file(entry.path(), &target)?;
    }
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_err() {
        // rename fails across filesystems
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

fn open_archive(tar_path: &Path) -> Result<tar::Archive<impl Read>> {
    let file = fs::File::open(tar_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::DoesNotExist(format!("Path does not exist: {}", tar_path.display()))
        } else {
            Error::Read(format!("Failed to open {}: {}", tar_path.display(), e))
        }
    })?;
    Ok(tar::Archive::new(GzDecoder::new(file)))
}

fn entry_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<String> {
    let path = entry
        .path()
        .map_err(|e| Error::Read(format!("Invalid tarball entry name: {}", e)))?;
    Ok(slash_path(&path))
}

fn read_error(tar_path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Read(format!("Failed to read tarball {}: {}", tar_path.display(), e))
}

/// Drops the leading component. Entries that would escape the destination are rejected.
fn strip_first_component(name: &str) -> Option<PathBuf> {
    let mut components = Path::new(name).components();
    components.next()?;
    let rest: PathBuf = components.collect();
    let safe = rest
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if rest.as_os_str().is_empty() || !safe {
        return None;
    }
    Some(rest)
}
