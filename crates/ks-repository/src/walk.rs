//! Selecting which local files get uploaded.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ks_core::{Error, Result};
use md5::{Digest, Md5};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directories never uploaded, wherever they appear.
pub const ALWAYS_IGNORE: [&str; 4] = [".keepsake", ".replicate", ".git", ".mypy_cache"];

pub const IGNORE_FILE: &str = ".keepsakeignore";
pub const DEPRECATED_IGNORE_FILE: &str = ".replicateignore";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileToPut {
    pub source: PathBuf,
    /// Slash-separated destination, `repo_path` joined with the path relative to the walk root.
    pub dest: String,
}

/// Lists the files under `local_path` that should be uploaded to `repo_path`.
///
/// Skips [`ALWAYS_IGNORE`] directories, virtualenvs and anything matched by a
/// `.keepsakeignore` (or legacy `.replicateignore`) at `local_path`.
pub fn files_to_put(local_path: &Path, repo_path: &str) -> Result<Vec<FileToPut>> {
    let ignore = load_ignore(local_path)?;

    let walker = WalkDir::new(local_path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    let mut result = Vec::new();
    for entry in walker {
        let entry = entry.map_err(walk_error)?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(local_path)
            .unwrap_or(entry.path());
        if let Some(ignore) = &ignore {
            if ignore.matched_path_or_any_parents(rel, false).is_ignore() {
                continue;
            }
        }
        let rel = slash_path(rel);
        result.push(FileToPut {
            source: entry.path().to_path_buf(),
            dest: crate::join_key(&[repo_path, &rel]),
        });
    }
    Ok(result)
}

fn load_ignore(local_path: &Path) -> Result<Option<Gitignore>> {
    if !local_path.is_dir() {
        return Ok(None);
    }
    let file = [IGNORE_FILE, DEPRECATED_IGNORE_FILE]
        .iter()
        .map(|name| local_path.join(name))
        .find(|p| p.is_file());
    let Some(file) = file else {
        return Ok(None);
    };
    let mut builder = GitignoreBuilder::new(local_path);
    if let Some(err) = builder.add(&file) {
        return Err(Error::other(format!(
            "Failed to parse {}: {}",
            file.display(),
            err
        )));
    }
    let ignore = builder
        .build()
        .map_err(|e| Error::other(format!("Failed to parse {}: {}", file.display(), e)))?;
    Ok(Some(ignore))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    ALWAYS_IGNORE.contains(&name.as_ref()) || is_virtualenv_dir(entry.path())
}

fn is_virtualenv_dir(path: &Path) -> bool {
    path.join("pyvenv.cfg").exists()
}

pub(crate) fn walk_error(err: walkdir::Error) -> Error {
    let msg = err.to_string();
    match err.into_io_error() {
        Some(io) => Error::Io(io),
        None => Error::other(msg),
    }
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn md5_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}
