use crate::tarball::{self, check_tar_path};
use crate::walk::{files_to_put, md5_file, slash_path, walk_error};
use crate::{ListSender, ListedFile, Repository};
use ks_core::files::{atomic_write_bytes, ensure_dir};
use ks_core::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A repository rooted at a local directory.
#[derive(Clone, Debug)]
pub struct DiskRepository {
    root: PathBuf,
}

impl DiskRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskRepository { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn walk_files(
        &self,
        results: &ListSender,
        folder: &str,
        mut emit: impl FnMut(&Path, String) -> Option<Result<ListedFile>>,
    ) {
        let start = self.full_path(folder);
        if !start.exists() {
            // same as an empty prefix in blob storage
            return;
        }
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let _ = results.send(Err(walk_error(e)));
                    return;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = slash_path(entry.path().strip_prefix(&self.root).unwrap_or(entry.path()));
            if let Some(item) = emit(entry.path(), rel) {
                let failed = item.is_err();
                if results.send(item).is_err() || failed {
                    return;
                }
            }
        }
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            ensure_dir(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(walk_error)?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                ensure_dir(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

impl Repository for DiskRepository {
    fn root_url(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        match fs::read(self.full_path(path)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::DoesNotExist(format!(
                "Get: path does not exist: {}",
                path
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn get_path(&self, repo_path: &str, local_path: &Path) -> Result<()> {
        copy_tree(&self.full_path(repo_path), local_path).map_err(|e| {
            Error::other(format!(
                "Failed to copy directory from {} to {}: {}",
                repo_path,
                local_path.display(),
                e
            ))
        })
    }

    fn get_path_tar(&self, tar_path: &str, local_path: &Path) -> Result<()> {
        let full = self.full_path(tar_path);
        if !full.exists() {
            return Err(Error::DoesNotExist(format!(
                "GetPathTar: does not exist: {}",
                full.display()
            )));
        }
        tarball::extract_tar(&full, local_path)
    }

    fn get_path_item_tar(&self, tar_path: &str, item_path: &str, local_path: &Path) -> Result<()> {
        let full = self.full_path(tar_path);
        if !full.exists() {
            return Err(Error::DoesNotExist(format!(
                "GetPathItemTar: does not exist: {}",
                full.display()
            )));
        }
        tarball::extract_tar_item(&full, item_path, local_path)
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        atomic_write_bytes(&self.full_path(path), data)
    }

    fn put_path(&self, local_path: &Path, repo_path: &str) -> Result<()> {
        for file in files_to_put(local_path, repo_path)? {
            let data = fs::read(&file.source)?;
            self.put(&file.dest, &data)?;
        }
        Ok(())
    }

    fn put_path_tar(&self, local_path: &Path, tar_path: &str, include_path: &str) -> Result<()> {
        check_tar_path(tar_path)?;
        let full = self.full_path(tar_path);
        if let Some(parent) = full.parent() {
            ensure_dir(parent)?;
        }
        let file = fs::File::create(&full)?;
        let file = tarball::write_tar(local_path, include_path, tar_path, file)?;
        file.sync_all()?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path);
        let result = if full.is_dir() {
            fs::remove_dir_all(&full)
        } else {
            fs::remove_file(&full)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Write(format!(
                "Failed to delete {}/{}: {}",
                self.root.display(),
                path,
                e
            ))),
        }
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.full_path(path)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut result = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            result.push(crate::join_key(&[path, &name]));
        }
        result.sort();
        Ok(result)
    }

    fn list_tar_file(&self, path: &str) -> Result<Vec<String>> {
        let full = self.full_path(path);
        if !full.exists() {
            return Err(Error::DoesNotExist(format!(
                "Path does not exist: {}",
                full.display()
            )));
        }
        tarball::list_tar_contents(&full, path)
    }

    fn list_recursive(&self, results: ListSender, folder: &str) {
        self.walk_files(&results, folder, |path, rel| {
            Some(md5_file(path).map(|md5| ListedFile { path: rel, md5 }))
        });
    }

    fn match_filenames_recursive(&self, results: ListSender, folder: &str, filename: &str) {
        self.walk_files(&results, folder, |path, rel| {
            let matches = path.file_name().map(|n| n == filename).unwrap_or(false);
            matches.then(|| {
                Ok(ListedFile {
                    path: rel,
                    md5: Vec::new(),
                })
            })
        });
    }
}
