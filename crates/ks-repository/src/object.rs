//! Shared implementation of [`Repository`] for bucket-based object stores.

use crate::tarball::{self, check_tar_path, tar_base_name};
use crate::walk::files_to_put;
use crate::{join_key, ListSender, ListedFile, Repository};
use futures::TryStreamExt;
use ks_core::files::ensure_dir;
use ks_core::{Context, Error, Result, WorkerQueue, MAX_WORKERS};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

/// Provider-specific pieces of an object store backend.
pub trait Bucket: Send + Sync {
    /// URL scheme, e.g. `s3`.
    fn scheme(&self) -> &'static str;

    /// Creates the bucket. Called when a write finds it missing.
    fn create(&self, runtime: &Runtime, bucket: &str) -> Result<()>;
}

/// A repository stored under `root` in one bucket of an object store.
pub struct ObjectRepository<B: Bucket> {
    pub(crate) runtime: Runtime,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) bucket_name: String,
    pub(crate) root: String,
    pub(crate) bucket: B,
}

pub(crate) fn new_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::RepositoryConfiguration(format!("failed to start tokio runtime: {e}")))
}

pub(crate) fn is_not_found(err: &object_store::Error) -> bool {
    matches!(err, object_store::Error::NotFound { .. })
}

fn is_missing_bucket(err: &object_store::Error) -> bool {
    if is_not_found(err) {
        return true;
    }
    let msg = err.to_string();
    msg.contains("NoSuchBucket") || msg.contains("bucket does not exist")
}

/// ETags of single-part uploads are the hex MD5 of the content.
fn etag_md5(etag: Option<&str>) -> Vec<u8> {
    etag.map(|t| t.trim_matches('"'))
        .and_then(|t| hex::decode(t).ok())
        .unwrap_or_default()
}

impl<B: Bucket> ObjectRepository<B> {
    fn key(&self, path: &str) -> String {
        join_key(&[&self.root, path])
    }

    fn location(&self, key: &str) -> String {
        format!("{}://{}/{}", self.bucket.scheme(), self.bucket_name, key)
    }

    fn relative(&self, key: &str) -> String {
        if self.root.is_empty() {
            return key.to_string();
        }
        key.strip_prefix(&self.root)
            .unwrap_or(key)
            .trim_start_matches('/')
            .to_string()
    }

    fn prefix(key: &str) -> Option<ObjectPath> {
        (!key.is_empty()).then(|| ObjectPath::from(key))
    }

    fn get_key(&self, key: &str) -> std::result::Result<Vec<u8>, object_store::Error> {
        let path = ObjectPath::from(key);
        self.runtime.block_on(async {
            let result = self.store.get(&path).await?;
            Ok::<_, object_store::Error>(result.bytes().await?.to_vec())
        })
    }

    fn put_key_once(&self, key: &str, data: &[u8]) -> std::result::Result<(), object_store::Error> {
        let path = ObjectPath::from(key);
        let payload = PutPayload::from(data.to_vec());
        self.runtime
            .block_on(self.store.put(&path, payload))
            .map(|_| ())
    }

    /// Writes one object, creating the bucket and retrying once if it is missing.
    fn put_key(&self, key: &str, data: &[u8]) -> Result<()> {
        let write_err = |e: &dyn std::fmt::Display| {
            Error::Write(format!("Failed to write {:?}: {}", self.location(key), e))
        };
        match self.put_key_once(key, data) {
            Ok(()) => Ok(()),
            Err(e) if is_missing_bucket(&e) => {
                debug!(bucket = %self.bucket_name, "bucket missing, creating it");
                self.bucket.create(&self.runtime, &self.bucket_name)?;
                self.put_key_once(key, data).map_err(|e| write_err(&e))
            }
            Err(e) => Err(write_err(&e)),
        }
    }

    fn list_keys(
        &self,
        key: &str,
    ) -> std::result::Result<Vec<object_store::ObjectMeta>, object_store::Error> {
        let prefix = Self::prefix(key);
        self.runtime
            .block_on(self.store.list(prefix.as_ref()).try_collect::<Vec<_>>())
    }

    /// Fetches a single object into a local file, for the tarball operations.
    fn download_to(&self, key: &str, local: &Path) -> Result<()> {
        let data = self.get_key(key).map_err(|e| {
            if is_not_found(&e) {
                Error::DoesNotExist(format!("Path does not exist: {}", self.location(key)))
            } else {
                Error::Read(format!("Failed to read {}: {}", self.location(key), e))
            }
        })?;
        if let Some(parent) = local.parent() {
            ensure_dir(parent)?;
        }
        fs::write(local, data)?;
        Ok(())
    }

    fn with_downloaded_tar<T>(
        &self,
        tar_path: &str,
        f: impl FnOnce(&Path) -> Result<T>,
    ) -> Result<T> {
        let tmp = tempfile::Builder::new().prefix("tar").tempdir()?;
        let local = tmp
            .path()
            .join(format!("{}{}", tar_base_name(tar_path), tarball::TAR_SUFFIX));
        self.download_to(&self.key(tar_path), &local)?;
        f(&local)
    }

    fn stream_listing(&self, results: &ListSender, folder: &str, keep: impl Fn(&str) -> bool) {
        let key = self.key(folder);
        let prefix = Self::prefix(&key);
        let outcome: std::result::Result<(), object_store::Error> = self.runtime.block_on(async {
            let mut stream = self.store.list(prefix.as_ref());
            while let Some(meta) = stream.try_next().await? {
                let name = meta.location.as_ref();
                if !keep(name) {
                    continue;
                }
                let item = ListedFile {
                    path: self.relative(name),
                    md5: etag_md5(meta.e_tag.as_deref()),
                };
                if results.send(Ok(item)).is_err() {
                    break;
                }
            }
            Ok(())
        });
        if let Err(e) = outcome {
            if !is_missing_bucket(&e) {
                let _ = results.send(Err(Error::Read(format!(
                    "Failed to list {}://{}/{}: {}",
                    self.bucket.scheme(),
                    self.bucket_name,
                    key,
                    e
                ))));
            }
        }
    }
}

impl<B: Bucket> Repository for ObjectRepository<B> {
    fn root_url(&self) -> String {
        let mut url = format!("{}://{}", self.bucket.scheme(), self.bucket_name);
        if !self.root.is_empty() {
            url.push('/');
            url.push_str(&self.root);
        }
        url
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path);
        self.get_key(&key).map_err(|e| {
            if is_not_found(&e) {
                Error::DoesNotExist(format!("Get: path does not exist: {}", self.location(&key)))
            } else {
                Error::Read(format!("Failed to read {}: {}", self.location(&key), e))
            }
        })
    }

    fn get_path(&self, repo_path: &str, local_path: &Path) -> Result<()> {
        let key = self.key(repo_path);
        match self.get_key(&key) {
            Ok(data) => {
                if let Some(parent) = local_path.parent() {
                    ensure_dir(parent)?;
                }
                fs::write(local_path, data)?;
                return Ok(());
            }
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(Error::Read(format!(
                    "Failed to read {}: {}",
                    self.location(&key),
                    e
                )))
            }
        }

        let objects = self.list_keys(&key).map_err(|e| {
            Error::Read(format!("Failed to list {}: {}", self.location(&key), e))
        })?;
        WorkerQueue::scope(&Context::background(), MAX_WORKERS, |queue| {
            for meta in &objects {
                let key = &key;
                queue.go(move || {
                    let name = meta.location.as_ref();
                    let rel = name
                        .strip_prefix(key.as_str())
                        .unwrap_or(name)
                        .trim_start_matches('/');
                    let target = local_path.join(rel);
                    debug!("Downloading {} to {}", self.location(name), target.display());
                    self.download_to(name, &target)
                });
            }
            Ok(())
        })
        .map_err(|e| {
            Error::other(format!(
                "Failed to copy {} to {}: {}",
                self.location(&key),
                local_path.display(),
                e
            ))
        })
    }

    fn get_path_tar(&self, tar_path: &str, local_path: &Path) -> Result<()> {
        self.with_downloaded_tar(tar_path, |tar| tarball::extract_tar(tar, local_path))
    }

    fn get_path_item_tar(&self, tar_path: &str, item_path: &str, local_path: &Path) -> Result<()> {
        self.with_downloaded_tar(tar_path, |tar| {
            tarball::extract_tar_item(tar, item_path, local_path)
        })
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        self.put_key(&self.key(path), data)
    }

    fn put_path(&self, local_path: &Path, repo_path: &str) -> Result<()> {
        let files = files_to_put(local_path, &self.key(repo_path))?;
        WorkerQueue::scope(&Context::background(), MAX_WORKERS, |queue| {
            for file in &files {
                queue.go(move || {
                    let data = fs::read(&file.source)?;
                    self.put_key(&file.dest, &data)
                });
            }
            Ok(())
        })
        .map_err(|e| match e {
            Error::Write(_) => e,
            other => Error::Write(other.to_string()),
        })
    }

    fn put_path_tar(&self, local_path: &Path, tar_path: &str, include_path: &str) -> Result<()> {
        check_tar_path(tar_path)?;
        let data = tarball::write_tar(local_path, include_path, tar_path, Vec::new())?;
        self.put_key(&self.key(tar_path), &data)
    }

    fn delete(&self, path: &str) -> Result<()> {
        debug!("Deleting {}/{}...", self.root_url(), path);
        let key = self.key(path);
        let delete_err = |e: &dyn std::fmt::Display| {
            Error::Write(format!("Failed to delete {}/{}: {}", self.root_url(), path, e))
        };

        match self.runtime.block_on(self.store.delete(&ObjectPath::from(key.as_str()))) {
            Ok(()) => {}
            Err(e) if is_missing_bucket(&e) => {}
            Err(e) => return Err(delete_err(&e)),
        }
        let objects = match self.list_keys(&key) {
            Ok(objects) => objects,
            Err(e) if is_missing_bucket(&e) => return Ok(()),
            Err(e) => return Err(delete_err(&e)),
        };
        WorkerQueue::scope(&Context::background(), MAX_WORKERS, |queue| {
            for meta in &objects {
                queue.go(move || {
                    match self.runtime.block_on(self.store.delete(&meta.location)) {
                        Ok(()) => Ok(()),
                        Err(e) if is_not_found(&e) => Ok(()),
                        Err(e) => Err(Error::other(e.to_string())),
                    }
                });
            }
            Ok(())
        })
        .map_err(|e| delete_err(&e))
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        let key = self.key(path);
        let prefix = Self::prefix(&key);
        let listing = self
            .runtime
            .block_on(self.store.list_with_delimiter(prefix.as_ref()));
        let listing = match listing {
            Ok(listing) => listing,
            Err(e) if is_missing_bucket(&e) => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Read(format!(
                    "Failed to list {}/{}: {}",
                    self.root_url(),
                    path,
                    e
                )))
            }
        };
        let mut result: Vec<String> = listing
            .objects
            .iter()
            .map(|meta| self.relative(meta.location.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        result.sort();
        Ok(result)
    }

    fn list_tar_file(&self, path: &str) -> Result<Vec<String>> {
        self.with_downloaded_tar(path, |tar| tarball::list_tar_contents(tar, path))
    }

    fn list_recursive(&self, results: ListSender, folder: &str) {
        self.stream_listing(&results, folder, |_| true);
    }

    fn match_filenames_recursive(&self, results: ListSender, folder: &str, filename: &str) {
        self.stream_listing(&results, folder, |key| {
            key.rsplit('/').next() == Some(filename)
        });
    }
}
