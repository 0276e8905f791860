use crate::sync::sync;
use crate::{DiskRepository, ListSender, Repository};
use ks_core::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const METADATA_PREFIX: &str = "metadata";
pub const METADATA_CACHE_DIR: &str = ".replicate/metadata-cache";

/// Wraps a slow repository, serving everything under one prefix from a local mirror.
///
/// The mirror is only refreshed by [`CachedRepository::sync_cache`], which callers run before
/// reading so they control what the user is told while it happens. Writes under the prefix go
/// to both the mirror and the upstream repository.
pub struct CachedRepository {
    upstream: Arc<dyn Repository>,
    prefix: String,
    cache: DiskRepository,
}

impl CachedRepository {
    pub fn new(upstream: Arc<dyn Repository>, prefix: &str, cache_dir: impl Into<PathBuf>) -> Self {
        CachedRepository {
            upstream,
            prefix: prefix.to_string(),
            cache: DiskRepository::new(cache_dir),
        }
    }

    /// Caches `metadata/` in `.replicate/metadata-cache` under the project directory.
    pub fn for_metadata(upstream: Arc<dyn Repository>, project_dir: &Path) -> Self {
        Self::new(
            upstream,
            METADATA_PREFIX,
            project_dir.join(METADATA_CACHE_DIR),
        )
    }

    pub fn sync_cache(&self) -> Result<()> {
        debug!(
            "Syncing {}/{} to {}/{}",
            self.upstream.root_url(),
            self.prefix,
            self.cache.root_url(),
            self.prefix
        );
        sync(
            self.upstream.as_ref(),
            &self.prefix,
            &self.cache,
            &self.prefix,
        )
    }

    fn cached(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }
}

impl Repository for CachedRepository {
    fn root_url(&self) -> String {
        self.upstream.root_url()
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        if self.cached(path) {
            return self.cache.get(path);
        }
        self.upstream.get(path)
    }

    fn get_path(&self, repo_path: &str, local_path: &Path) -> Result<()> {
        if self.cached(repo_path) {
            return self.cache.get_path(repo_path, local_path);
        }
        self.upstream.get_path(repo_path, local_path)
    }

    fn get_path_tar(&self, tar_path: &str, local_path: &Path) -> Result<()> {
        if self.cached(tar_path) {
            return self.cache.get_path_tar(tar_path, local_path);
        }
        self.upstream.get_path_tar(tar_path, local_path)
    }

    fn get_path_item_tar(&self, tar_path: &str, item_path: &str, local_path: &Path) -> Result<()> {
        if self.cached(tar_path) {
            return self.cache.get_path_tar(tar_path, local_path);
        }
        self.upstream.get_path_item_tar(tar_path, item_path, local_path)
    }

    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        if self.cached(path) {
            self.cache.put(path, data)?;
        }
        self.upstream.put(path, data)
    }

    fn put_path(&self, local_path: &Path, repo_path: &str) -> Result<()> {
        if self.cached(repo_path) {
            self.cache.put_path(local_path, repo_path)?;
        }
        self.upstream.put_path(local_path, repo_path)
    }

    fn put_path_tar(&self, local_path: &Path, tar_path: &str, include_path: &str) -> Result<()> {
        if self.cached(tar_path) {
            self.cache.put_path_tar(local_path, tar_path, include_path)?;
        }
        self.upstream.put_path_tar(local_path, tar_path, include_path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        if self.cached(path) {
            self.cache.delete(path)?;
        }
        self.upstream.delete(path)
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        if self.cached(path) {
            return self.cache.list(path);
        }
        self.upstream.list(path)
    }

    fn list_tar_file(&self, path: &str) -> Result<Vec<String>> {
        if self.cached(path) {
            return self.cache.list(path);
        }
        self.upstream.list_tar_file(path)
    }

    fn list_recursive(&self, results: ListSender, folder: &str) {
        if self.cached(folder) {
            return self.cache.list_recursive(results, folder);
        }
        self.upstream.list_recursive(results, folder)
    }

    fn match_filenames_recursive(&self, results: ListSender, folder: &str, filename: &str) {
        if self.cached(folder) {
            return self
                .cache
                .match_filenames_recursive(results, folder, filename);
        }
        self.upstream
            .match_filenames_recursive(results, folder, filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Arc<DiskRepository>, CachedRepository) {
        let upstream_dir = TempDir::new().expect("upstream");
        let project_dir = TempDir::new().expect("project");
        let upstream = Arc::new(DiskRepository::new(upstream_dir.path()));
        let cached = CachedRepository::for_metadata(upstream.clone(), project_dir.path());
        (upstream_dir, project_dir, upstream, cached)
    }

    #[test]
    fn metadata_reads_come_from_the_synced_cache() {
        let (_u, project, upstream, cached) = setup();
        upstream.put("metadata/experiments/a.json", b"a").expect("put");

        assert!(cached
            .get("metadata/experiments/a.json")
            .expect_err("not synced yet")
            .is_does_not_exist());
        cached.sync_cache().expect("sync");
        assert_eq!(cached.get("metadata/experiments/a.json").expect("get"), b"a");
        assert!(project
            .path()
            .join(".replicate/metadata-cache/metadata/experiments/a.json")
            .exists());
    }

    #[test]
    fn writes_under_prefix_go_to_both() {
        let (_u, _p, upstream, cached) = setup();
        cached.put("metadata/heartbeats/x.json", b"hb").expect("put");
        assert_eq!(upstream.get("metadata/heartbeats/x.json").expect("upstream"), b"hb");
        assert_eq!(
            cached.list("metadata/heartbeats").expect("list"),
            ["metadata/heartbeats/x.json"]
        );

        cached.delete("metadata/heartbeats/x.json").expect("delete");
        assert!(upstream.get("metadata/heartbeats/x.json").is_err());
        assert!(cached.list("metadata/heartbeats").expect("list").is_empty());
    }

    #[test]
    fn other_paths_pass_through() {
        let (_u, project, upstream, cached) = setup();
        cached.put("checkpoints/c.tar.gz", b"tar").expect("put");
        assert_eq!(upstream.get("checkpoints/c.tar.gz").expect("upstream"), b"tar");
        assert!(!project.path().join(".replicate/metadata-cache/checkpoints").exists());
        assert_eq!(cached.root_url(), upstream.root_url());
    }
}
