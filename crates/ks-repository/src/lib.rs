//! Blob storage behind a single [`Repository`] interface: local disk, S3 and Google Cloud
//! Storage, plus a metadata cache, mirroring and the repository version file.

pub mod cached;
pub mod disk;
pub mod gcs;
pub mod object;
pub mod s3;
pub mod spec;
pub mod sync;
pub mod tarball;
pub mod walk;

use crossbeam_channel::Sender;
use ks_core::errors::unknown_repository_scheme;
use ks_core::{Error, Result};
use std::path::Path;
use std::sync::Arc;

pub use cached::CachedRepository;
pub use disk::DiskRepository;
pub use gcs::GcsRepository;
pub use s3::S3Repository;
pub use spec::{load_spec, write_spec, Spec, SPEC_PATH, VERSION};
pub use sync::sync;

/// One entry of a recursive listing. `md5` is the raw digest, empty when the backend can't
/// provide one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedFile {
    pub path: String,
    pub md5: Vec<u8>,
}

pub type ListSender = Sender<Result<ListedFile>>;

/// A blob store addressed by slash-separated relative paths.
///
/// Listings stream into a channel; a backend signals the end of a listing by dropping the
/// sender, and reports a failure by sending an `Err` before doing so.
pub trait Repository: Send + Sync {
    /// Human-readable location, e.g. `s3://my-bucket/root`.
    fn root_url(&self) -> String;

    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Recursively copies everything under `repo_path` into `local_path`.
    fn get_path(&self, repo_path: &str, local_path: &Path) -> Result<()>;

    /// Extracts the tarball at `tar_path` into `local_path`, dropping its first path component.
    fn get_path_tar(&self, tar_path: &str, local_path: &Path) -> Result<()>;

    /// Extracts only `item_path` (a file or directory) from the tarball at `tar_path`.
    fn get_path_item_tar(&self, tar_path: &str, item_path: &str, local_path: &Path)
        -> Result<()>;

    fn put(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Recursively uploads `local_path` under `repo_path`, honouring ignore rules.
    fn put_path(&self, local_path: &Path, repo_path: &str) -> Result<()>;

    /// Archives `local_path/include_path` into the `.tar.gz` at `tar_path`.
    fn put_path_tar(&self, local_path: &Path, tar_path: &str, include_path: &str) -> Result<()>;

    /// Removes `path` and everything under it. A missing path is not an error.
    fn delete(&self, path: &str) -> Result<()>;

    /// Files (not directories) directly under `path`, each prefixed with `path`. Empty if
    /// `path` does not exist.
    fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Files inside the tarball at `path`, relative to the tarball's top-level directory.
    fn list_tar_file(&self, path: &str) -> Result<Vec<String>>;

    fn list_recursive(&self, results: ListSender, folder: &str);

    /// Like [`Repository::list_recursive`] but only emits files whose basename is `filename`.
    fn match_filenames_recursive(&self, results: ListSender, folder: &str, filename: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Disk,
    S3,
    Gcs,
}

/// Splits a repository URL into its scheme, bucket and root path.
///
/// `file://` URLs have no bucket; everything after the scheme is the root.
pub fn split_url(repository_url: &str) -> Result<(Scheme, String, String)> {
    // file URLs are taken literally so relative roots like file://.keepsake survive
    if let Some(root) = repository_url.strip_prefix("file://") {
        return Ok((Scheme::Disk, String::new(), root.to_string()));
    }
    let url = url::Url::parse(repository_url).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => unknown_repository_scheme(""),
        other => Error::RepositoryConfiguration(format!(
            "Failed to parse repository URL {}: {}",
            repository_url, other
        )),
    })?;
    let host = url.host_str().unwrap_or_default().to_string();
    match url.scheme() {
        "s3" => Ok((Scheme::S3, host, url.path().trim_start_matches('/').to_string())),
        "gs" => Ok((Scheme::Gcs, host, url.path().trim_start_matches('/').to_string())),
        other => Err(unknown_repository_scheme(other)),
    }
}

/// Opens the repository at `repository_url`. Relative disk roots resolve against
/// `project_dir`.
pub fn for_url(repository_url: &str, project_dir: &Path) -> Result<Arc<dyn Repository>> {
    let (scheme, bucket, root) = split_url(repository_url)?;
    Ok(match scheme {
        Scheme::Disk => {
            let root = Path::new(&root);
            let root = if root.is_absolute() {
                root.to_path_buf()
            } else {
                project_dir.join(root)
            };
            Arc::new(DiskRepository::new(root))
        }
        Scheme::S3 => Arc::new(S3Repository::new(&bucket, &root)?),
        Scheme::Gcs => Arc::new(GcsRepository::new(&bucket, &root)?),
    })
}

/// Remote repositories are slow to list, so their metadata gets a local cache.
pub fn needs_caching(repository_url: &str) -> Result<bool> {
    let (scheme, _, _) = split_url(repository_url)?;
    Ok(scheme != Scheme::Disk)
}

/// Runs a recursive listing to completion and collects it, stopping at the first error.
pub fn list_recursive_collect(repo: &dyn Repository, folder: &str) -> Result<Vec<ListedFile>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    repo.list_recursive(tx, folder);
    rx.into_iter().collect()
}

/// Joins slash-separated path segments, skipping empty ones.
pub(crate) fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty() && *p != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_supported_schemes() {
        assert_eq!(
            split_url("file:///foo/bar").expect("file"),
            (Scheme::Disk, String::new(), "/foo/bar".to_string())
        );
        assert_eq!(
            split_url("file://.keepsake").expect("relative file"),
            (Scheme::Disk, String::new(), ".keepsake".to_string())
        );
        assert_eq!(
            split_url("s3://my-bucket").expect("s3"),
            (Scheme::S3, "my-bucket".to_string(), String::new())
        );
        assert_eq!(
            split_url("s3://my-bucket/some/root").expect("s3 root"),
            (Scheme::S3, "my-bucket".to_string(), "some/root".to_string())
        );
        assert_eq!(
            split_url("gs://bucket/root").expect("gs"),
            (Scheme::Gcs, "bucket".to_string(), "root".to_string())
        );
    }

    #[test]
    fn rejects_missing_and_unknown_schemes() {
        let missing = split_url("/foo/bar").expect_err("missing scheme");
        assert!(missing.to_string().starts_with("Missing repository scheme."));
        let unknown = split_url("ftp://foo").expect_err("unknown scheme");
        assert!(unknown.to_string().starts_with("Unknown repository scheme: ftp."));
    }

    #[test]
    fn relative_disk_root_resolves_against_project_dir() {
        let repo = for_url("file://.keepsake", Path::new("/project")).expect("disk");
        assert_eq!(repo.root_url(), "file:///project/.keepsake");
        let repo = for_url("file:///abs/root", Path::new("/project")).expect("disk");
        assert_eq!(repo.root_url(), "file:///abs/root");
    }

    #[test]
    fn only_remote_schemes_need_caching() {
        assert!(!needs_caching("file://.keepsake").expect("file"));
        assert!(needs_caching("s3://bucket").expect("s3"));
        assert!(needs_caching("gs://bucket/root").expect("gs"));
    }

    #[test]
    fn join_key_skips_empty_segments() {
        assert_eq!(join_key(&["", "metadata/", "x.json"]), "metadata/x.json");
        assert_eq!(join_key(&["root", "."]), "root");
    }
}
