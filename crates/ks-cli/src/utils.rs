use anyhow::{Context, Result};
use dialoguer::Confirm;
use ks_core::config::find_config_in_working_dir;
use ks_project::Project;
use ks_repository::{for_url, needs_caching, CachedRepository, Repository};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// The repository URL and project directory to use: `--repository` if given, otherwise the
/// one configured in the nearest keepsake.yaml.
pub fn repository_url_and_project_dir(
    repository_url: Option<&str>,
    project_dir: Option<&Path>,
) -> Result<(String, PathBuf)> {
    match repository_url {
        Some(url) if !url.is_empty() => {
            let dir = project_dir.unwrap_or_else(|| Path::new("."));
            let abs = std::path::absolute(dir).with_context(|| {
                format!("Failed to determine absolute directory of '{}'", dir.display())
            })?;
            Ok((url.to_string(), abs))
        }
        _ => {
            let (conf, dir) = find_config_in_working_dir(project_dir)?;
            Ok((conf.repository, dir))
        }
    }
}

/// Opens the repository. Remote repositories get a local metadata cache, refreshed here.
pub fn open_repository(repository_url: &str, project_dir: &Path) -> Result<Arc<dyn Repository>> {
    let repo = for_url(repository_url, project_dir)?;
    if !needs_caching(repository_url)? {
        return Ok(repo);
    }
    info!("Fetching new data from {:?}...", repo.root_url());
    let cached = CachedRepository::for_metadata(repo, project_dir);
    cached.sync_cache()?;
    Ok(Arc::new(cached))
}

/// Resolves flags and config into a ready project.
pub fn open_project(repository_url: Option<&str>, project_dir: Option<&Path>) -> Result<Project> {
    let (url, dir) = repository_url_and_project_dir(repository_url, project_dir)?;
    let repo = open_repository(&url, &dir)?;
    Ok(Project::new(repo, dir))
}

/// Yes/no prompt on the terminal, defaulting to no.
pub fn confirm(prompt: &str) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn explicit_repository_uses_given_project_dir() {
        let dir = TempDir::new().expect("tempdir");
        let (url, project_dir) =
            repository_url_and_project_dir(Some("s3://bucket"), Some(dir.path()))
                .expect("resolve");
        assert_eq!(url, "s3://bucket");
        assert!(project_dir.is_absolute());
    }

    #[test]
    fn repository_comes_from_config_in_pinned_directory() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("keepsake.yaml"), "repository: file://.keepsake\n")
            .expect("write");
        let (url, project_dir) =
            repository_url_and_project_dir(None, Some(dir.path())).expect("resolve");
        assert_eq!(url, "file://.keepsake");
        assert_eq!(project_dir, dir.path());
    }

    #[test]
    fn disk_repositories_are_not_cached() {
        let dir = TempDir::new().expect("tempdir");
        let repo = open_repository("file://.keepsake", dir.path()).expect("open");
        assert_eq!(
            repo.root_url(),
            format!("file://{}", dir.path().join(".keepsake").display())
        );
        assert!(!dir.path().join(".replicate").exists());
    }
}
