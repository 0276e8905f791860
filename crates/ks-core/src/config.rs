//! Project configuration (`keepsake.yaml`) and project directory discovery.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILENAMES: [&str; 2] = ["keepsake.yaml", "replicate.yaml"];
pub const DEPRECATED_CONFIG_FILENAMES: [&str; 1] = ["replicate.yaml"];
pub const MAX_SEARCH_DEPTH: usize = 100;
pub const DEPRECATED_REPOSITORY_DIR: &str = ".replicate/storage";

const YAML_REFERENCE_HINT: &str =
    "To fix this, take a look at the keepsake.yaml reference:\nhttps://keepsake.ai/docs/reference/yaml";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub repository: String,
    /// Deprecated spelling of `repository`.
    #[serde(default)]
    pub storage: String,
}

/// Parses and validates the contents of a config file.
pub fn parse(text: &str) -> Result<Config> {
    let mut conf = if text.trim().is_empty() {
        Config::default()
    } else {
        let parsed: Option<Config> = serde_yaml::from_str(text)
            .map_err(|e| Error::other(format!("Failed to parse keepsake.yaml: {}", e)))?;
        parsed.unwrap_or_default()
    };

    if !conf.storage.is_empty() {
        if !conf.repository.is_empty() {
            return Err(Error::other(
                "'repository' and 'storage' (deprecated) cannot both be defined, please only use 'repository'",
            ));
        }
        warn!("'storage' is deprecated in keepsake.yaml, please use 'repository'");
        conf.repository = std::mem::take(&mut conf.storage);
    }
    if conf.repository.is_empty() {
        return Err(Error::other(
            "Missing required field in keepsake.yaml: repository",
        ));
    }
    Ok(conf)
}

/// Reads and validates a config file.
pub fn load_config(config_path: &Path) -> Result<Config> {
    let text = match fs::read_to_string(config_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ConfigNotFound(format!(
                "The config path does not exist: {}",
                config_path.display()
            )))
        }
        Err(e) => {
            return Err(Error::other(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            )))
        }
    };
    parse(&text).map_err(|e| Error::other(format!("{}\n\n{}", e, YAML_REFERENCE_HINT)))
}

/// Outcome of walking up the directory tree.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigLocation {
    File(PathBuf),
    /// A directory holding the legacy `.replicate/storage` repository and no config file.
    DeprecatedRepository(PathBuf),
}

pub fn find_config_path_in_directory(folder: &Path) -> Result<PathBuf> {
    for filename in CONFIG_FILENAMES {
        let candidate = folder.join(filename);
        if candidate.exists() {
            if DEPRECATED_CONFIG_FILENAMES.contains(&filename) {
                warn!(
                    "{} is deprecated, please name your configuration file {}",
                    filename, CONFIG_FILENAMES[0]
                );
            }
            return Ok(candidate);
        }
    }
    Err(Error::ConfigNotFound(format!(
        "{} not found in {}",
        CONFIG_FILENAMES[0],
        folder.display()
    )))
}

pub fn find_config_path(start: &Path) -> Result<ConfigLocation> {
    let mut folder = start.to_path_buf();
    for _ in 0..MAX_SEARCH_DEPTH {
        match find_config_path_in_directory(&folder) {
            Ok(path) => return Ok(ConfigLocation::File(path)),
            Err(e) if e.is_config_not_found() => {}
            Err(e) => return Err(e),
        }
        if folder.join(DEPRECATED_REPOSITORY_DIR).exists() {
            return Ok(ConfigLocation::DeprecatedRepository(folder));
        }
        match folder.parent() {
            Some(parent) => folder = parent.to_path_buf(),
            None => {
                return Err(Error::ConfigNotFound(format!(
                    "{} not found in {} (or in any parent directories)",
                    CONFIG_FILENAMES[0],
                    start.display()
                )))
            }
        }
    }
    Err(Error::ConfigNotFound(format!(
        "{} not found, recursive reached max depth",
        CONFIG_FILENAMES[0]
    )))
}

/// Searches `dir` and its parents for a config and returns it with the project directory.
pub fn find_config(dir: &Path) -> Result<(Config, PathBuf)> {
    match find_config_path(dir)? {
        ConfigLocation::DeprecatedRepository(project_dir) => {
            warn!(
                "keepsake.yaml is required now. put this file in the project directory {} to remove this warning:\nrepository: file://{}",
                project_dir.display(),
                DEPRECATED_REPOSITORY_DIR
            );
            let conf = Config {
                repository: format!("file://{}", DEPRECATED_REPOSITORY_DIR),
                storage: String::new(),
            };
            Ok((conf, project_dir))
        }
        ConfigLocation::File(path) => {
            let conf = load_config(&path)?;
            let project_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((conf, project_dir))
        }
    }
}

/// Like [`find_config`] starting from the working directory, unless `override_dir` pins the
/// project directory. A pinned directory without a config file yields the default config.
pub fn find_config_in_working_dir(override_dir: Option<&Path>) -> Result<(Config, PathBuf)> {
    if let Some(dir) = override_dir {
        return match find_config_path_in_directory(dir) {
            Ok(path) => Ok((load_config(&path)?, dir.to_path_buf())),
            Err(e) if e.is_config_not_found() => Ok((Config::default(), dir.to_path_buf())),
            Err(e) => Err(e),
        };
    }
    let cwd = std::env::current_dir()?;
    find_config(&cwd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_repository() {
        let conf = parse("repository: s3://foobar\n").expect("parse");
        assert_eq!(conf.repository, "s3://foobar");
        assert!(conf.storage.is_empty());
    }

    #[test]
    fn storage_is_migrated_to_repository() {
        let conf = parse("storage: gs://legacy").expect("parse");
        assert_eq!(conf.repository, "gs://legacy");
        assert!(conf.storage.is_empty());
    }

    #[test]
    fn both_repository_and_storage_is_an_error() {
        let err = parse("repository: s3://a\nstorage: s3://b\n").expect_err("conflict");
        assert!(err.to_string().contains("cannot both be defined"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse("repository: s3://a\nmetrics: []\n").expect_err("unknown field");
        assert!(err.to_string().starts_with("Failed to parse keepsake.yaml"));
    }

    #[test]
    fn missing_repository_is_an_error() {
        let err = parse("").expect_err("empty");
        assert_eq!(
            err.to_string(),
            "Missing required field in keepsake.yaml: repository"
        );
    }

    #[test]
    fn finds_config_in_parent_directory() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("keepsake.yaml"), "repository: file://.keepsake\n")
            .expect("write config");
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir");

        let (conf, project_dir) = find_config(&nested).expect("find");
        assert_eq!(conf.repository, "file://.keepsake");
        assert_eq!(project_dir, dir.path());
    }

    #[test]
    fn prefers_keepsake_yaml_over_replicate_yaml() {
        let dir = TempDir::new().expect("tempdir");
        fs::write(dir.path().join("keepsake.yaml"), "repository: file://new\n").expect("write");
        fs::write(dir.path().join("replicate.yaml"), "repository: file://old\n").expect("write");
        let (conf, _) = find_config(dir.path()).expect("find");
        assert_eq!(conf.repository, "file://new");
    }

    #[test]
    fn deprecated_storage_dir_marks_project_root() {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join(DEPRECATED_REPOSITORY_DIR)).expect("mkdir");
        let (conf, project_dir) = find_config(dir.path()).expect("find");
        assert_eq!(conf.repository, "file://.replicate/storage");
        assert_eq!(project_dir, dir.path());
    }

    #[test]
    fn override_dir_without_config_yields_default() {
        let dir = TempDir::new().expect("tempdir");
        let (conf, project_dir) =
            find_config_in_working_dir(Some(dir.path())).expect("override");
        assert_eq!(conf, Config::default());
        assert_eq!(project_dir, dir.path());
    }
}
