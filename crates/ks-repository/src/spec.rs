//! The `repository.json` file recording which storage layout a repository uses.

use crate::Repository;
use ks_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const VERSION: i64 = 1;
pub const SPEC_PATH: &str = "repository.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub version: i64,
}

/// Reads the spec, or `None` for a repository that has never been written to.
pub fn load_spec(repo: &dyn Repository) -> Result<Option<Spec>> {
    let raw = match repo.get(SPEC_PATH) {
        Ok(raw) => raw,
        Err(e) if e.is_does_not_exist() => return Ok(None),
        Err(e) => {
            return Err(Error::other(format!(
                "Failed to read {}/{}: {}",
                repo.root_url(),
                SPEC_PATH,
                e
            )))
        }
    };
    let spec = serde_json::from_slice(&raw).map_err(|e| Error::CorruptedRepositorySpec {
        root_url: repo.root_url(),
        spec_path: SPEC_PATH.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Some(spec))
}

pub fn write_spec(repo: &dyn Repository) -> Result<()> {
    let raw = serde_json::to_vec(&Spec { version: VERSION })?;
    repo.put(SPEC_PATH, &raw)
}
