use crate::errors::Result;
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn is_dir(path: &Path) -> bool {
    path.is_dir()
}

/// True when `path` is missing or is a directory with no entries.
pub fn dir_is_empty(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}

/// Writes `bytes` to a sibling temp file and renames it into place.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        crate::ids::random_hex(8)
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_parents_and_leaves_no_temp_files() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("a").join("b.json");
        atomic_write_bytes(&target, b"{}").expect("write");
        assert_eq!(fs::read(&target).expect("read"), b"{}");
        let names: Vec<_> = fs::read_dir(dir.path().join("a"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn missing_directory_counts_as_empty() {
        let dir = TempDir::new().expect("tempdir");
        assert!(dir_is_empty(&dir.path().join("nope")).expect("missing"));
        assert!(dir_is_empty(dir.path()).expect("empty"));
        fs::write(dir.path().join("f"), "x").expect("write");
        assert!(!dir_is_empty(dir.path()).expect("non-empty"));
    }
}
