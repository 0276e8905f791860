use crate::{join_key, list_recursive_collect, Repository};
use ks_core::{Context, Result, WorkerQueue, MAX_WORKERS};
use std::collections::{HashMap, HashSet};

/// Makes `dest/dest_path` mirror `source/source_path`.
///
/// Files missing from the destination or whose MD5 differs are copied over; destination
/// files with no counterpart in the source are deleted.
pub fn sync(
    source: &dyn Repository,
    source_path: &str,
    dest: &dyn Repository,
    dest_path: &str,
) -> Result<()> {
    let dest_files: HashMap<String, Vec<u8>> = list_recursive_collect(dest, dest_path)?
        .into_iter()
        .map(|f| (relative_to(&f.path, dest_path), f.md5))
        .collect();

    let source_files = list_recursive_collect(source, source_path)?;
    let source_set: HashSet<String> = source_files
        .iter()
        .map(|f| relative_to(&f.path, source_path))
        .collect();

    WorkerQueue::scope(&Context::background(), MAX_WORKERS, |queue| {
        for file in &source_files {
            let rel = relative_to(&file.path, source_path);
            let unchanged = dest_files.get(&rel).is_some_and(|md5| *md5 == file.md5);
            if unchanged {
                continue;
            }
            queue.go(move || {
                let data = source.get(&join_key(&[source_path, &rel]))?;
                dest.put(&join_key(&[dest_path, &rel]), &data)
            });
        }
        for rel in dest_files.keys() {
            if source_set.contains(rel) {
                continue;
            }
            queue.go(move || dest.delete(&join_key(&[dest_path, rel])));
        }
        Ok(())
    })
}

fn relative_to(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix)
        .unwrap_or(path)
        .trim_start_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiskRepository;
    use tempfile::TempDir;

    #[test]
    fn mirrors_changes_and_deletions() {
        let source_dir = TempDir::new().expect("source");
        let dest_dir = TempDir::new().expect("dest");
        let source = DiskRepository::new(source_dir.path());
        let dest = DiskRepository::new(dest_dir.path());

        source.put("metadata/a.json", b"A").expect("put");
        source.put("metadata/b.json", b"B2").expect("put");
        source.put("other/ignored.json", b"x").expect("put");
        dest.put("metadata/b.json", b"B1").expect("put");
        dest.put("metadata/c.json", b"C").expect("put");

        sync(&source, "metadata", &dest, "metadata").expect("sync");

        assert_eq!(dest.get("metadata/a.json").expect("a"), b"A");
        assert_eq!(dest.get("metadata/b.json").expect("b"), b"B2");
        assert!(dest.get("metadata/c.json").expect_err("c").is_does_not_exist());
        assert!(dest.get("other/ignored.json").expect_err("outside prefix").is_does_not_exist());
    }

    #[test]
    fn syncing_from_empty_source_clears_destination() {
        let source_dir = TempDir::new().expect("source");
        let dest_dir = TempDir::new().expect("dest");
        let source = DiskRepository::new(source_dir.path());
        let dest = DiskRepository::new(dest_dir.path());
        dest.put("metadata/stale.json", b"old").expect("put");

        sync(&source, "metadata", &dest, "metadata").expect("sync");
        assert!(list_recursive_collect(&dest, "metadata").expect("list").is_empty());
    }
}
