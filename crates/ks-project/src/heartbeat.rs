use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use ks_core::Result;
use ks_repository::Repository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const HEARTBEATS_METADATA_DIR: &str = "metadata/heartbeats/";

/// How often a live writer refreshes its heartbeat.
pub const HEARTBEAT_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Number of refreshes that may be missed before an experiment counts as stopped.
pub const HEARTBEAT_MISS_TOLERANCE: u32 = 3;

pub fn heartbeat_path(experiment_id: &str) -> String {
    format!("{}{}.json", HEARTBEATS_METADATA_DIR, experiment_id)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub experiment_id: String,
    #[serde(with = "rfc3339")]
    pub last_heartbeat: DateTime<Utc>,
}

impl Heartbeat {
    pub fn is_running(&self) -> bool {
        self.is_running_at(Utc::now())
    }

    /// Alive iff the last refresh is within the miss tolerance of `now`.
    pub fn is_running_at(&self, now: DateTime<Utc>) -> bool {
        let window = HEARTBEAT_REFRESH_INTERVAL * HEARTBEAT_MISS_TOLERANCE;
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        self.last_heartbeat > now - window
    }
}

/// Only RFC3339 timestamps are accepted.
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                serde::de::Error::custom(format!("invalid heartbeat time {:?}: {}", raw, e))
            })
    }
}

pub fn create_heartbeat(
    repo: &dyn Repository,
    experiment_id: &str,
    t: DateTime<Utc>,
) -> Result<()> {
    let heartbeat = Heartbeat {
        experiment_id: experiment_id.to_string(),
        last_heartbeat: t,
    };
    let data = serde_json::to_vec(&heartbeat)?;
    repo.put(&heartbeat_path(experiment_id), &data)
}

pub fn delete_heartbeat(repo: &dyn Repository, experiment_id: &str) -> Result<()> {
    repo.delete(&heartbeat_path(experiment_id))
}

/// Every readable heartbeat in the repository. A file that fails to load is logged and skipped;
/// only a failed listing is an error.
pub fn list_heartbeats(repo: &dyn Repository) -> Result<Vec<Heartbeat>> {
    let paths = repo.list(HEARTBEATS_METADATA_DIR)?;
    let mut heartbeats = Vec::with_capacity(paths.len());
    for path in paths {
        match crate::load_from_path::<Heartbeat>(repo, &path) {
            Ok(heartbeat) => heartbeats.push(heartbeat),
            Err(e) => warn!("Failed to load metadata from {:?}: {}", path, e),
        }
    }
    Ok(heartbeats)
}

/// Background thread that keeps an experiment's heartbeat fresh while training runs.
pub struct HeartbeatProcess {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatProcess {
    /// Writes a heartbeat immediately, then again every `interval` until stopped.
    pub fn start(repo: Arc<dyn Repository>, experiment_id: String, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = std::thread::spawn(move || loop {
            if let Err(e) = create_heartbeat(repo.as_ref(), &experiment_id, Utc::now()) {
                error!("Failed to refresh heartbeat for {}: {}", experiment_id, e);
            }
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Heartbeat for {} stopped", experiment_id);
                    return;
                }
            }
        });
        HeartbeatProcess {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stops refreshing. The heartbeat file is left to expire on its own.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Heartbeat thread panicked");
            }
        }
    }
}

impl Drop for HeartbeatProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ks_repository::DiskRepository;
    use tempfile::TempDir;

    #[test]
    fn running_iff_within_three_intervals() {
        let now = Utc::now();
        let beat = |secs: i64| Heartbeat {
            experiment_id: "e".into(),
            last_heartbeat: now - ChronoDuration::seconds(secs),
        };
        assert!(beat(0).is_running_at(now));
        assert!(beat(29).is_running_at(now));
        assert!(!beat(30).is_running_at(now));
        assert!(!beat(3600).is_running_at(now));
    }

    #[test]
    fn rejects_non_rfc3339_times() {
        let ok: Heartbeat = serde_json::from_str(
            r#"{"experiment_id": "e", "last_heartbeat": "2020-10-07T22:44:06.243914Z"}"#,
        )
        .expect("rfc3339");
        assert_eq!(ok.experiment_id, "e");
        assert!(serde_json::from_str::<Heartbeat>(
            r#"{"experiment_id": "e", "last_heartbeat": "2020-10-07 22:44:06"}"#
        )
        .is_err());
    }

    #[test]
    fn create_list_delete() {
        let dir = TempDir::new().expect("tempdir");
        let repo = DiskRepository::new(dir.path());
        let t = Utc::now();
        create_heartbeat(&repo, "abc", t).expect("create");
        let beats = list_heartbeats(&repo).expect("list");
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].experiment_id, "abc");
        assert!(beats[0].is_running());

        delete_heartbeat(&repo, "abc").expect("delete");
        assert!(list_heartbeats(&repo).expect("list").is_empty());
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let repo = DiskRepository::new(dir.path());
        create_heartbeat(&repo, "abc", Utc::now()).expect("create");
        repo.put("metadata/heartbeats/bad.json", b"not json").expect("put");
        repo.put("metadata/heartbeats/.DS_Store", b"\x00\x01").expect("put");

        let beats = list_heartbeats(&repo).expect("list");
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].experiment_id, "abc");
        assert!(beats[0].is_running());
    }

    #[test]
    fn process_writes_immediately_and_leaves_file_on_stop() {
        let dir = TempDir::new().expect("tempdir");
        let repo: Arc<dyn Repository> = Arc::new(DiskRepository::new(dir.path()));
        let mut process =
            HeartbeatProcess::start(Arc::clone(&repo), "abc".into(), Duration::from_secs(60));
        process.stop();
        let beats = list_heartbeats(repo.as_ref()).expect("list");
        assert_eq!(beats.len(), 1);
        assert!(beats[0].is_running());
    }
}
