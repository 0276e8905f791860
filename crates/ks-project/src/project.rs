use crate::checkpoint::{Checkpoint, PrimaryMetric};
use crate::experiment::{list_experiments, Experiment, ExperimentConfig};
use crate::heartbeat::{create_heartbeat, delete_heartbeat, list_heartbeats, Heartbeat};
use chrono::Utc;
use ks_core::ids::generate_id;
use ks_core::{Error, Result};
use ks_param::ValueMap;
use ks_repository::{load_spec, write_spec, Repository, VERSION};
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct CreateExperimentArgs {
    pub path: String,
    pub command: String,
    pub params: ValueMap,
    pub python_packages: BTreeMap<String, String>,
    pub python_version: String,
}

#[derive(Clone, Debug, Default)]
pub struct CreateCheckpointArgs {
    pub path: String,
    pub step: i64,
    pub metrics: ValueMap,
    pub primary_metric: Option<PrimaryMetric>,
}

/// An experiment, or one of its checkpoints together with the experiment that owns it.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckpointOrExperiment {
    pub experiment: Experiment,
    pub checkpoint: Option<Checkpoint>,
}

#[derive(Debug, Default)]
struct Loaded {
    experiments: BTreeMap<String, Experiment>,
    heartbeats: HashMap<String, Heartbeat>,
}

/// Read and write access to every experiment stored in one repository.
///
/// All metadata is loaded on first use and kept until something is written through this
/// project; queries after that are answered from memory.
pub struct Project {
    repository: Arc<dyn Repository>,
    directory: PathBuf,
    loaded: Mutex<Option<Arc<Loaded>>>,
}

impl Project {
    pub fn new(repository: Arc<dyn Repository>, directory: impl Into<PathBuf>) -> Self {
        Project {
            repository,
            directory: directory.into(),
            loaded: Mutex::new(None),
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Every experiment, ordered by id.
    pub fn experiments(&self) -> Result<Vec<Experiment>> {
        let loaded = self.ensure_loaded()?;
        Ok(loaded.experiments.values().cloned().collect())
    }

    /// False when the experiment never wrote a heartbeat.
    pub fn experiment_is_running(&self, experiment_id: &str) -> Result<bool> {
        let loaded = self.ensure_loaded()?;
        match loaded.heartbeats.get(experiment_id) {
            Some(heartbeat) => Ok(heartbeat.is_running()),
            None => {
                debug!("No heartbeat found for experiment {}", experiment_id);
                Ok(false)
            }
        }
    }

    pub fn experiment_from_prefix(&self, prefix: &str) -> Result<Experiment> {
        let loaded = self.ensure_loaded()?;
        let mut matches: Vec<&Experiment> = loaded
            .experiments
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(_, exp)| exp)
            .collect();
        match matches.len() {
            0 => Err(Error::DoesNotExist(format!(
                "Experiment not found: {}",
                prefix
            ))),
            1 => Ok(matches.remove(0).clone()),
            count => Err(Error::AmbiguousPrefix {
                prefix: prefix.to_string(),
                count,
                kind: "experiments",
            }),
        }
    }

    pub fn experiment_by_id(&self, id: &str) -> Result<Experiment> {
        let loaded = self.ensure_loaded()?;
        loaded
            .experiments
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Experiment not found: {}", id)))
    }

    /// Returns the checkpoint and the experiment it belongs to.
    pub fn checkpoint_from_prefix(&self, prefix: &str) -> Result<(Checkpoint, Experiment)> {
        let loaded = self.ensure_loaded()?;
        let mut matches: Vec<(&Checkpoint, &Experiment)> = loaded
            .experiments
            .values()
            .flat_map(|exp| exp.checkpoints.iter().map(move |chk| (chk, exp)))
            .filter(|(chk, _)| chk.id.starts_with(prefix))
            .collect();
        match matches.len() {
            0 => Err(Error::NotFound(format!(
                "Checkpoint not found: {}",
                prefix
            ))),
            1 => {
                let (chk, exp) = matches.remove(0);
                Ok((chk.clone(), exp.clone()))
            }
            count => Err(Error::AmbiguousPrefix {
                prefix: prefix.to_string(),
                count,
                kind: "checkpoints",
            }),
        }
    }

    /// Resolves a prefix against experiment and checkpoint ids in one pass, so a prefix that
    /// matches one of each is reported as ambiguous.
    pub fn checkpoint_or_experiment_from_prefix(
        &self,
        prefix: &str,
    ) -> Result<CheckpointOrExperiment> {
        let loaded = self.ensure_loaded()?;
        let mut matches = Vec::new();
        for (id, exp) in &loaded.experiments {
            if id.starts_with(prefix) {
                matches.push((exp, None));
            }
            for chk in &exp.checkpoints {
                if chk.id.starts_with(prefix) {
                    matches.push((exp, Some(chk)));
                }
            }
        }
        match matches.len() {
            0 => Err(Error::NotFound(format!(
                "Checkpoint/experiment not found: {}",
                prefix
            ))),
            1 => {
                let (exp, chk) = matches.remove(0);
                Ok(CheckpointOrExperiment {
                    experiment: exp.clone(),
                    checkpoint: chk.cloned(),
                })
            }
            count => Err(Error::AmbiguousPrefix {
                prefix: prefix.to_string(),
                count,
                kind: "checkpoints/experiments",
            }),
        }
    }

    /// Removes the checkpoint's files. The owning experiment still lists it until the caller
    /// saves the experiment without it.
    pub fn delete_checkpoint(&self, chk: &Checkpoint) -> Result<()> {
        let tar_path = chk.storage_tar_path();
        if let Err(e) = self.repository.delete(&tar_path) {
            warn!(
                "Failed to delete checkpoint storage directory {}: {}",
                tar_path, e
            );
        }
        self.invalidate_cache();
        Ok(())
    }

    /// Removes the heartbeat, files and metadata of an experiment. Each removal is attempted
    /// even if an earlier one failed.
    pub fn delete_experiment(&self, exp: &Experiment) -> Result<()> {
        debug!("Deleting experiment: {}", exp.short_id());
        let heartbeat_path = exp.heartbeat_path();
        if let Err(e) = self.repository.delete(&heartbeat_path) {
            warn!("Failed to delete heartbeat file {}: {}", heartbeat_path, e);
        }
        let tar_path = exp.storage_tar_path();
        if let Err(e) = self.repository.delete(&tar_path) {
            warn!(
                "Failed to delete experiment storage directory {}: {}",
                tar_path, e
            );
        }
        let metadata_path = exp.metadata_path();
        if let Err(e) = self.repository.delete(&metadata_path) {
            warn!(
                "Failed to delete experiment metadata file {}: {}",
                metadata_path, e
            );
        }
        self.invalidate_cache();
        Ok(())
    }

    /// Records a new experiment and uploads its files.
    ///
    /// Writes the repository version file on first contact and refuses repositories written
    /// by a newer version.
    pub fn create_experiment(&self, args: CreateExperimentArgs) -> Result<Experiment> {
        match load_spec(self.repository.as_ref())? {
            None => write_spec(self.repository.as_ref())?,
            Some(spec) if spec.version > VERSION => {
                return Err(Error::IncompatibleRepositoryVersion {
                    root_url: self.repository.root_url(),
                })
            }
            Some(_) => {}
        }

        let host = match local_ip() {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!("Failed to determine host IP: {}", e);
                String::new()
            }
        };

        let mut exp = Experiment::new(generate_id(), Utc::now());
        exp.params = args.params;
        exp.host = host;
        exp.user = whoami::username();
        exp.config = Some(ExperimentConfig {
            repository: self.repository.root_url(),
            storage: String::new(),
        });
        exp.command = args.command;
        exp.path = args.path;
        exp.python_packages = args.python_packages;
        exp.python_version = args.python_version;
        exp.keepsake_version = env!("CARGO_PKG_VERSION").to_string();

        // metadata first so repository write problems surface before the upload
        self.save_experiment(&exp)?;

        if !exp.path.is_empty() {
            self.repository
                .put_path_tar(&self.directory, &exp.storage_tar_path(), &exp.path)?;
        }
        Ok(exp)
    }

    /// Builds a checkpoint and uploads its files. The caller appends it to the experiment and
    /// saves the experiment.
    pub fn create_checkpoint(&self, args: CreateCheckpointArgs) -> Result<Checkpoint> {
        let chk = Checkpoint {
            id: generate_id(),
            created: Utc::now(),
            metrics: args.metrics,
            step: args.step,
            path: args.path,
            primary_metric: args.primary_metric,
        };
        let problems = chk.validate();
        if !problems.is_empty() {
            return Err(Error::other(problems.join("; ")));
        }
        if chk.path.is_empty() {
            return Ok(chk);
        }
        let tar_path = chk.storage_tar_path();
        self.repository
            .put_path_tar(&self.directory, &tar_path, &chk.path)?;
        info!("Copied the files from checkpoint {} to {}", chk.id, tar_path);
        Ok(chk)
    }

    pub fn save_experiment(&self, exp: &Experiment) -> Result<()> {
        exp.save(self.repository.as_ref())?;
        self.invalidate_cache();
        Ok(())
    }

    pub fn refresh_heartbeat(&self, experiment_id: &str) -> Result<()> {
        create_heartbeat(self.repository.as_ref(), experiment_id, Utc::now())?;
        self.invalidate_cache();
        Ok(())
    }

    /// Marks the experiment as stopped right away instead of waiting for its heartbeat to
    /// expire.
    pub fn stop_experiment(&self, experiment_id: &str) -> Result<()> {
        delete_heartbeat(self.repository.as_ref(), experiment_id)?;
        self.invalidate_cache();
        Ok(())
    }

    fn invalidate_cache(&self) {
        *self
            .loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    fn ensure_loaded(&self) -> Result<Arc<Loaded>> {
        let mut guard = self
            .loaded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(loaded) = guard.as_ref() {
            return Ok(Arc::clone(loaded));
        }
        let experiments = list_experiments(self.repository.as_ref())?;
        let heartbeats = list_heartbeats(self.repository.as_ref()).unwrap_or_else(|e| {
            warn!("Failed to load heartbeats: {}", e);
            Vec::new()
        });
        let loaded = Arc::new(Loaded {
            experiments: experiments
                .into_iter()
                .map(|exp| (exp.id.clone(), exp))
                .collect(),
            heartbeats: heartbeats
                .into_iter()
                .map(|hb| (hb.experiment_id.clone(), hb))
                .collect(),
        });
        *guard = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

/// The address this machine would use for outbound traffic. Connecting a UDP socket sends
/// nothing.
fn local_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Goal;
    use chrono::{DateTime, TimeZone};
    use ks_param::Value;
    use ks_repository::DiskRepository;
    use std::fs;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0)
            .single()
            .expect("timestamp")
    }

    fn fixture_checkpoint(id: &str, secs: i64) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            created: at(secs),
            metrics: ValueMap::new(),
            step: 0,
            path: String::new(),
            primary_metric: None,
        }
    }

    fn project() -> (TempDir, Project) {
        let dir = TempDir::new().expect("tempdir");
        let repo = Arc::new(DiskRepository::new(dir.path().join(".keepsake")));
        let project = Project::new(repo, dir.path());
        (dir, project)
    }

    fn prefix_fixture(project: &Project) {
        let mut first = Experiment::new("1eee".repeat(16), at(0));
        first.checkpoints = vec![fixture_checkpoint(&"1ccc".repeat(16), 1)];
        let mut second = Experiment::new("2eee".repeat(16), at(2));
        second.checkpoints = vec![fixture_checkpoint(&"4ccc".repeat(16), 3)];
        project.save_experiment(&first).expect("save first");
        project.save_experiment(&second).expect("save second");
    }

    #[test]
    fn reopened_project_sees_saved_experiment() {
        let (dir, project) = project();
        let mut exp = Experiment::new(format!("abc{}1", "0".repeat(60)), at(0));
        exp.params
            .insert("learning_rate".into(), Value::Float(0.001));
        let mut chk = fixture_checkpoint("c1", 1);
        chk.metrics.insert("accuracy".into(), Value::Float(0.987));
        exp.checkpoints.push(chk);
        project.save_experiment(&exp).expect("save");

        let reopened = Project::new(Arc::clone(project.repository()), dir.path());
        let experiments = reopened.experiments().expect("experiments");
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments[0].params, exp.params);
        assert_eq!(
            experiments[0].checkpoints[0].metrics,
            exp.checkpoints[0].metrics
        );
    }

    #[test]
    fn resolves_prefixes_across_experiments_and_checkpoints() {
        let (_dir, project) = project();
        prefix_fixture(&project);

        let err = project
            .checkpoint_or_experiment_from_prefix("1")
            .expect_err("ambiguous");
        assert_eq!(
            err.to_string(),
            "Prefix is ambiguous: 1 (2 matching checkpoints/experiments)"
        );

        let found = project
            .checkpoint_or_experiment_from_prefix("1e")
            .expect("experiment");
        assert!(found.experiment.id.starts_with("1eee"));
        assert!(found.checkpoint.is_none());

        let found = project
            .checkpoint_or_experiment_from_prefix("4c")
            .expect("checkpoint");
        assert!(found.experiment.id.starts_with("2eee"));
        assert!(found
            .checkpoint
            .map(|c| c.id.starts_with("4ccc"))
            .unwrap_or(false));

        let err = project
            .checkpoint_or_experiment_from_prefix("9")
            .expect_err("missing");
        assert_eq!(err.to_string(), "Checkpoint/experiment not found: 9");
    }

    #[test]
    fn typed_prefix_lookups() {
        let (_dir, project) = project();
        prefix_fixture(&project);

        assert!(project
            .experiment_from_prefix("2e")
            .expect("exp")
            .id
            .starts_with("2eee"));
        let err = project.experiment_from_prefix("4c").expect_err("missing");
        assert!(err.is_does_not_exist());
        assert_eq!(err.to_string(), "Experiment not found: 4c");

        let (chk, exp) = project.checkpoint_from_prefix("1c").expect("chk");
        assert!(chk.id.starts_with("1ccc"));
        assert!(exp.id.starts_with("1eee"));
        assert_eq!(
            project
                .checkpoint_from_prefix("1e")
                .expect_err("missing")
                .to_string(),
            "Checkpoint not found: 1e"
        );

        let id = "2eee".repeat(16);
        assert_eq!(project.experiment_by_id(&id).expect("by id").id, id);
        assert!(project.experiment_by_id("2eee").is_err());
    }

    #[test]
    fn running_status_follows_heartbeats() {
        let (_dir, project) = project();
        prefix_fixture(&project);
        let id = "1eee".repeat(16);
        assert!(!project.experiment_is_running(&id).expect("no heartbeat"));

        project.refresh_heartbeat(&id).expect("refresh");
        assert!(project.experiment_is_running(&id).expect("fresh"));

        project.stop_experiment(&id).expect("stop");
        assert!(!project.experiment_is_running(&id).expect("stopped"));
    }

    #[test]
    fn stray_heartbeat_files_do_not_hide_live_experiments() {
        let (_dir, project) = project();
        prefix_fixture(&project);
        let live = "2eee".repeat(16);
        project.refresh_heartbeat(&live).expect("heartbeat");
        assert!(project.experiment_is_running(&live).expect("running"));

        project
            .repository()
            .put("metadata/heartbeats/bad.json", b"not json")
            .expect("put");
        project
            .repository()
            .put("metadata/heartbeats/.DS_Store", b"\x00\x01")
            .expect("put");
        project.invalidate_cache();

        assert_eq!(project.experiments().expect("experiments").len(), 2);
        assert!(project.experiment_is_running(&live).expect("running"));
        assert!(!project
            .experiment_is_running(&"1eee".repeat(16))
            .expect("running"));
    }

    #[test]
    fn create_experiment_writes_spec_metadata_and_files() {
        let (dir, project) = project();
        fs::write(dir.path().join("train.py"), "print('hi')").expect("write");

        let exp = project
            .create_experiment(CreateExperimentArgs {
                path: ".".into(),
                command: "python train.py".into(),
                ..Default::default()
            })
            .expect("create");
        assert_eq!(exp.id.len(), 64);
        assert_eq!(
            exp.config.as_ref().map(|c| c.repository.clone()),
            Some(project.repository().root_url())
        );

        let repo = project.repository().as_ref();
        assert_eq!(
            load_spec(repo).expect("spec").map(|s| s.version),
            Some(VERSION)
        );
        assert_eq!(
            repo.list_tar_file(&exp.storage_tar_path()).expect("tar"),
            ["train.py"]
        );
        assert_eq!(project.experiments().expect("experiments"), vec![exp]);
    }

    #[test]
    fn create_experiment_rejects_newer_repository() {
        let (_dir, project) = project();
        project
            .repository()
            .put("repository.json", br#"{"version": 99}"#)
            .expect("put");
        let err = project
            .create_experiment(CreateExperimentArgs::default())
            .expect_err("newer");
        assert!(matches!(err, Error::IncompatibleRepositoryVersion { .. }));
    }

    #[test]
    fn create_checkpoint_validates_and_uploads() {
        let (dir, project) = project();
        fs::create_dir_all(dir.path().join("model")).expect("mkdir");
        fs::write(dir.path().join("model/weights.pth"), "w").expect("write");

        let err = project
            .create_checkpoint(CreateCheckpointArgs {
                primary_metric: Some(PrimaryMetric {
                    name: "loss".into(),
                    goal: Goal::Minimize,
                }),
                ..Default::default()
            })
            .expect_err("undefined metric");
        assert_eq!(
            err.to_string(),
            "Primary metric 'loss' is not defined in metrics"
        );

        let chk = project
            .create_checkpoint(CreateCheckpointArgs {
                path: "model".into(),
                step: 3,
                ..Default::default()
            })
            .expect("checkpoint");
        assert_eq!(chk.step, 3);
        assert_eq!(
            project
                .repository()
                .list_tar_file(&chk.storage_tar_path())
                .expect("tar"),
            ["model/weights.pth"]
        );
    }

    #[test]
    fn deleting_an_experiment_removes_everything_it_owns() {
        let (dir, project) = project();
        fs::write(dir.path().join("train.py"), "x").expect("write");
        let exp = project
            .create_experiment(CreateExperimentArgs {
                path: "train.py".into(),
                ..Default::default()
            })
            .expect("create");
        project.refresh_heartbeat(&exp.id).expect("heartbeat");

        project.delete_experiment(&exp).expect("delete");
        let repo = project.repository();
        assert!(repo.get(&exp.metadata_path()).expect_err("metadata").is_does_not_exist());
        assert!(repo.get(&exp.heartbeat_path()).expect_err("heartbeat").is_does_not_exist());
        assert!(repo.list("experiments/").expect("list").is_empty());
        assert!(project.experiments().expect("experiments").is_empty());

        // already gone
        project.delete_experiment(&exp).expect("delete again");
    }
}
