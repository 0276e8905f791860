use crate::checkpoint::{short_id, Checkpoint, Goal};
use crate::serde_util::null_default;
use chrono::{DateTime, Utc};
use ks_core::Result;
use ks_param::{Value, ValueMap};
use ks_repository::Repository;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

pub const EXPERIMENTS_METADATA_DIR: &str = "metadata/experiments/";

/// The repository settings an experiment was recorded with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default, deserialize_with = "null_default")]
    pub repository: String,
    #[serde(default, deserialize_with = "null_default")]
    pub storage: String,
}

/// One training run and the checkpoints it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub created: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_default")]
    pub params: ValueMap,
    #[serde(default, deserialize_with = "null_default")]
    pub host: String,
    #[serde(default, deserialize_with = "null_default")]
    pub user: String,
    #[serde(default)]
    pub config: Option<ExperimentConfig>,
    #[serde(default, deserialize_with = "null_default")]
    pub command: String,
    #[serde(default, deserialize_with = "null_default")]
    pub path: String,
    #[serde(default, deserialize_with = "null_default")]
    pub python_packages: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_default")]
    pub python_version: String,
    #[serde(default, deserialize_with = "null_default")]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default, alias = "replicate_version", deserialize_with = "null_default")]
    pub keepsake_version: String,
}

impl Experiment {
    pub fn new(id: String, created: DateTime<Utc>) -> Self {
        Experiment {
            id,
            created,
            params: ValueMap::new(),
            host: String::new(),
            user: String::new(),
            config: None,
            command: String::new(),
            path: String::new(),
            python_packages: BTreeMap::new(),
            python_version: String::new(),
            checkpoints: Vec::new(),
            keepsake_version: String::new(),
        }
    }

    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn metadata_path(&self) -> String {
        format!("{}{}.json", EXPERIMENTS_METADATA_DIR, self.id)
    }

    pub fn heartbeat_path(&self) -> String {
        crate::heartbeat::heartbeat_path(&self.id)
    }

    pub fn storage_tar_path(&self) -> String {
        format!("experiments/{}.tar.gz", self.id)
    }

    /// Params ordered by name.
    pub fn sorted_params(&self) -> Vec<(&str, &Value)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    pub fn save(&self, repo: &dyn Repository) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        repo.put(&self.metadata_path(), &data)
    }

    /// The most recently created checkpoint.
    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.iter().max_by_key(|c| c.created)
    }

    /// The checkpoint with the best value of the primary metric declared by the first
    /// checkpoint, or `None` if there is no primary metric or no checkpoint recorded it.
    ///
    /// When any checkpoint recorded a number, non-numeric values are ignored. A value that
    /// can't be compared with the current best is treated as missing. Among equal values the
    /// later checkpoint wins.
    pub fn best_checkpoint(&self) -> Option<&Checkpoint> {
        let primary = self.checkpoints.first()?.primary_metric.as_ref()?;
        let candidates: Vec<(&Checkpoint, &Value)> = self
            .checkpoints
            .iter()
            .filter_map(|chk| chk.metrics.get(&primary.name).map(|v| (chk, v)))
            .collect();
        let numeric_only = candidates.iter().any(|(_, v)| is_numeric(v));

        let mut best: Option<(&Checkpoint, &Value)> = None;
        for (chk, value) in candidates {
            if numeric_only && !is_numeric(value) {
                continue;
            }
            let replace = match best {
                None => true,
                Some((_, best_value)) => matches!(
                    compare_metric(value, best_value, primary.goal),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
            };
            if replace {
                best = Some((chk, value));
            }
        }
        best.map(|(chk, _)| chk)
    }
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_))
}

/// Orders `a` against `b` so that better values are greater. `None` if they are not comparable.
fn compare_metric(a: &Value, b: &Value, goal: Goal) -> Option<Ordering> {
    let ordering = if a.greater_than(b) {
        Ordering::Greater
    } else if a.less_than(b) {
        Ordering::Less
    } else if a.equal(b) {
        Ordering::Equal
    } else {
        return None;
    };
    Some(match goal {
        Goal::Maximize => ordering,
        Goal::Minimize => ordering.reverse(),
    })
}

/// Loads every experiment under `metadata/experiments/`. Unreadable files are skipped with a
/// warning so one bad record doesn't hide the rest.
pub fn list_experiments(repo: &dyn Repository) -> Result<Vec<Experiment>> {
    let paths = repo.list(EXPERIMENTS_METADATA_DIR)?;
    let mut experiments = Vec::with_capacity(paths.len());
    for path in paths {
        match crate::load_from_path::<Experiment>(repo, &path) {
            Ok(exp) => experiments.push(exp),
            Err(e) => warn!("Failed to load metadata from {:?}: {}", path, e),
        }
    }
    Ok(experiments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::PrimaryMetric;
    use chrono::TimeZone;
    use ks_repository::DiskRepository;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).single().expect("timestamp")
    }

    fn checkpoint(
        id: &str,
        secs: i64,
        metrics: &[(&str, Value)],
        primary: Option<(&str, Goal)>,
    ) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            created: at(secs),
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            step: secs,
            path: String::new(),
            primary_metric: primary.map(|(name, goal)| PrimaryMetric {
                name: name.to_string(),
                goal,
            }),
        }
    }

    #[test]
    fn best_and_latest_with_minimized_loss() {
        let mut exp = Experiment::new("e".into(), at(0));
        let loss = Some(("loss", Goal::Minimize));
        exp.checkpoints = vec![
            checkpoint("c1", 1, &[("loss", Value::Float(0.1))], loss),
            checkpoint("c2", 2, &[("loss", Value::Float(0.01))], loss),
            checkpoint("c3", 3, &[("loss", Value::Float(0.02))], loss),
        ];
        assert_eq!(exp.latest_checkpoint().map(|c| c.id.as_str()), Some("c3"));
        assert_eq!(exp.best_checkpoint().map(|c| c.id.as_str()), Some("c2"));
    }

    #[test]
    fn best_with_maximized_metric_skips_missing_values() {
        let mut exp = Experiment::new("e".into(), at(0));
        let acc = Some(("acc", Goal::Maximize));
        exp.checkpoints = vec![
            checkpoint("c1", 1, &[("acc", Value::Float(0.5))], acc),
            checkpoint("c2", 2, &[], acc),
            checkpoint("c3", 3, &[("acc", Value::Int(1))], acc),
            checkpoint("c4", 4, &[("acc", Value::Float(0.7))], acc),
        ];
        assert_eq!(exp.best_checkpoint().map(|c| c.id.as_str()), Some("c3"));
    }

    #[test]
    fn no_best_without_primary_metric_or_values() {
        let mut exp = Experiment::new("e".into(), at(0));
        assert!(exp.best_checkpoint().is_none());
        assert!(exp.latest_checkpoint().is_none());

        exp.checkpoints = vec![checkpoint("c1", 1, &[("loss", Value::Float(0.1))], None)];
        assert!(exp.best_checkpoint().is_none());

        exp.checkpoints = vec![checkpoint("c1", 1, &[], Some(("loss", Goal::Minimize)))];
        assert!(exp.best_checkpoint().is_none());
    }

    #[test]
    fn mistyped_metric_values_are_treated_as_missing() {
        let mut exp = Experiment::new("e".into(), at(0));
        let loss = Some(("loss", Goal::Minimize));
        exp.checkpoints = vec![
            checkpoint("c1", 1, &[("loss", Value::String("low".into()))], loss),
            checkpoint("c2", 2, &[("loss", Value::Float(0.3))], loss),
            checkpoint("c3", 3, &[("loss", Value::Bool(true))], loss),
            checkpoint("c4", 4, &[("loss", Value::Float(0.5))], loss),
        ];
        assert_eq!(exp.best_checkpoint().map(|c| c.id.as_str()), Some("c2"));
    }

    #[test]
    fn latest_ignores_stored_order() {
        let mut exp = Experiment::new("e".into(), at(0));
        exp.checkpoints = vec![
            checkpoint("late", 10, &[], None),
            checkpoint("early", 1, &[], None),
        ];
        assert_eq!(exp.latest_checkpoint().map(|c| c.id.as_str()), Some("late"));
    }

    #[test]
    fn save_and_list_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let repo = DiskRepository::new(dir.path());
        let mut exp = Experiment::new("abc1".into(), at(0));
        exp.params.insert("learning_rate".into(), Value::Float(0.001));
        exp.checkpoints = vec![checkpoint("c1", 1, &[("accuracy", Value::Float(0.987))], None)];
        exp.save(&repo).expect("save");
        repo.put("metadata/experiments/broken.json", b"{nope").expect("put");

        let loaded = list_experiments(&repo).expect("list");
        assert_eq!(loaded, vec![exp]);
    }

    #[test]
    fn reads_replicate_version_alias_and_writes_keepsake_version() {
        let exp: Experiment = serde_json::from_str(
            r#"{"id": "x", "created": "2020-01-01T00:00:00Z", "checkpoints": null, "replicate_version": "0.2.0"}"#,
        )
        .expect("decode");
        assert_eq!(exp.keepsake_version, "0.2.0");
        assert!(exp.checkpoints.is_empty());
        let json = serde_json::to_value(&exp).expect("encode");
        assert_eq!(json["keepsake_version"], "0.2.0");
        assert!(json.get("replicate_version").is_none());
    }
}
