use crate::serde_util::null_default;
use chrono::{DateTime, Utc};
use ks_param::{Value, ValueMap};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Goal {
    Maximize,
    Minimize,
}

impl Goal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Goal::Maximize => "maximize",
            Goal::Minimize => "minimize",
        }
    }

    pub fn parse(s: &str) -> Option<Goal> {
        match s.to_ascii_lowercase().as_str() {
            "maximize" => Some(Goal::Maximize),
            "minimize" => Some(Goal::Minimize),
            _ => None,
        }
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Goal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Goal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Goal::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid goal {:?}, expected \"maximize\" or \"minimize\"",
                s
            ))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryMetric {
    pub name: String,
    pub goal: Goal,
}

/// A snapshot of training state. Checkpoints are stored inside their experiment's metadata
/// file, never on their own.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub created: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_default")]
    pub metrics: ValueMap,
    #[serde(default, deserialize_with = "null_default")]
    pub step: i64,
    #[serde(default, deserialize_with = "null_default")]
    pub path: String,
    #[serde(default)]
    pub primary_metric: Option<PrimaryMetric>,
}

impl Checkpoint {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    pub fn storage_tar_path(&self) -> String {
        format!("checkpoints/{}.tar.gz", self.id)
    }

    /// Metrics ordered by name.
    pub fn sorted_metrics(&self) -> Vec<(&str, &Value)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v)).collect()
    }

    /// Value of the primary metric, if one is declared and recorded.
    pub fn primary_metric_value(&self) -> Option<&Value> {
        let primary = self.primary_metric.as_ref()?;
        self.metrics.get(&primary.name)
    }

    /// Problems that would make this checkpoint unsafe to save.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if let Some(primary) = &self.primary_metric {
            if !self.metrics.contains_key(&primary.name) {
                errors.push(format!(
                    "Primary metric '{}' is not defined in metrics",
                    primary.name
                ));
            }
        }
        errors.extend(validate_path(&self.path));
        errors
    }
}

/// Snapshot paths are relative to the project directory and may not leave it.
pub fn validate_path(path: &str) -> Option<String> {
    if path.starts_with('/') || path.starts_with("..") {
        return Some(format!(
            "The path passed to checkpoint() must be within the project directory, got: {}",
            path
        ));
    }
    None
}

pub fn short_id(id: &str) -> &str {
    id.get(..7).unwrap_or(id)
}
