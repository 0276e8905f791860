use crate::format::{format_time, table_writer, write_row};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use ks_param::{Filters, Operator, Sorter, Type, Value, ValueGetter, ValueMap};
use ks_project::{Checkpoint, Project};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

const VALUE_MAX_LENGTH: usize = 20;
const VALUE_PRECISION: usize = 5;

#[derive(Args)]
#[command(after_help = "Examples:\n  \
        # List all experiments in the current project\n  \
        keepsake ls\n\n  \
        # Experiments that have run for 50 steps or less\n  \
        keepsake ls --filter \"step <= 50\"\n\n  \
        # Experiments where \"optimizer\" is \"adam\" and the best \"accuracy\" is above 0.8\n  \
        keepsake ls --filter \"optimizer = adam\" --filter \"accuracy > 0.8\"\n\n  \
        # Stopped experiments sorted by the metric \"val_loss\"\n  \
        keepsake ls --sort \"val_loss\" --filter \"status = stopped\"")]
pub struct LsCommand {
    /// Repository URL (e.g. 's3://my-keepsake-bucket'). Default: from keepsake.yaml
    #[arg(short = 'R', long)]
    pub repository: Option<String>,

    /// Print output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Output all params and metrics. Default: only params/metrics that differ
    #[arg(long)]
    pub all: bool,

    /// Do not truncate parameter values
    #[arg(long)]
    pub full: bool,

    /// Only print experiment IDs
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Filters (format: "<name> <operator> <value>")
    #[arg(short = 'f', long = "filter")]
    pub filters: Vec<String>,

    /// Sort key. Suffix with '-desc' for descending sort, e.g. --sort=created-desc
    #[arg(short = 's', long, default_value = "created")]
    pub sort: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Json,
    Table,
    FullTable,
    Quiet,
}

impl LsCommand {
    fn format(&self) -> Result<Format> {
        if self.full && self.json {
            bail!("Cannot use the --full flag in combination with --json");
        }
        if self.quiet && self.json {
            bail!("Cannot use the --quiet flag in combination with --json");
        }
        if self.quiet && self.full {
            bail!("Cannot use the --quiet flag in combination with --full");
        }
        if self.quiet && self.all {
            bail!("Cannot use the --quiet flag in combination with --all");
        }
        Ok(if self.json {
            Format::Json
        } else if self.quiet {
            Format::Quiet
        } else if self.full {
            Format::FullTable
        } else {
            Format::Table
        })
    }
}

/// One row of the listing.
#[derive(Clone, Debug, Serialize)]
pub struct ListExperiment {
    pub id: String,
    pub created: DateTime<Utc>,
    pub params: ValueMap,
    pub command: String,
    pub num_checkpoints: usize,
    pub latest_checkpoint: Option<Checkpoint>,
    pub best_checkpoint: Option<Checkpoint>,
    pub user: String,
    pub host: String,
    pub running: bool,
}

impl ValueGetter for ListExperiment {
    fn get_value(&self, name: &str) -> Option<Value> {
        match name {
            "started" | "created" => Some(Value::Float(self.created.timestamp() as f64)),
            "step" => Some(Value::Int(
                self.latest_checkpoint.as_ref().map(|c| c.step).unwrap_or(0),
            )),
            "user" => Some(Value::String(self.user.clone())),
            "host" => Some(Value::String(self.host.clone())),
            "command" => Some(Value::String(self.command.clone())),
            "status" => Some(Value::String(
                if self.running { "running" } else { "stopped" }.to_string(),
            )),
            _ => self
                .best_checkpoint
                .as_ref()
                .and_then(|c| c.metrics.get(name))
                .or_else(|| self.params.get(name))
                .cloned(),
        }
    }
}

pub fn run(cmd: LsCommand, project_dir: Option<&Path>, running_only: bool) -> Result<()> {
    let format = cmd.format()?;
    let mut filters = Filters::make(cmd.filters.as_slice())?;
    if running_only {
        filters.set_exclusive(
            "status",
            Operator::Equal,
            Value::String("running".to_string()),
        );
    }
    let sorter = Sorter::new(&cmd.sort);
    let project = crate::utils::open_project(cmd.repository.as_deref(), project_dir)?;

    let experiments = list_experiments(&project, &filters, &sorter)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    output(&mut out, &experiments, format, cmd.all, Utc::now())
}

/// Experiments matching `filters`, oldest first, then ordered by `sorter`.
pub fn list_experiments(
    project: &Project,
    filters: &Filters,
    sorter: &Sorter,
) -> Result<Vec<ListExperiment>> {
    let mut result = Vec::new();
    for exp in project.experiments()? {
        let running = project.experiment_is_running(&exp.id)?;
        let row = ListExperiment {
            latest_checkpoint: exp.latest_checkpoint().cloned(),
            best_checkpoint: exp.best_checkpoint().cloned(),
            num_checkpoints: exp.checkpoints.len(),
            id: exp.id,
            created: exp.created,
            params: exp.params,
            command: exp.command,
            user: exp.user,
            host: exp.host,
            running,
        };
        if filters.matches(&row) {
            result.push(row);
        }
    }
    result.sort_by_key(|e| e.created);
    sorter.sort(&mut result);
    Ok(result)
}

pub fn output<W: Write>(
    out: &mut W,
    experiments: &[ListExperiment],
    format: Format,
    all: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    match format {
        Format::Json => {
            serde_json::to_writer_pretty(&mut *out, experiments)?;
            writeln!(out)?;
        }
        Format::Quiet => {
            for exp in experiments {
                writeln!(out, "{}", exp.id)?;
            }
        }
        Format::Table => output_table(out, experiments, all, true, now)?,
        Format::FullTable => output_table(out, experiments, all, false, now)?,
    }
    Ok(())
}

fn output_table<W: Write>(
    out: &mut W,
    experiments: &[ListExperiment],
    all: bool,
    truncate: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(first) = experiments.first() else {
        writeln!(out, "No experiments found")?;
        return Ok(());
    };

    let params_to_display = params_to_display(experiments, all);
    let metrics_to_display = metrics_to_display(experiments, all);
    let has_best_checkpoint = experiments.iter().any(|e| e.best_checkpoint.is_some());
    let display_host = experiments.iter().any(|e| e.host != first.host);
    let display_user = experiments.iter().any(|e| e.user != first.user);

    let mut tw = table_writer(&mut *out, 0);
    let mut headings = vec!["EXPERIMENT", "STARTED", "STATUS"];
    if display_host {
        headings.push("HOST");
    }
    if display_user {
        headings.push("USER");
    }
    headings.push("PARAMS");
    if has_best_checkpoint {
        headings.push("BEST CHECKPOINT");
    }
    headings.push("LATEST CHECKPOINT");
    writeln!(tw, "{}", headings.join("\t"))?;

    for exp in experiments {
        let mut columns = vec![
            ks_project::checkpoint::short_id(&exp.id).to_string(),
            format_time(exp.created, now),
            if exp.running { "running" } else { "stopped" }.to_string(),
        ];
        if display_host {
            columns.push(exp.host.clone());
        }
        if display_user {
            columns.push(exp.user.clone());
        }
        let params: Vec<String> = params_to_display
            .iter()
            .filter_map(|key| {
                exp.params.get(key).map(|val| {
                    if truncate {
                        format!("{}={}", key, val.short_string(VALUE_MAX_LENGTH, VALUE_PRECISION))
                    } else {
                        format!("{}={}", key, val)
                    }
                })
            })
            .collect();
        columns.push(params.join("\n"));
        if has_best_checkpoint {
            columns.push(
                exp.best_checkpoint
                    .as_ref()
                    .map(|c| display_checkpoint(c, &metrics_to_display))
                    .unwrap_or_default(),
            );
        }
        columns.push(
            exp.latest_checkpoint
                .as_ref()
                .map(|c| display_checkpoint(c, &metrics_to_display))
                .unwrap_or_default(),
        );
        write_row(&mut tw, &columns)?;
    }
    tw.flush()?;
    Ok(())
}

fn display_checkpoint(checkpoint: &Checkpoint, metrics_to_display: &[String]) -> String {
    let mut lines = vec![format!("{} (step {})", checkpoint.short_id(), checkpoint.step)];
    for key in metrics_to_display {
        if let Some(v) = checkpoint.metrics.get(key) {
            lines.push(format!(
                "{}={}",
                key,
                v.short_string(VALUE_MAX_LENGTH, VALUE_PRECISION)
            ));
        }
    }
    lines.join("\n")
}

/// Param names to show, sorted. Without `all`, only params whose value differs between
/// experiments. Objects are never shown.
fn params_to_display(experiments: &[ListExperiment], all: bool) -> Vec<String> {
    let mut names = BTreeSet::new();
    let mut first_values = ValueMap::new();
    for exp in experiments {
        for (key, val) in &exp.params {
            if val.value_type() == Type::Object {
                continue;
            }
            if all {
                names.insert(key.clone());
                continue;
            }
            match first_values.get(key) {
                Some(first) => {
                    if first.not_equal(val) {
                        names.insert(key.clone());
                    }
                }
                None => {
                    first_values.insert(key.clone(), val.clone());
                }
            }
        }
    }
    names.into_iter().collect()
}

/// Metric names to show, sorted. Without `all`, only primary metrics.
fn metrics_to_display(experiments: &[ListExperiment], all: bool) -> Vec<String> {
    let mut names = BTreeSet::new();
    for exp in experiments {
        if all {
            let checkpoint = exp.best_checkpoint.as_ref().or(exp.latest_checkpoint.as_ref());
            if let Some(chk) = checkpoint {
                names.extend(chk.metrics.keys().cloned());
            }
        } else if let Some(primary) = exp
            .best_checkpoint
            .as_ref()
            .and_then(|c| c.primary_metric.as_ref())
        {
            names.insert(primary.name.clone());
        }
    }
    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ks_project::heartbeat::create_heartbeat;
    use ks_project::{Experiment, Goal, PrimaryMetric};
    use ks_repository::{DiskRepository, Repository};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn checkpoint(
        id: &str,
        created: DateTime<Utc>,
        step: i64,
        metrics: &[(&str, Value)],
    ) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            created,
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            step,
            path: String::new(),
            primary_metric: Some(PrimaryMetric {
                name: "metric-1".into(),
                goal: Goal::Minimize,
            }),
        }
    }

    fn params(pairs: &[(&str, Value)]) -> ValueMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn fixture(now: DateTime<Utc>) -> (TempDir, Project) {
        let dir = TempDir::new().expect("tempdir");
        let repo: Arc<dyn Repository> =
            Arc::new(DiskRepository::new(dir.path().join(".keepsake")));

        let mut exp1 = Experiment::new("1eeeeeeeee".into(), now);
        exp1.params = params(&[
            ("param-1", Value::Int(100)),
            ("param-2", Value::String("hello".into())),
        ]);
        exp1.host = "10.1.1.1".into();
        exp1.user = "andreas".into();
        exp1.command = "train.py --foo bar".into();
        exp1.checkpoints = vec![
            checkpoint(
                "1ccccccccc",
                now - Duration::minutes(1),
                10,
                &[("metric-1", Value::Float(0.1)), ("metric-2", Value::Int(2))],
            ),
            checkpoint(
                "2ccccccccc",
                now,
                20,
                &[("metric-1", Value::Float(0.01)), ("metric-2", Value::Int(2))],
            ),
            checkpoint(
                "3ccccccccc",
                now + Duration::milliseconds(1),
                20,
                &[
                    ("metric-1", Value::Float(0.02)),
                    ("metric-2", Value::Int(2)),
                    ("metric-3", Value::None),
                ],
            ),
        ];

        let mut exp2 = Experiment::new("2eeeeeeeee".into(), now - Duration::minutes(1));
        exp2.params = params(&[
            ("param-1", Value::Int(200)),
            ("param-2", Value::String("hello".into())),
            ("param-3", Value::String("hi".into())),
        ]);
        exp2.host = "10.1.1.2".into();
        exp2.user = "andreas".into();
        exp2.checkpoints = vec![checkpoint(
            "4ccccccccc",
            now,
            5,
            &[("metric-3", Value::Float(0.5))],
        )];

        let mut exp3 = Experiment::new("3eeeeeeeee".into(), now - Duration::minutes(2));
        exp3.params = params(&[
            ("param-1", Value::Int(200)),
            ("param-2", Value::String("hello".into())),
            ("param-3", Value::String("hi".into())),
            ("param-4", Value::None),
            ("param-5", Value::String("__verylongparameterstring__".into())),
        ]);
        exp3.host = "10.1.1.2".into();
        exp3.user = "ben".into();

        for exp in [&exp1, &exp2, &exp3] {
            exp.save(repo.as_ref()).expect("save");
        }
        create_heartbeat(repo.as_ref(), &exp1.id, Utc::now()).expect("heartbeat");
        create_heartbeat(repo.as_ref(), &exp2.id, Utc::now() - Duration::minutes(1))
            .expect("heartbeat");
        (dir, Project::new(repo, "."))
    }

    fn render(
        project: &Project,
        filters: &[&str],
        sort: &str,
        format: Format,
        all: bool,
        now: DateTime<Utc>,
    ) -> Vec<Vec<String>> {
        let filters = Filters::make(filters).expect("filters");
        let experiments = list_experiments(project, &filters, &Sorter::new(sort)).expect("list");
        let mut out = Vec::new();
        output(&mut out, &experiments, format, all, now).expect("output");
        String::from_utf8(out)
            .expect("utf8")
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.split("  ")
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn table_shows_only_changed_params_and_primary_metrics() {
        let now = Utc::now();
        let (_dir, project) = fixture(now);
        let rows = render(&project, &[], "started", Format::Table, false, now);
        assert_eq!(
            rows,
            vec![
                vec![
                    "EXPERIMENT",
                    "STARTED",
                    "STATUS",
                    "HOST",
                    "USER",
                    "PARAMS",
                    "BEST CHECKPOINT",
                    "LATEST CHECKPOINT",
                ],
                vec!["3eeeeee", "2 minutes ago", "stopped", "10.1.1.2", "ben", "param-1=200"],
                vec![
                    "2eeeeee",
                    "about a minute ago",
                    "stopped",
                    "10.1.1.2",
                    "andreas",
                    "param-1=200",
                    "4cccccc (step 5)",
                ],
                vec![
                    "1eeeeee",
                    "about a second ago",
                    "running",
                    "10.1.1.1",
                    "andreas",
                    "param-1=100",
                    "2cccccc (step 20)",
                    "3cccccc (step 20)",
                ],
                vec!["metric-1=0.01", "metric-1=0.02"],
            ]
        );
    }

    #[test]
    fn table_with_all_truncates_long_values() {
        let now = Utc::now();
        let (_dir, project) = fixture(now);
        let rows = render(&project, &[], "started", Format::Table, true, now);
        let cells: Vec<&str> = rows.iter().flatten().map(String::as_str).collect();
        assert!(cells.contains(&"param-4=null"));
        assert!(cells.contains(&"param-5=__verylongparamet..."));
        assert!(cells.contains(&"metric-2=2"));
        assert!(cells.contains(&"metric-3=null"));

        let rows = render(&project, &[], "started", Format::FullTable, true, now);
        let cells: Vec<&str> = rows.iter().flatten().map(String::as_str).collect();
        assert!(cells.contains(&"param-5=__verylongparameterstring__"));
    }

    #[test]
    fn filters_on_params_step_and_status() {
        let now = Utc::now();
        let (_dir, project) = fixture(now);

        let ids = |filters: &[&str]| -> Vec<String> {
            render(&project, filters, "started", Format::Quiet, false, now)
                .into_iter()
                .flatten()
                .collect()
        };
        assert_eq!(ids(&["param-1 > 150"]), ["3eeeeeeeee", "2eeeeeeeee"]);
        assert_eq!(ids(&["step >= 5"]), ["2eeeeeeeee", "1eeeeeeeee"]);
        assert_eq!(ids(&["status = running"]), ["1eeeeeeeee"]);
        assert_eq!(ids(&["param-3 = hi"]), ["3eeeeeeeee", "2eeeeeeeee"]);
        assert_eq!(ids(&["param-4 != null"]), Vec::<String>::new());
    }

    #[test]
    fn sorts_descending() {
        let now = Utc::now();
        let (_dir, project) = fixture(now);
        let ids: Vec<String> = render(&project, &[], "started-desc", Format::Quiet, false, now)
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(ids, ["1eeeeeeeee", "2eeeeeeeee", "3eeeeeeeee"]);
    }

    #[test]
    fn json_output_lists_checkpoints_and_status() {
        let now = Utc::now();
        let (_dir, project) = fixture(now);
        let experiments = list_experiments(&project, &Filters::default(), &Sorter::new("created"))
            .expect("list");
        let mut out = Vec::new();
        output(&mut out, &experiments, Format::Json, false, now).expect("output");
        let json: serde_json::Value = serde_json::from_slice(&out).expect("json");
        let first = &json[2];
        assert_eq!(first["id"], "1eeeeeeeee");
        assert_eq!(first["num_checkpoints"], 3);
        assert_eq!(first["best_checkpoint"]["id"], "2ccccccccc");
        assert_eq!(first["latest_checkpoint"]["id"], "3ccccccccc");
        assert_eq!(first["running"], true);
        assert_eq!(first["params"]["param-1"], 100);
    }

    #[test]
    fn empty_project_says_so() {
        let dir = TempDir::new().expect("tempdir");
        let project = Project::new(Arc::new(DiskRepository::new(dir.path())), dir.path());
        let experiments = list_experiments(&project, &Filters::default(), &Sorter::new("created"))
            .expect("list");
        let mut out = Vec::new();
        output(&mut out, &experiments, Format::Table, false, Utc::now()).expect("output");
        assert_eq!(String::from_utf8(out).expect("utf8"), "No experiments found\n");
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        let cmd = |json, full, quiet, all| LsCommand {
            repository: None,
            json,
            all,
            full,
            quiet,
            filters: Vec::new(),
            sort: "created".into(),
        };
        assert_eq!(
            cmd(true, true, false, false).format().expect_err("conflict").to_string(),
            "Cannot use the --full flag in combination with --json"
        );
        assert_eq!(
            cmd(false, false, true, true).format().expect_err("conflict").to_string(),
            "Cannot use the --quiet flag in combination with --all"
        );
        assert_eq!(cmd(false, true, false, true).format().expect("full"), Format::FullTable);
        assert_eq!(cmd(false, false, true, false).format().expect("quiet"), Format::Quiet);
    }
}
