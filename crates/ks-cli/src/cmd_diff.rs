use crate::format::{format_timestamp, table_writer};
use anyhow::{anyhow, Result};
use clap::Args;
use ks_param::{truncate, ValueMap};
use ks_project::{Checkpoint, Experiment, Project};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Three columns in a 78 character terminal.
const MIN_COLUMN_WIDTH: usize = 78 / 3;
const MAX_VALUE_LENGTH: usize = 50;

/// Compare two experiments or checkpoints
///
/// If an experiment ID is passed, it will pick the best checkpoint from that experiment. If
/// a primary metric is not defined, it will pick the latest checkpoint.
#[derive(Args)]
pub struct DiffCommand {
    /// First experiment or checkpoint ID
    pub left: String,

    /// Second experiment or checkpoint ID
    pub right: String,

    /// Repository URL (e.g. 's3://my-keepsake-bucket'). Default: from keepsake.yaml
    #[arg(short = 'R', long)]
    pub repository: Option<String>,
}

pub fn run(cmd: DiffCommand, project_dir: Option<&Path>) -> Result<()> {
    let project = crate::utils::open_project(cmd.repository.as_deref(), project_dir)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    print_diff(&mut out, &project, &cmd.left, &cmd.right)
}

pub fn print_diff<W: Write>(out: &mut W, project: &Project, left: &str, right: &str) -> Result<()> {
    let (exp1, chk1) = load_checkpoint(project, left)?;
    let (exp2, chk2) = load_checkpoint(project, right)?;

    let mut w = table_writer(&mut *out, MIN_COLUMN_WIDTH);

    heading(&mut w, "Experiment")?;
    writeln!(w, "ID:\t{}\t{}", exp1.short_id(), exp2.short_id())?;
    // The ID row is useful even for one experiment, the rest would only say "no difference".
    if exp1.id != exp2.id {
        print_map_diff(&mut w, &experiment_to_map(&exp1), &experiment_to_map(&exp2))?;
    }
    br(&mut w)?;

    heading(&mut w, "Params")?;
    print_map_diff(
        &mut w,
        &value_map_to_strings(&exp1.params),
        &value_map_to_strings(&exp2.params),
    )?;
    br(&mut w)?;

    heading(&mut w, "Python Packages")?;
    print_map_diff(&mut w, &exp1.python_packages, &exp2.python_packages)?;
    br(&mut w)?;

    heading(&mut w, "Checkpoint")?;
    writeln!(w, "ID:\t{}\t{}", chk1.short_id(), chk2.short_id())?;
    print_map_diff(&mut w, &checkpoint_to_map(&chk1), &checkpoint_to_map(&chk2))?;
    br(&mut w)?;

    heading(&mut w, "Metrics")?;
    print_map_diff(
        &mut w,
        &value_map_to_strings(&chk1.metrics),
        &value_map_to_strings(&chk2.metrics),
    )?;
    br(&mut w)?;

    w.flush()?;
    Ok(())
}

fn heading<W: Write>(w: &mut W, text: &str) -> std::io::Result<()> {
    writeln!(w, "{}\t\t", text)
}

fn br<W: Write>(w: &mut W) -> std::io::Result<()> {
    writeln!(w, "\t\t")
}

/// A prefix that matches a checkpoint gives that checkpoint. A prefix that matches an
/// experiment gives its best checkpoint, or its latest when there is no primary metric.
fn load_checkpoint(project: &Project, prefix: &str) -> Result<(Experiment, Checkpoint)> {
    let result = project.checkpoint_or_experiment_from_prefix(prefix)?;
    let exp = result.experiment;
    if let Some(chk) = result.checkpoint {
        return Ok((exp, chk));
    }
    if let Some(best) = exp.best_checkpoint().cloned() {
        info!("{:?} matches an experiment, picking the best checkpoint", prefix);
        return Ok((exp, best));
    }
    info!("{:?} is an experiment, picking the latest checkpoint", prefix);
    match exp.latest_checkpoint().cloned() {
        Some(latest) => Ok((exp, latest)),
        None => Err(anyhow!(
            "Could not pick best checkpoint for experiment {:?}: it does not have any checkpoints.",
            exp.short_id()
        )),
    }
}

/// Keys whose values differ, with `None` for a side where the key is missing.
fn diff_maps<'a>(
    left: &'a BTreeMap<String, String>,
    right: &'a BTreeMap<String, String>,
) -> BTreeMap<&'a str, (Option<&'a str>, Option<&'a str>)> {
    let mut result = BTreeMap::new();
    for (k, v) in left {
        match right.get(k) {
            Some(r) if r == v => {}
            r => {
                result.insert(k.as_str(), (Some(v.as_str()), r.map(String::as_str)));
            }
        }
    }
    for (k, v) in right {
        if !left.contains_key(k) {
            result.insert(k.as_str(), (None, Some(v.as_str())));
        }
    }
    result
}

fn print_map_diff<W: Write>(
    w: &mut W,
    left: &BTreeMap<String, String>,
    right: &BTreeMap<String, String>,
) -> std::io::Result<()> {
    let diff = diff_maps(left, right);
    if diff.is_empty() {
        return writeln!(w, "(no difference)\t\t");
    }
    for (key, (l, r)) in diff {
        writeln!(
            w,
            "{}:\t{}\t{}",
            key,
            truncate(l.unwrap_or("(not set)"), MAX_VALUE_LENGTH),
            truncate(r.unwrap_or("(not set)"), MAX_VALUE_LENGTH)
        )?;
    }
    Ok(())
}

fn experiment_to_map(exp: &Experiment) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Created".to_string(), format_timestamp(exp.created)),
        ("Host".to_string(), exp.host.clone()),
        ("User".to_string(), exp.user.clone()),
        ("Command".to_string(), exp.command.clone()),
    ])
}

fn checkpoint_to_map(chk: &Checkpoint) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Step".to_string(), chk.step.to_string()),
        ("Created".to_string(), format_timestamp(chk.created)),
        ("Path".to_string(), chk.path.clone()),
    ])
}

fn value_map_to_strings(values: &ValueMap) -> BTreeMap<String, String> {
    values.iter().map(|(k, v)| (k.clone(), v.to_string())).collect()
}
