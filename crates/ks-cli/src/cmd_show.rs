use crate::format::{format_time, format_timestamp, table_writer};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use ks_project::{Checkpoint, Experiment, Project};
use std::io::Write;
use std::path::Path;

const INTERESTING_PYTHON_PACKAGES: &[&str] = &[
    "cntk",
    "keras",
    "jax",
    "mxnet",
    "numpy",
    "pandas",
    "pytorch_lightning",
    "sklearn",
    "tensorflow",
    "torch",
];

/// View information about an experiment or checkpoint
#[derive(Args)]
pub struct ShowCommand {
    /// Experiment or checkpoint ID (or a unique prefix of one)
    pub id: String,

    /// Show all information
    #[arg(long)]
    pub all: bool,

    /// Print output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Repository URL (e.g. 's3://my-keepsake-bucket'). Default: from keepsake.yaml
    #[arg(short = 'R', long)]
    pub repository: Option<String>,
}

pub fn run(cmd: ShowCommand, project_dir: Option<&Path>) -> Result<()> {
    let project = crate::utils::open_project(cmd.repository.as_deref(), project_dir)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    show(&mut out, &project, &cmd.id, cmd.json, cmd.all, Utc::now())
}

pub fn show<W: Write>(
    out: &mut W,
    project: &Project,
    prefix: &str,
    json: bool,
    all: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = project.checkpoint_or_experiment_from_prefix(prefix)?;
    let running = project.experiment_is_running(&result.experiment.id)?;

    if json {
        match &result.checkpoint {
            Some(chk) => serde_json::to_writer_pretty(&mut *out, chk)?,
            None => serde_json::to_writer_pretty(&mut *out, &result.experiment)?,
        }
        writeln!(out)?;
        return Ok(());
    }

    match &result.checkpoint {
        Some(chk) => show_checkpoint(out, &result.experiment, chk, running, all),
        None => show_experiment(out, &result.experiment, running, all, now),
    }
}

fn show_checkpoint<W: Write>(
    out: &mut W,
    exp: &Experiment,
    chk: &Checkpoint,
    running: bool,
    all: bool,
) -> Result<()> {
    writeln!(out, "Checkpoint: {}\n", chk.id)?;

    let mut w = table_writer(&mut *out, 0);
    writeln!(w, "Created:\t{}", format_timestamp(chk.created))?;
    writeln!(w, "Path:\t{}", chk.path)?;
    writeln!(w, "Step:\t{}", chk.step)?;
    writeln!(w, "\t")?;
    writeln!(w, "Experiment\t")?;
    writeln!(w, "ID:\t{}", exp.id)?;
    write_experiment_common(&mut w, exp, running, all)?;

    writeln!(w, "Metrics\t")?;
    if chk.metrics.is_empty() {
        writeln!(w, "(none)\t")?;
    }
    for (name, value) in chk.sorted_metrics() {
        match &chk.primary_metric {
            Some(primary) if primary.name == name => {
                writeln!(w, "{}:\t{} (primary, {})", name, value, primary.goal)?
            }
            _ => writeln!(w, "{}:\t{}", name, value)?,
        }
    }
    writeln!(w)?;
    w.flush()?;
    Ok(())
}

fn show_experiment<W: Write>(
    out: &mut W,
    exp: &Experiment,
    running: bool,
    all: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    writeln!(out, "Experiment: {}\n", exp.id)?;

    let mut w = table_writer(&mut *out, 0);
    write_experiment_common(&mut w, exp, running, all)?;
    w.flush()?;
    drop(w);

    writeln!(out, "Checkpoints")?;
    let best = exp.best_checkpoint();
    // Columns come from the first checkpoint's metrics.
    let metric_names: Vec<&str> = exp
        .checkpoints
        .first()
        .map(|c| c.metrics.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut cw = table_writer(&mut *out, 0);
    let mut headings = vec!["ID".to_string(), "STEP".to_string(), "CREATED".to_string()];
    headings.extend(metric_names.iter().map(|n| n.to_uppercase()));
    writeln!(cw, "{}", headings.join("\t"))?;

    for chk in &exp.checkpoints {
        let mut columns = vec![
            chk.short_id().to_string(),
            chk.step.to_string(),
            format_time(chk.created, now),
        ];
        for name in &metric_names {
            let mut cell = chk
                .metrics
                .get(*name)
                .map(|v| v.short_string(10, 5))
                .unwrap_or_default();
            let is_best = best.is_some_and(|b| b.id == chk.id);
            if is_best && chk.primary_metric.as_ref().is_some_and(|p| p.name == *name) {
                cell.push_str(" (best)");
            }
            columns.push(cell);
        }
        writeln!(cw, "{}", columns.join("\t"))?;
    }
    cw.flush()?;
    drop(cw);

    writeln!(out)?;
    writeln!(out, "To see more details about a checkpoint, run:")?;
    writeln!(out, "  keepsake show <checkpoint ID>")?;
    Ok(())
}

fn write_experiment_common<W: Write>(
    w: &mut W,
    exp: &Experiment,
    running: bool,
    all: bool,
) -> Result<()> {
    writeln!(w, "Created:\t{}", format_timestamp(exp.created))?;
    writeln!(w, "Status:\t{}", if running { "running" } else { "stopped" })?;
    writeln!(w, "Host:\t{}", exp.host)?;
    writeln!(w, "User:\t{}", exp.user)?;
    writeln!(w, "Command:\t{}", exp.command)?;

    writeln!(w, "\t")?;
    writeln!(w, "Params\t")?;
    if exp.params.is_empty() {
        writeln!(w, "(none)\t")?;
    }
    for (name, value) in exp.sorted_params() {
        writeln!(w, "{}:\t{}", name, value)?;
    }

    writeln!(w, "\t")?;
    writeln!(w, "System\t")?;
    writeln!(w, "Python version:\t{}", exp.python_version)?;

    writeln!(w, "\t")?;
    writeln!(w, "Python packages\t")?;
    if exp.python_packages.is_empty() {
        writeln!(w, "(none)\t")?;
    } else {
        let (names, more) = python_packages_to_display(exp, all);
        for name in names {
            writeln!(w, "{}:\t{}", name, exp.python_packages[name])?;
        }
        if more > 0 {
            writeln!(w, "... and {} more. Use --all to view.", more)?;
        }
    }
    writeln!(w, "\t")?;
    Ok(())
}

/// Package names to list, and how many were left out. Long lists are cut down to well-known
/// ML packages, or the first five when none of those are installed.
fn python_packages_to_display(exp: &Experiment, all: bool) -> (Vec<&str>, usize) {
    let names: Vec<&str> = exp.python_packages.keys().map(String::as_str).collect();
    if all || names.len() <= 5 {
        return (names, 0);
    }
    let mut shown: Vec<&str> = names
        .iter()
        .copied()
        .filter(|n| INTERESTING_PYTHON_PACKAGES.contains(n))
        .collect();
    if shown.is_empty() {
        shown = names[..5].to_vec();
    }
    let more = names.len() - shown.len();
    (shown, more)
}
