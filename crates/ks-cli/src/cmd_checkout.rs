use anyhow::{bail, Context, Result};
use clap::{Args, ValueHint};
use ks_core::files::{dir_is_empty, ensure_dir, is_dir};
use ks_project::{Checkpoint, Project};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Copy files from an experiment or checkpoint into the project directory
///
/// If an experiment ID is passed, the files from its best checkpoint are checked out, or its
/// latest checkpoint if no primary metric is set.
#[derive(Args)]
pub struct CheckoutCommand {
    /// Experiment or checkpoint ID (or a unique prefix of one)
    pub id: String,

    /// Output directory. Default: project directory
    #[arg(short = 'o', long = "output-directory", value_hint = ValueHint::DirPath)]
    pub output_directory: Option<PathBuf>,

    /// Overwrite existing files without asking
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Only check out this file or directory
    #[arg(long)]
    pub path: Option<String>,

    /// Repository URL (e.g. 's3://my-keepsake-bucket'). Default: from keepsake.yaml
    #[arg(short = 'R', long)]
    pub repository: Option<String>,
}

pub fn run(cmd: CheckoutCommand, project_dir: Option<&Path>) -> Result<()> {
    let project = crate::utils::open_project(cmd.repository.as_deref(), project_dir)?;
    let output_dir = cmd
        .output_directory
        .clone()
        .unwrap_or_else(|| project.directory().to_path_buf());
    checkout(
        &project,
        &cmd.id,
        &output_dir,
        cmd.path.as_deref(),
        cmd.force,
        crate::utils::confirm,
    )
}

/// Checks out `prefix` into `output_dir`. `confirm` is asked before writing into a
/// non-empty directory unless `force` is set.
pub fn checkout(
    project: &Project,
    prefix: &str,
    output_dir: &Path,
    item: Option<&str>,
    force: bool,
    confirm: impl FnOnce(&str) -> Result<bool>,
) -> Result<()> {
    prepare_output_dir(output_dir)?;

    let result = project.checkpoint_or_experiment_from_prefix(prefix)?;
    let experiment = result.experiment;
    let checkpoint = match result.checkpoint {
        Some(chk) => {
            info!(
                "Checking out files from checkpoint {} and its experiment {}",
                chk.short_id(),
                experiment.short_id()
            );
            Some(chk)
        }
        None => pick_checkpoint(&experiment),
    };

    let display_path = match &checkpoint {
        Some(chk) if experiment.path.is_empty() => output_dir.join(&chk.path),
        _ => output_dir.join(&experiment.path),
    };
    if !force && !is_empty(&display_path)? {
        warn!("The directory {:?} is not empty.", display_path.display().to_string());
        warn!(
            "This checkout may overwrite existing files. Make sure they're saved in Git or Keepsake so they're safe!"
        );
        if !confirm("Do you want to continue?")? {
            info!("Aborting.");
            return Ok(());
        }
    }

    project.checkout(&experiment, checkpoint.as_ref(), output_dir, item)?;
    Ok(())
}

fn prepare_output_dir(output_dir: &Path) -> Result<()> {
    if output_dir.exists() {
        if !is_dir(output_dir) {
            bail!("Checkout path {:?} is not a directory", output_dir.display().to_string());
        }
        return Ok(());
    }
    ensure_dir(output_dir).with_context(|| {
        format!("Failed to create directory {:?}", output_dir.display().to_string())
    })
}

/// Best checkpoint, falling back to the latest.
fn pick_checkpoint(experiment: &ks_project::Experiment) -> Option<Checkpoint> {
    if let Some(best) = experiment.best_checkpoint() {
        info!(
            "Checking out files from experiment {} and its best checkpoint {}",
            experiment.short_id(),
            best.short_id()
        );
        return Some(best.clone());
    }
    if let Some(latest) = experiment.latest_checkpoint() {
        info!(
            "Checking out files from experiment {} and its latest checkpoint {}",
            experiment.short_id(),
            latest.short_id()
        );
        return Some(latest.clone());
    }
    info!("Checking out files from experiment {}", experiment.short_id());
    None
}

/// A file in the way counts as content.
fn is_empty(path: &Path) -> Result<bool> {
    if path.exists() && !path.is_dir() {
        return Ok(false);
    }
    Ok(dir_is_empty(path)?)
}
