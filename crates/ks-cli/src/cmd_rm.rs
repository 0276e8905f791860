use anyhow::Result;
use clap::Args;
use ks_project::{CheckpointOrExperiment, Project};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Remove experiments or checkpoints
///
/// To remove experiments or checkpoints, pass any number of IDs (or prefixes).
#[derive(Args)]
pub struct RmCommand {
    /// Experiment or checkpoint IDs (or unique prefixes)
    #[arg(required = true, num_args = 1..)]
    pub ids: Vec<String>,

    /// Delete without asking
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Repository URL (e.g. 's3://my-keepsake-bucket'). Default: from keepsake.yaml
    #[arg(short = 'R', long)]
    pub repository: Option<String>,
}

pub fn run(cmd: RmCommand, project_dir: Option<&Path>) -> Result<()> {
    let project = crate::utils::open_project(cmd.repository.as_deref(), project_dir)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    remove(&mut out, &project, &cmd.ids, cmd.force, crate::utils::confirm)
}

/// Resolves every prefix before deleting anything, so a typo deletes nothing.
pub fn remove<W: Write>(
    out: &mut W,
    project: &Project,
    prefixes: &[String],
    force: bool,
    confirm: impl FnOnce(&str) -> Result<bool>,
) -> Result<()> {
    let targets = prefixes
        .iter()
        .map(|p| project.checkpoint_or_experiment_from_prefix(p))
        .collect::<Result<Vec<_>, _>>()?;
    if targets.is_empty() {
        return Ok(());
    }

    if !force {
        writeln!(out, "You are about to delete the following:")?;
        for target in &targets {
            writeln!(out, "{}", describe(target))?;
        }
        out.flush()?;
        if !confirm("\nDo you want to continue?")? {
            return Ok(());
        }
    }

    // Re-resolved one at a time, since removing a checkpoint rewrites its experiment.
    for prefix in prefixes {
        let target = project.checkpoint_or_experiment_from_prefix(prefix)?;
        match target.checkpoint {
            Some(chk) => {
                info!("Removing checkpoint {}...", chk.short_id());
                project.delete_checkpoint(&chk)?;
                let mut exp = project.experiment_by_id(&target.experiment.id)?;
                exp.checkpoints.retain(|c| c.id != chk.id);
                project.save_experiment(&exp)?;
            }
            None => {
                let exp = target.experiment;
                info!("Removing experiment {} and its checkpoints...", exp.short_id());
                for chk in &exp.checkpoints {
                    project.delete_checkpoint(chk)?;
                }
                project.delete_experiment(&exp)?;
            }
        }
    }
    Ok(())
}

fn describe(target: &CheckpointOrExperiment) -> String {
    match &target.checkpoint {
        Some(chk) => format!("* Checkpoint {}", chk.short_id()),
        None => format!(
            "* Experiment {} ({} checkpoints)",
            target.experiment.short_id(),
            target.experiment.checkpoints.len()
        ),
    }
}
