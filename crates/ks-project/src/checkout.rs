use crate::checkpoint::Checkpoint;
use crate::experiment::Experiment;
use crate::project::Project;
use ks_core::{Error, Result};
use std::path::Path;
use tracing::{debug, info};

impl Project {
    /// Restores an experiment's files into `output_dir`, with the checkpoint's files (if any)
    /// extracted on top. With `item`, only that file or directory is restored.
    ///
    /// Fails if neither the experiment nor the checkpoint stored anything matching.
    pub fn checkout(
        &self,
        experiment: &Experiment,
        checkpoint: Option<&Checkpoint>,
        output_dir: &Path,
        item: Option<&str>,
    ) -> Result<()> {
        let what = match item {
            Some(item) => format!("the path {}", item),
            None => "the files".to_string(),
        };

        let experiment_found =
            self.extract(&experiment.storage_tar_path(), item, output_dir)?;
        if experiment_found {
            info!(
                "Copied {} from experiment {} to {:?}",
                what,
                experiment.short_id(),
                output_dir.join(&experiment.path).display().to_string()
            );
        } else {
            debug!("No experiment data found");
        }

        let mut checkpoint_found = false;
        if let Some(chk) = checkpoint {
            checkpoint_found = self.extract(&chk.storage_tar_path(), item, output_dir)?;
            if checkpoint_found {
                info!(
                    "Copied {} from checkpoint {} to {:?}",
                    what,
                    chk.short_id(),
                    output_dir.join(&chk.path).display().to_string()
                );
            } else {
                debug!("No checkpoint data found");
            }
        }

        if !experiment_found && !checkpoint_found {
            return Err(nothing_to_check_out(experiment, checkpoint, item));
        }

        info!(
            "If you want to run this experiment again, this is how it was run:\n\n  {}\n",
            experiment.command
        );
        Ok(())
    }

    /// False if the tarball, or the item inside it, does not exist.
    fn extract(&self, tar_path: &str, item: Option<&str>, output_dir: &Path) -> Result<bool> {
        let result = match item {
            Some(item) => self
                .repository()
                .get_path_item_tar(tar_path, item, output_dir),
            None => self.repository().get_path_tar(tar_path, output_dir),
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_does_not_exist() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn nothing_to_check_out(
    experiment: &Experiment,
    checkpoint: Option<&Checkpoint>,
    item: Option<&str>,
) -> Error {
    match (checkpoint, item) {
        (None, None) => Error::other(format!(
            "The experiment {} does not have any files associated with it. You need to pass the 'path' argument to 'init()' to check out files.",
            experiment.short_id()
        )),
        (Some(chk), None) => Error::DoesNotExist(format!(
            "Neither the experiment {} nor the checkpoint {} has any files associated with it. You need to pass the 'path' argument to 'init()' or 'checkpoint()' to check out files.",
            experiment.short_id(),
            chk.short_id()
        )),
        (None, Some(item)) => Error::other(format!(
            "The experiment {} does not have the path {} associated with it. You need to pass the 'path' argument to 'init()' to check out files.",
            experiment.short_id(),
            item
        )),
        (Some(chk), Some(item)) => Error::other(format!(
            "Neither the experiment {} nor the checkpoint {} has the path {} associated with it. You need to pass the 'path' argument to 'init()' or 'checkpoint()' to check out files.",
            experiment.short_id(),
            chk.short_id(),
            item
        )),
    }
}
