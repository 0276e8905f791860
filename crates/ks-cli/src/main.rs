use anyhow::Result;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

mod cmd_checkout;
mod cmd_diff;
mod cmd_ls;
mod cmd_rm;
mod cmd_show;

mod format;
mod logger;
mod utils;

#[derive(Parser)]
#[command(name = "keepsake", version, about = "Version control for machine learning")]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory. Default: nearest parent directory with keepsake.yaml
    #[arg(short = 'D', long = "project-directory", global = true, value_hint = ValueHint::DirPath)]
    project_directory: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List experiments in this project
    #[command(alias = "list")]
    Ls(cmd_ls::LsCommand),
    /// List running experiments in this project
    #[command(alias = "processes")]
    Ps(cmd_ls::LsCommand),
    Show(cmd_show::ShowCommand),
    Diff(cmd_diff::DiffCommand),
    Checkout(cmd_checkout::CheckoutCommand),
    /// Remove experiments or checkpoints
    #[command(alias = "delete")]
    Rm(cmd_rm::RmCommand),
}

fn main() {
    let cli = Cli::parse();
    logger::init_logger(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let project_dir = cli.project_directory.as_deref();
    match cli.command {
        Commands::Ls(cmd) => cmd_ls::run(cmd, project_dir, false),
        Commands::Ps(cmd) => cmd_ls::run(cmd, project_dir, true),
        Commands::Show(cmd) => cmd_show::run(cmd, project_dir),
        Commands::Diff(cmd) => cmd_diff::run(cmd, project_dir),
        Commands::Checkout(cmd) => cmd_checkout::run(cmd, project_dir),
        Commands::Rm(cmd) => cmd_rm::run(cmd, project_dir),
    }
}
