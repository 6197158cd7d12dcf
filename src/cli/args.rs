use std::path::PathBuf;

use clap::Parser;

/// Resolves fan-in revisions of pipelines over a workspace of configurations and recorded history.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Workspace file with materials, pipelines and their recorded history
    #[clap(short, long, default_value = "workspace.toml")]
    pub workspace: PathBuf,
    /// Settings file. Defaults to fanin.toml in the current directory, if present
    #[clap(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Command {
    ///Prints the fan-in graph of a pipeline, or of every pipeline in the workspace
    Graph {
        #[clap(short, long)]
        pipeline: Option<String>,
    },
    ///Resolves the revisions a pipeline would be triggered with
    Resolve {
        #[clap(short, long)]
        pipeline: String,
        /// Writes a report of the resolved revisions instead of printing it
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// Overrides lookback.max-instances
        #[clap(long)]
        max_instances: Option<usize>,
    },
}
