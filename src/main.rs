use clap::Parser;

use fanin::{
    cli::{
        args::{CliArgs, Command},
        command_handlers::{do_graph, do_resolve},
    },
    config::FaninConfig,
    model::workspace::Workspace,
    FanIn,
};

fn run() -> anyhow::Result<()> {
    let cli_args: CliArgs = CliArgs::parse();
    log::debug!("{:?}", cli_args);

    let config = FaninConfig::load(cli_args.config.as_deref())?;
    let workspace = Workspace::from_file(&cli_args.workspace)?;

    match cli_args.cmd {
        Command::Graph { pipeline } => {
            let fanin = FanIn::builder().config(config).try_build()?;
            do_graph(&fanin, &workspace, pipeline.as_deref())
        }
        Command::Resolve {
            pipeline,
            output,
            max_instances,
        } => {
            let mut builder = FanIn::builder().config(config);
            if let Some(max_instances) = max_instances {
                builder = builder.max_instances(max_instances);
            }
            let fanin = builder.try_build()?;
            do_resolve(&fanin, &workspace, &pipeline, output.as_deref())?;
            Ok(())
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
