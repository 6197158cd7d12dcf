use std::path::Path;

use anyhow::bail;
use log::info;

use crate::{
    model::{
        pipeline::PipelineName, report::ResolutionReport, resolved::ResolutionResult,
        workspace::Workspace,
    },
    FanIn,
};

/// Handler to graph command
/// Prints the graph of `pipeline`, or of every pipeline of the workspace
pub fn do_graph(fanin: &FanIn, workspace: &Workspace, pipeline: Option<&str>) -> anyhow::Result<()> {
    let pipelines = match pipeline {
        Some(pipeline) => vec![PipelineName::from(pipeline)],
        None => workspace
            .pipelines()
            .map(|config| config.name.clone())
            .collect(),
    };
    for pipeline in pipelines {
        let graph = fanin.graph(workspace, &pipeline)?;
        print!("{}", graph);
    }
    Ok(())
}

/// Handler to resolve command
/// Resolves `pipeline` over the workspace history and prints or writes the report
pub fn do_resolve(
    fanin: &FanIn,
    workspace: &Workspace,
    pipeline: &str,
    output: Option<&Path>,
) -> anyhow::Result<ResolutionReport> {
    let pipeline = PipelineName::from(pipeline);
    let result = fanin.resolve_pipeline(workspace, workspace.provider(), &pipeline)?;
    let resolution = match result {
        ResolutionResult::Success(resolution) => resolution,
        ResolutionResult::Failure { reason, detail } => {
            bail!("Cannot resolve {}: {} ({})", pipeline, reason, detail)
        }
    };

    let report = ResolutionReport::new(pipeline, &resolution, |material| {
        workspace.describe(material)
    });
    let rendered = report.to_string()?;
    match output {
        Some(output) => {
            std::fs::write(output, rendered)?;
            info!("Wrote report to {}", output.display());
        }
        None => print!("{}", rendered),
    }
    Ok(report)
}
