use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::ParseError;

use super::{material::MaterialIdentity, pipeline::PipelineName, resolved::Resolution};

/// Human-readable record of a successful resolution, written by `fanin resolve --output`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionReport {
    pub pipeline: PipelineName,
    #[serde(default)]
    pub revisions: Vec<ReportedRevision>,
    #[serde(default)]
    pub upstream: Vec<ReportedInstance>,
}

const VERSION: i64 = 1;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct VersionedReport<'a> {
    pub version: i64,
    #[serde(flatten)]
    pub content: &'a ResolutionReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedRevision {
    pub material: String,
    pub fingerprint: MaterialIdentity,
    pub revision: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportedInstance {
    pub pipeline: PipelineName,
    pub counter: u64,
}

impl ResolutionReport {
    pub fn new(
        pipeline: PipelineName,
        resolution: &Resolution,
        describe: impl Fn(&MaterialIdentity) -> String,
    ) -> Self {
        let revisions = resolution
            .revisions
            .iter()
            .map(|(material, modification)| ReportedRevision {
                material: describe(material),
                fingerprint: material.clone(),
                revision: modification.revision.clone(),
                sequence: modification.sequence,
            })
            .collect();
        let upstream = resolution
            .upstream
            .iter()
            .map(|(pipeline, counter)| ReportedInstance {
                pipeline: pipeline.clone(),
                counter: *counter,
            })
            .collect();
        ResolutionReport {
            pipeline,
            revisions,
            upstream,
        }
    }

    pub fn from_file(file: &Path) -> Result<ResolutionReport, ParseError> {
        ResolutionReport::from_str(&std::fs::read_to_string(file)?)
    }

    pub fn from_str(s: &str) -> Result<ResolutionReport, ParseError> {
        let mut table = toml::from_str::<toml::Table>(s)?;
        match table.remove("version") {
            Some(toml::Value::Integer(VERSION)) => {
                table.try_into::<ResolutionReport>().map_err(Into::into)
            }
            Some(other) => Err(ParseError::UnsupportedReportVersion(other)),
            None => Err(ParseError::MissingReportVersion),
        }
    }

    pub fn to_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&VersionedReport {
            version: VERSION,
            content: self,
        })
    }
}
