use thiserror::Error;

pub mod history;
pub mod material;
pub mod pipeline;
pub mod report;
pub mod resolved;
pub mod workspace;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading workspace toml: {0}")]
    IO(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Invalid material `{name}`: {source}")]
    InvalidMaterial {
        name: String,
        #[source]
        source: material::MaterialError,
    },
    #[error("Pipeline `{pipeline}` declares a dependency that is neither a material nor a pipeline")]
    EmptyDependency { pipeline: String },
    #[error("Pipeline `{pipeline}` declares a dependency on both material `{material}` and pipeline `{upstream}`")]
    AmbiguousDependency {
        pipeline: String,
        material: String,
        upstream: String,
    },
    #[error("Unknown material `{name}` referenced by {referenced_by}")]
    UnknownMaterial { name: String, referenced_by: String },
    #[error("Revision `{revision}` of material `{material}` is not part of its recorded history")]
    UnknownRevision { material: String, revision: String },
    #[error("History recorded for `{0}`, which is not a declared material or pipeline")]
    UnknownHistory(String),
    #[error("Unsupported report version: {0}")]
    UnsupportedReportVersion(toml::Value),
    #[error("Missing report version")]
    MissingReportVersion,
}
