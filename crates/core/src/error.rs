use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Corrupt record file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Invalid argument: '{0}' does not correspond to any cached function")]
    UnknownBlock(String),

    #[error("Cached function '{0}' is already registered")]
    DuplicateBlock(String),

    #[error("Block '{block}' depends on unknown function '{dependency}'")]
    InvalidDependency { block: String, dependency: String },

    #[error("Zipped parameters must have equal lengths, got {0:?}")]
    ParameterLength(Vec<(String, usize)>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}
