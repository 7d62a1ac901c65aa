//! Runtime configuration: typed option structs with defaults, optionally
//! overridden by a TOML file (see [`ConfigBuilder`]).

mod error;
mod loading;
mod types;

pub use error::ConfigError;
pub use loading::ConfigBuilder;
pub use types::{
    Account, BounceOptions, Config, HeuristicOptions, OrchestratorOptions, PipelineOptions,
    StorageOptions,
};

#[cfg(test)]
mod tests;
