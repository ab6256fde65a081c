//! # Code Execution Service
//!
//! Detects the language of an untrusted source snippet and runs it in a
//! throwaway sandbox with wall-clock, CPU, memory, file-size and output caps.
//! Every outcome, including internal faults, comes back as an
//! [`ExecutionResult`].

mod config;
mod detector;
mod error;
mod executor;
mod languages;
mod sandbox;
mod service;
mod supervisor;
mod types;

#[cfg(test)]
mod tests;

pub use config::{ExecutionConfig, IsolationMode};
pub use detector::{HeuristicDetector, LanguageDetector};
pub use error::Error;
pub use executor::SandboxedExecutor;
pub use languages::{
    java_class_name, Arg, CommandTemplate, MemoryEnforcement, Program, SourceNaming,
    SourcePaths, ToolchainRecipe, ToolchainRegistry,
};
pub use sandbox::Isolation;
pub use service::ExecutionCoordinator;
pub use types::{
    ExecutionRequest, ExecutionResult, ExecutionStatus, Language, ResourceLimits, NO_ERRORS,
    NO_OUTPUT, TIMED_OUT_MESSAGE,
};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;
