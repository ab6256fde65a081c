use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{error::Error, types::ResourceLimits, Result};

/// How child processes are confined beyond rlimits and the step supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Pick the strongest backend that works on this host, or fail to start
    #[default]
    Auto,
    /// Wrap every command in `bwrap`
    Bubblewrap,
    /// Unshare user and network namespaces before exec
    Namespaces,
    /// Resource limits only
    None,
}

impl FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(IsolationMode::Auto),
            "bubblewrap" | "bwrap" => Ok(IsolationMode::Bubblewrap),
            "namespaces" => Ok(IsolationMode::Namespaces),
            "none" => Ok(IsolationMode::None),
            _ => Err(format!("Unknown isolation mode: {}", s)),
        }
    }
}

/// Execution settings, loadable from the environment or a TOML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Wall-clock limit for the run step
    pub timeout_seconds: u64,
    /// Memory cap for the run step
    pub memory_limit_mb: u64,
    /// Maximum captured bytes per output stream
    pub max_output_bytes: usize,
    /// Number of sandboxes allowed to run at once
    pub max_concurrent_executions: usize,
    /// Largest file a sandboxed process may write
    pub max_file_size_bytes: u64,
    /// Wall-clock limit for each compile step
    pub build_timeout_seconds: u64,
    /// Memory cap for each compile step
    pub build_memory_limit_mb: u64,
    pub isolation: IsolationMode,
    /// Directory that per-request sandboxes are created in
    pub work_root: Option<PathBuf>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            memory_limit_mb: 512,
            max_output_bytes: 64 * 1024,
            max_concurrent_executions: 4,
            max_file_size_bytes: 16 * 1024 * 1024,
            build_timeout_seconds: 30,
            build_memory_limit_mb: 2048,
            isolation: IsolationMode::Auto,
            work_root: None,
        }
    }
}

impl ExecutionConfig {
    pub const ENV_TIMEOUT_SECONDS: &'static str = "CODE_EXEC_TIMEOUT_SECONDS";
    pub const ENV_MEMORY_LIMIT_MB: &'static str = "CODE_EXEC_MEMORY_LIMIT_MB";
    pub const ENV_MAX_OUTPUT_BYTES: &'static str = "CODE_EXEC_MAX_OUTPUT_BYTES";
    pub const ENV_MAX_CONCURRENT: &'static str = "CODE_EXEC_MAX_CONCURRENT";
    pub const ENV_MAX_FILE_SIZE_BYTES: &'static str = "CODE_EXEC_MAX_FILE_SIZE_BYTES";
    pub const ENV_BUILD_TIMEOUT_SECONDS: &'static str = "CODE_EXEC_BUILD_TIMEOUT_SECONDS";
    pub const ENV_BUILD_MEMORY_LIMIT_MB: &'static str = "CODE_EXEC_BUILD_MEMORY_LIMIT_MB";
    pub const ENV_ISOLATION: &'static str = "CODE_EXEC_ISOLATION";
    pub const ENV_WORK_ROOT: &'static str = "CODE_EXEC_WORK_ROOT";

    /// Read settings from `CODE_EXEC_*` variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings from a TOML file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            Error::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, Self::ENV_TIMEOUT_SECONDS)? {
            config.timeout_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_MEMORY_LIMIT_MB)? {
            config.memory_limit_mb = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_MAX_OUTPUT_BYTES)? {
            config.max_output_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_MAX_CONCURRENT)? {
            config.max_concurrent_executions = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_MAX_FILE_SIZE_BYTES)? {
            config.max_file_size_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_BUILD_TIMEOUT_SECONDS)? {
            config.build_timeout_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_BUILD_MEMORY_LIMIT_MB)? {
            config.build_memory_limit_mb = v;
        }
        if let Some(v) = parse_var(&lookup, Self::ENV_ISOLATION)? {
            config.isolation = v;
        }
        if let Some(root) = lookup(Self::ENV_WORK_ROOT).filter(|v| !v.is_empty()) {
            config.work_root = Some(PathBuf::from(root));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("timeout_seconds", self.timeout_seconds),
            ("memory_limit_mb", self.memory_limit_mb),
            ("max_output_bytes", self.max_output_bytes as u64),
            (
                "max_concurrent_executions",
                self.max_concurrent_executions as u64,
            ),
            ("max_file_size_bytes", self.max_file_size_bytes),
            ("build_timeout_seconds", self.build_timeout_seconds),
            ("build_memory_limit_mb", self.build_memory_limit_mb),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Configuration(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn work_root(&self) -> PathBuf {
        self.work_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn resource_limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: Duration::from_secs(self.timeout_seconds),
            cpu_time: self.timeout_seconds,
            memory: self.memory_limit_mb * 1024 * 1024,
            file_size: self.max_file_size_bytes,
            max_output: self.max_output_bytes,
            build_timeout: Duration::from_secs(self.build_timeout_seconds),
            build_memory: self.build_memory_limit_mb * 1024 * 1024,
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("{}={:?}: {}", key, raw, e))),
        _ => Ok(None),
    }
}
