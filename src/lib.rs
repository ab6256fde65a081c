use code_exec::{
    ExecutionConfig, ExecutionCoordinator, ExecutionRequest, ExecutionResult, IsolationMode,
    ToolchainRegistry,
};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by every subcommand that runs code
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// TOML file with execution settings; otherwise `CODE_EXEC_*` is read
    pub config: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub isolation: Option<IsolationMode>,
}

impl RunOptions {
    pub fn execution_config(&self) -> Result<ExecutionConfig, Error> {
        let mut config = match &self.config {
            Some(path) => ExecutionConfig::from_file(path)?,
            None => ExecutionConfig::from_env()?,
        };
        if let Some(isolation) = self.isolation {
            config.isolation = isolation;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Read a source file, or stdin when no path is given. Invalid UTF-8 is
/// replaced rather than rejected.
pub fn read_source(path: Option<&Path>) -> Result<String, Error> {
    let bytes = match path {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn run_source(source: String, options: &RunOptions) -> Result<ExecutionResult, Error> {
    let coordinator = ExecutionCoordinator::new(options.execution_config()?).await?;

    let mut request = ExecutionRequest::new(source);
    if let Some(secs) = options.timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }
    Ok(coordinator.run(request).await)
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    stdout: &'a str,
    stderr: &'a str,
    status: &'static str,
    outcome: String,
    language: code_exec::Language,
    execution_time_ms: u64,
}

pub fn render_json(result: &ExecutionResult) -> Result<String, Error> {
    let report = JsonReport {
        stdout: &result.stdout,
        stderr: &result.stderr,
        status: result.display_status(),
        outcome: result.status.to_string(),
        language: result.language,
        execution_time_ms: result.duration.as_millis() as u64,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn render_text(result: &ExecutionResult) -> String {
    format!(
        "Language: {}\nStatus: {}\n\n--- stdout ---\n{}\n--- stderr ---\n{}\n",
        result.language,
        result.display_status(),
        result.stdout,
        result.stderr
    )
}

/// One line per language with the host tools it is missing, if any
pub fn render_languages(registry: &ToolchainRegistry) -> String {
    let mut out = String::new();
    for language in registry.languages() {
        let missing = registry.missing_tools(language);
        let state = if missing.is_empty() {
            "installed".to_string()
        } else {
            format!("missing {}", missing.join(", "))
        };
        out.push_str(&format!("{:<8} {}\n", language.as_str(), state));
    }
    out
}

pub fn exit_code(result: &ExecutionResult) -> i32 {
    if result.passed() {
        0
    } else {
        1
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Execution error: {0}")]
    Execution(#[from] code_exec::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_exec::{ExecutionStatus, Language};

    fn sample(status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            stdout: "hi".to_string(),
            stderr: code_exec::NO_ERRORS.to_string(),
            status,
            language: Language::Bash,
            duration: Duration::from_millis(42),
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&sample(ExecutionStatus::Passed));
        assert!(text.starts_with("Language: bash\nStatus: PASSED\n"));
        assert!(text.contains("--- stdout ---\nhi\n"));
        assert!(text.contains("--- stderr ---\n(No Errors)\n"));
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&sample(ExecutionStatus::ResourceExceeded)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["outcome"], "resource_exceeded");
        assert_eq!(value["language"], "bash");
        assert_eq!(value["execution_time_ms"], 42);
    }

    #[test]
    fn test_exit_code_follows_display_status() {
        assert_eq!(exit_code(&sample(ExecutionStatus::Passed)), 0);
        assert_eq!(exit_code(&sample(ExecutionStatus::TimedOut)), 1);
    }

    #[test]
    fn test_render_languages_lists_every_language() {
        let listing = render_languages(&ToolchainRegistry::standard());
        assert_eq!(listing.lines().count(), 5);
        assert!(listing.lines().any(|line| line.starts_with("bash ")));
    }

    #[test]
    fn test_read_source_is_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snippet.sh");
        std::fs::write(&path, b"echo \xff hi").unwrap();
        assert_eq!(read_source(Some(&path)).unwrap(), "echo \u{fffd} hi");
    }
}
