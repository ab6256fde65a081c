use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error};

use crate::{
    error::Error,
    languages::{CommandTemplate, Program, SourcePaths, ToolchainRecipe},
    sandbox::{Isolation, Sandbox, StepLimits, StepOutput, Termination},
    types::{
        ExecutionResult, ExecutionStatus, Language, ResourceLimits, NO_ERRORS, NO_OUTPUT,
        TIMED_OUT_MESSAGE,
    },
    Result,
};

/// Runs a recipe against one source text inside a throwaway sandbox.
///
/// Never fails: every fault is folded into the returned [`ExecutionResult`].
pub struct SandboxedExecutor {
    work_root: PathBuf,
    isolation: Isolation,
}

impl SandboxedExecutor {
    pub fn new(work_root: PathBuf, isolation: Isolation) -> Self {
        Self {
            work_root,
            isolation,
        }
    }

    pub fn isolation(&self) -> &Isolation {
        &self.isolation
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub async fn execute(
        &self,
        recipe: &ToolchainRecipe,
        source: &str,
        limits: &ResourceLimits,
    ) -> ExecutionResult {
        let started = Instant::now();
        let mut result = match self.try_execute(recipe, source, limits).await {
            Ok(result) => result,
            Err(e) => {
                error!("Sandbox fault while running {}: {}", recipe.language, e);
                ExecutionResult::internal_error(recipe.language, e.to_string())
            }
        };
        result.duration = started.elapsed();
        result
    }

    async fn try_execute(
        &self,
        recipe: &ToolchainRecipe,
        source: &str,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult> {
        // Dropping the sandbox removes the directory on every path out of here
        let sandbox = Sandbox::new(&self.work_root, self.isolation.clone())?;
        let paths = recipe.source_paths(sandbox.root(), source);
        sandbox.write_source(&paths.source, source).await?;

        for step in &recipe.build_steps {
            let step_limits = StepLimits::for_build(limits, step.memory);
            let output = run_template(&sandbox, step, &paths, limits.build_memory, &step_limits)
                .await?;
            let mut result = classify(recipe.language, &output, &step_limits);
            if result.status != ExecutionStatus::Passed {
                debug!("Build step failed with status {}", result.status);
                result.stdout = NO_OUTPUT.to_string();
                return Ok(result);
            }
        }

        let step_limits = StepLimits::for_run(limits, recipe.run_step.memory);
        let output = run_template(
            &sandbox,
            &recipe.run_step,
            &paths,
            limits.memory,
            &step_limits,
        )
        .await?;

        Ok(classify(recipe.language, &output, &step_limits))
    }
}

async fn run_template(
    sandbox: &Sandbox,
    template: &CommandTemplate,
    paths: &SourcePaths,
    memory_bytes: u64,
    limits: &StepLimits,
) -> Result<StepOutput> {
    let program = match template.program {
        Program::Tool(name) => {
            which::which(name).map_err(|_| Error::CommandNotFound(name.to_string()))?
        }
        Program::Artifact => {
            if !paths.artifact.exists() {
                return Err(Error::Sandbox("Build produced no executable".to_string()));
            }
            paths.artifact.clone()
        }
    };
    let args = template.render_args(paths, memory_bytes / (1024 * 1024));
    sandbox.run_step(&program, &args, limits).await
}

/// Map a finished step to a status and display strings
fn classify(language: Language, output: &StepOutput, limits: &StepLimits) -> ExecutionResult {
    let stdout = normalize(&output.stdout.bytes, NO_OUTPUT);
    let overflowed = output.stdout.truncated || output.stderr.truncated;

    let (status, stderr) = match output.termination {
        Termination::TimedOut => (ExecutionStatus::TimedOut, TIMED_OUT_MESSAGE.to_string()),
        Termination::OutputLimit => (
            ExecutionStatus::ResourceExceeded,
            output_limit_message(limits.max_output),
        ),
        Termination::Exited(_) if limits.kill_on_output_limit && overflowed => (
            ExecutionStatus::ResourceExceeded,
            output_limit_message(limits.max_output),
        ),
        Termination::Exited(status) => match status.signal() {
            Some(sig) if sig == Signal::SIGXCPU as i32 => (
                ExecutionStatus::ResourceExceeded,
                "CPU time limit exceeded.".to_string(),
            ),
            Some(sig) if sig == Signal::SIGXFSZ as i32 => (
                ExecutionStatus::ResourceExceeded,
                "File size limit exceeded.".to_string(),
            ),
            Some(sig) => {
                let stderr = normalize(&output.stderr.bytes, "");
                let stderr = if stderr.is_empty() {
                    format!("Process terminated by signal {}.", signal_name(sig))
                } else {
                    stderr
                };
                (ExecutionStatus::Failed, stderr)
            }
            None if status.success() => (
                ExecutionStatus::Passed,
                normalize(&output.stderr.bytes, NO_ERRORS),
            ),
            None => (
                ExecutionStatus::Failed,
                normalize(&output.stderr.bytes, NO_ERRORS),
            ),
        },
    };

    ExecutionResult {
        stdout,
        stderr,
        status,
        language,
        duration: output.elapsed,
    }
}

fn normalize(bytes: &[u8], placeholder: &str) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        placeholder.to_string()
    } else {
        trimmed.to_string()
    }
}

fn output_limit_message(max_output: usize) -> String {
    format!("Output limit of {} bytes exceeded.", max_output)
}

fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| sig.to_string())
}
