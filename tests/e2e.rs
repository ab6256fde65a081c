use code_exec::{ExecutionStatus, IsolationMode, Language};
use code_runner::{exit_code, render_json, run_source, RunOptions};
use std::path::Path;
use tempfile::TempDir;

fn options(dir: &TempDir, timeout_seconds: u64) -> RunOptions {
    let work_root = dir.path().join("work");
    let config_path = dir.path().join("runner.toml");
    std::fs::write(
        &config_path,
        format!(
            "timeout_seconds = {}\nisolation = \"none\"\nwork_root = \"{}\"\n",
            timeout_seconds,
            work_root.display()
        ),
    )
    .unwrap();

    RunOptions {
        config: Some(config_path),
        timeout: None,
        isolation: Some(IsolationMode::None),
    }
}

fn sandboxes_left(dir: &TempDir) -> usize {
    let work_root = dir.path().join("work");
    if !Path::new(&work_root).exists() {
        return 0;
    }
    std::fs::read_dir(work_root).unwrap().count()
}

#[tokio::test]
async fn test_run_file_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let options = options(&dir, 5);

    let result = run_source("echo hi".to_string(), &options).await?;
    assert_eq!(result.language, Language::Bash);
    assert_eq!(result.stdout, "hi");
    assert_eq!(exit_code(&result), 0);
    assert_eq!(sandboxes_left(&dir), 0);
    Ok(())
}

#[tokio::test]
async fn test_timeout_end_to_end() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let options = options(&dir, 1);

    let result = run_source("echo start\nsleep 30".to_string(), &options).await?;
    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert_eq!(exit_code(&result), 1);

    let json: serde_json::Value = serde_json::from_str(&render_json(&result)?)?;
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["stderr"], "Execution timed out.");
    assert_eq!(sandboxes_left(&dir), 0);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("broken.toml");
    std::fs::write(&config_path, "timeout_seconds = 0\n")?;

    let options = RunOptions {
        config: Some(config_path),
        ..RunOptions::default()
    };
    assert!(run_source("echo hi".to_string(), &options).await.is_err());
    Ok(())
}
