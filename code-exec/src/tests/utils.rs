pub mod defaults {
    use crate::{ExecutionConfig, ExecutionCoordinator, IsolationMode, Result};
    use tempfile::TempDir;
    use tokio::time::Duration;

    pub fn default_test_config(work_root: &TempDir) -> ExecutionConfig {
        ExecutionConfig {
            timeout_seconds: 5,
            max_concurrent_executions: 4,
            isolation: IsolationMode::None,
            work_root: Some(work_root.path().to_path_buf()),
            ..ExecutionConfig::default()
        }
    }

    /// Coordinator plus the work root it creates sandboxes in
    pub async fn setup_test_coordinator() -> Result<(ExecutionCoordinator, TempDir)> {
        let work_root = tempfile::tempdir()?;
        let coordinator = ExecutionCoordinator::new(default_test_config(&work_root)).await?;
        Ok((coordinator, work_root))
    }

    pub async fn setup_coordinator_with(
        configure: impl FnOnce(&mut ExecutionConfig),
    ) -> Result<(ExecutionCoordinator, TempDir)> {
        let work_root = tempfile::tempdir()?;
        let mut config = default_test_config(&work_root);
        configure(&mut config);
        let coordinator = ExecutionCoordinator::new(config).await?;
        Ok((coordinator, work_root))
    }

    pub fn short_timeout() -> Duration {
        Duration::from_secs(1)
    }
}

pub mod host {
    use std::path::Path;
    use tokio::time::{sleep, Duration, Instant};

    /// True if any process's command line contains `needle`
    pub fn process_running(needle: &[u8]) -> bool {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return false;
        };
        entries.flatten().any(|entry| {
            let is_pid = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.bytes().all(|b| b.is_ascii_digit()));
            is_pid
                && std::fs::read(entry.path().join("cmdline"))
                    .map(|cmdline| cmdline.windows(needle.len()).any(|w| w == needle))
                    .unwrap_or(false)
        })
    }

    /// Poll until no process matches `needle`, for at most `within`
    pub async fn wait_until_gone(needle: &[u8], within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if !process_running(needle) {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        !process_running(needle)
    }

    pub fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false)
    }
}
