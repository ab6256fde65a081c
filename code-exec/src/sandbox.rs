use nix::sys::resource::{getrlimit, setrlimit, Resource};
use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};
use tempfile::TempDir;
use tokio::{
    fs,
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    sync::Notify,
    task::JoinHandle,
    time::{self, Duration},
};
use tracing::{debug, error, warn};

use crate::{
    config::IsolationMode, error::Error, languages::MemoryEnforcement,
    supervisor::{self, SupervisorHandle}, types::ResourceLimits, Result,
};

/// `PATH` handed to sandboxed processes
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

/// How long to wait for pipes to close once the supervisor has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long a terminated supervisor gets to sweep before it is killed
const SWEEP_GRACE: Duration = Duration::from_secs(2);

/// Read-only host directories visible inside bubblewrap
const BWRAP_RO_DIRS: [&str; 5] = ["/bin", "/sbin", "/lib", "/lib64", "/etc"];

/// Confinement applied on top of rlimits and the step supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Isolation {
    /// Commands run under `bwrap` with only the sandbox directory writable
    Bubblewrap(PathBuf),
    /// Child unshares user and network namespaces before exec
    Namespaces,
    None,
}

impl Isolation {
    pub fn name(&self) -> &'static str {
        match self {
            Isolation::Bubblewrap(_) => "bubblewrap",
            Isolation::Namespaces => "namespaces",
            Isolation::None => "none",
        }
    }

    /// Turn a configured mode into a backend that works on this host.
    ///
    /// Explicit modes fail if unavailable. `auto` takes the first backend that
    /// works and fails when neither does; it never falls back to `none`.
    pub async fn resolve(mode: IsolationMode, work_root: &Path) -> Result<Self> {
        match mode {
            IsolationMode::None => Ok(Isolation::None),
            IsolationMode::Bubblewrap => {
                let isolation = Self::bubblewrap()?;
                check_backend(&isolation, work_root).await?;
                Ok(isolation)
            }
            IsolationMode::Namespaces => {
                check_backend(&Isolation::Namespaces, work_root).await?;
                Ok(Isolation::Namespaces)
            }
            IsolationMode::Auto => {
                if let Ok(isolation) = Self::bubblewrap() {
                    match check_backend(&isolation, work_root).await {
                        Ok(()) => return Ok(isolation),
                        Err(e) => debug!("Bubblewrap unusable: {}", e),
                    }
                }
                match check_backend(&Isolation::Namespaces, work_root).await {
                    Ok(()) => Ok(Isolation::Namespaces),
                    Err(e) => {
                        warn!("Namespace isolation unusable: {}", e);
                        Err(Error::Sandbox(
                            "No isolation backend available; set isolation to none to run unconfined"
                                .to_string(),
                        ))
                    }
                }
            }
        }
    }

    fn bubblewrap() -> Result<Self> {
        which::which("bwrap")
            .map(Isolation::Bubblewrap)
            .map_err(|_| Error::CommandNotFound("bwrap".to_string()))
    }
}

/// Run `true` through the backend to see whether the kernel allows it
async fn check_backend(isolation: &Isolation, work_root: &Path) -> Result<()> {
    let program =
        which::which("true").map_err(|_| Error::CommandNotFound("true".to_string()))?;
    let sandbox = Sandbox::new(work_root, isolation.clone())?;
    let output = sandbox
        .run_step(&program, &[], &StepLimits::backend_check())
        .await?;

    match output.termination {
        Termination::Exited(status) if status.success() => Ok(()),
        _ => Err(Error::Sandbox(format!(
            "{} isolation unavailable: {}",
            isolation.name(),
            String::from_utf8_lossy(&output.stderr.bytes).trim()
        ))),
    }
}

/// Limits for a single child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLimits {
    pub timeout: Duration,
    pub cpu_seconds: u64,
    /// `RLIMIT_AS`, unset for runtimes that cap their own heap
    pub address_space: Option<u64>,
    /// `RLIMIT_DATA` for those runtimes, so off-heap memory is bounded too
    pub data_size: Option<u64>,
    pub file_size: u64,
    pub max_output: usize,
    /// Kill the process as soon as either stream passes `max_output`
    pub kill_on_output_limit: bool,
}

impl StepLimits {
    pub fn for_run(limits: &ResourceLimits, memory: MemoryEnforcement) -> Self {
        Self {
            timeout: limits.timeout,
            cpu_seconds: limits.cpu_time.max(1),
            address_space: address_space(memory, limits.memory),
            data_size: data_size(memory, limits.memory),
            file_size: limits.file_size,
            max_output: limits.max_output,
            kill_on_output_limit: true,
        }
    }

    /// Compilers get their own budget and may print long diagnostics
    pub fn for_build(limits: &ResourceLimits, memory: MemoryEnforcement) -> Self {
        Self {
            timeout: limits.build_timeout,
            cpu_seconds: limits.build_timeout.as_secs().max(1),
            address_space: address_space(memory, limits.build_memory),
            data_size: data_size(memory, limits.build_memory),
            file_size: limits.file_size,
            max_output: limits.max_output,
            kill_on_output_limit: false,
        }
    }

    fn backend_check() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            cpu_seconds: 5,
            address_space: None,
            data_size: None,
            file_size: 1024 * 1024,
            max_output: 4096,
            kill_on_output_limit: false,
        }
    }
}

fn address_space(memory: MemoryEnforcement, bytes: u64) -> Option<u64> {
    match memory {
        MemoryEnforcement::AddressSpace => Some(bytes),
        MemoryEnforcement::RuntimeFlag => None,
    }
}

/// Private writable memory only; the heap flag stays below it
fn data_size(memory: MemoryEnforcement, bytes: u64) -> Option<u64> {
    match memory {
        MemoryEnforcement::AddressSpace => None,
        MemoryEnforcement::RuntimeFlag => Some(bytes),
    }
}

/// Bytes read from one output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// The stream produced more than the cap; the rest was discarded
    pub truncated: bool,
}

/// Why the process stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut,
    OutputLimit,
}

#[derive(Debug)]
pub struct StepOutput {
    pub termination: Termination,
    pub stdout: Captured,
    pub stderr: Captured,
    pub elapsed: Duration,
}

/// Output shared between a reader task and `drain`
type SharedCapture = Arc<Mutex<Captured>>;

/// One isolated working directory, removed when the sandbox is dropped
pub struct Sandbox {
    dir: Option<TempDir>,
    /// Root directory for the sandbox
    root_dir: PathBuf,
    isolation: Isolation,
}

impl Sandbox {
    /// Create a fresh, private directory under `work_root`
    pub fn new(work_root: &Path, isolation: Isolation) -> Result<Self> {
        std::fs::create_dir_all(work_root)
            .map_err(|e| Error::Sandbox(format!("Failed to create work root: {}", e)))?;

        let dir = tempfile::Builder::new()
            .prefix("sandbox-")
            .tempdir_in(work_root)
            .map_err(|e| Error::Sandbox(format!("Failed to create sandbox directory: {}", e)))?;
        let root_dir = dir.path().to_path_buf();
        debug!("Created sandbox at {}", root_dir.display());

        Ok(Self {
            dir: Some(dir),
            root_dir,
            isolation,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Write the source verbatim; the path must lie inside the sandbox
    pub async fn write_source(&self, path: &Path, source: &str) -> Result<()> {
        if !path.starts_with(&self.root_dir) {
            return Err(Error::Sandbox(format!(
                "Refusing to write outside the sandbox: {}",
                path.display()
            )));
        }
        fs::write(path, source).await.map_err(Error::Io)
    }

    /// Run one command to completion, timeout or output overflow.
    ///
    /// The command runs under a supervisor that kills its descendants when it
    /// ends, wherever they moved. Timeouts, output overflow and dropping the
    /// returned future all terminate the supervisor.
    pub async fn run_step(
        &self,
        program: &Path,
        args: &[OsString],
        limits: &StepLimits,
    ) -> Result<StepOutput> {
        debug!("Sandbox execute - Command: {}", program.display());
        debug!("Sandbox execute - Args: {:?}", args);
        debug!("Sandbox execute - Isolation: {}", self.isolation.name());

        let mut command = self.command(program, args);
        command
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", &self.root_dir)
            .env("TMPDIR", &self.root_dir)
            .env("LANG", "C.UTF-8")
            .current_dir(&self.root_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let cpu_seconds = limits.cpu_seconds;
        let file_size = limits.file_size;
        let address_space = limits.address_space;
        let data_size = limits.data_size;
        let unshare_namespaces = self.isolation == Isolation::Namespaces;

        // Only async-signal-safe syscalls between fork and exec
        unsafe {
            command.pre_exec(move || {
                lower_rlimit(Resource::RLIMIT_CORE, 0, 0)?;
                lower_rlimit(Resource::RLIMIT_CPU, cpu_seconds, cpu_seconds + 1)?;
                lower_rlimit(Resource::RLIMIT_FSIZE, file_size, file_size)?;
                if let Some(bytes) = address_space {
                    lower_rlimit(Resource::RLIMIT_AS, bytes, bytes)?;
                }
                if let Some(bytes) = data_size {
                    lower_rlimit(Resource::RLIMIT_DATA, bytes, bytes)?;
                }
                if unshare_namespaces {
                    unshare_network()?;
                }
                supervisor::fork_supervisor()
            });
        }

        let started = Instant::now();
        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", program.display(), e)))?;
        let mut supervisor = SupervisorHandle::new(child.id());

        let overflow = Arc::new(Notify::new());
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Sandbox("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Sandbox("stderr was not captured".to_string()))?;
        let stdout_buf = SharedCapture::default();
        let stderr_buf = SharedCapture::default();
        let stdout_task = tokio::spawn(capture(
            stdout,
            limits.max_output,
            stdout_buf.clone(),
            overflow.clone(),
        ));
        let stderr_task = tokio::spawn(capture(
            stderr,
            limits.max_output,
            stderr_buf.clone(),
            overflow.clone(),
        ));

        let termination = tokio::select! {
            status = child.wait() => Termination::Exited(status?),
            _ = time::sleep(limits.timeout) => Termination::TimedOut,
            _ = overflow.notified(), if limits.kill_on_output_limit => Termination::OutputLimit,
        };
        let elapsed = started.elapsed();

        // After a normal exit the supervisor has already swept
        if !matches!(termination, Termination::Exited(_)) {
            supervisor.terminate();
            match time::timeout(SWEEP_GRACE, child.wait()).await {
                Ok(status) => {
                    status?;
                }
                Err(_) => {
                    warn!("Supervisor still running after SIGTERM; killing it");
                    supervisor.kill();
                    child.wait().await?;
                }
            }
        }
        supervisor.release();

        let stdout = drain(stdout_task, stdout_buf, DRAIN_GRACE).await;
        let stderr = drain(stderr_task, stderr_buf, DRAIN_GRACE).await;

        Ok(StepOutput {
            termination,
            stdout,
            stderr,
            elapsed,
        })
    }

    fn command(&self, program: &Path, args: &[OsString]) -> Command {
        match &self.isolation {
            Isolation::Bubblewrap(bwrap) => {
                let mut command = Command::new(bwrap);
                command
                    .args(["--unshare-all", "--die-with-parent", "--new-session"])
                    .args(["--ro-bind", "/usr", "/usr"]);
                for dir in BWRAP_RO_DIRS {
                    command.arg("--ro-bind-try").arg(dir).arg(dir);
                }
                command
                    .args(["--proc", "/proc", "--dev", "/dev", "--tmpfs", "/tmp"])
                    .arg("--bind")
                    .arg(&self.root_dir)
                    .arg(&self.root_dir)
                    .arg("--chdir")
                    .arg(&self.root_dir)
                    .arg("--")
                    .arg(program)
                    .args(args);
                command
            }
            Isolation::Namespaces | Isolation::None => {
                let mut command = Command::new(program);
                command.args(args);
                command
            }
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        // Clean up sandbox directory
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                error!(
                    "Failed to clean up sandbox directory {}: {}",
                    self.root_dir.display(),
                    e
                );
            }
        }
    }
}

/// Lower a limit, never above the hard limit we already have
fn lower_rlimit(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    let (_, current_hard) = getrlimit(resource)?;
    let hard = hard.min(current_hard);
    setrlimit(resource, soft.min(hard), hard)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn unshare_network() -> io::Result<()> {
    use nix::sched::{unshare, CloneFlags};

    unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNET)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn unshare_network() -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

fn lock(buffer: &Mutex<Captured>) -> MutexGuard<'_, Captured> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read a stream to EOF into `buffer`, keeping at most `limit` bytes
async fn capture<R>(
    mut reader: R,
    limit: usize,
    buffer: SharedCapture,
    overflow: Arc<Notify>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = lock(&buffer);
        if captured.truncated {
            continue;
        }
        let room = limit.saturating_sub(captured.bytes.len());
        if n > room {
            captured.bytes.extend_from_slice(&chunk[..room]);
            captured.truncated = true;
            overflow.notify_one();
        } else {
            captured.bytes.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Wait up to `grace` for the reader to hit EOF, then take whatever it got
async fn drain(
    mut task: JoinHandle<io::Result<()>>,
    buffer: SharedCapture,
    grace: Duration,
) -> Captured {
    match time::timeout(grace, &mut task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!("Failed to read process output: {}", e),
        Ok(Err(e)) => warn!("Output reader task failed: {}", e),
        Err(_) => {
            warn!("Process output still open after the run; keeping what was read");
            task.abort();
        }
    }
    std::mem::take(&mut *lock(&buffer))
}
