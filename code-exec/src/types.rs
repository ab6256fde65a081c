use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Placeholder shown when a program wrote nothing to stdout
pub const NO_OUTPUT: &str = "(No Output)";
/// Placeholder shown when a program wrote nothing to stderr
pub const NO_ERRORS: &str = "(No Errors)";
/// Fixed stderr for runs killed by the wall-clock timeout
pub const TIMED_OUT_MESSAGE: &str = "Execution timed out.";

/// Languages the detector can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Cpp,
    Java,
    Bash,
    Node,
    Unknown,
}

impl Language {
    /// Every language that has a toolchain, in detection priority order
    pub const SUPPORTED: [Language; 5] = [
        Language::Java,
        Language::Cpp,
        Language::Node,
        Language::Python,
        Language::Bash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Bash => "bash",
            Language::Node => "node",
            Language::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Language::Python),
            "cpp" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "bash" => Ok(Language::Bash),
            "node" => Ok(Language::Node),
            "unknown" => Ok(Language::Unknown),
            _ => Err(format!("Unsupported language: {}", s)),
        }
    }
}

/// Code execution request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source code to detect and run
    pub source: String,
    /// Optional per-request timeout, never longer than the configured one
    #[serde(default, with = "duration_serde::option")]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Passed,
    Failed,
    TimedOut,
    UnsupportedLanguage,
    ResourceExceeded,
    InternalError,
}

impl ExecutionStatus {
    /// Label shown to end users: only a clean pass is "PASSED"
    pub fn display_label(&self) -> &'static str {
        match self {
            ExecutionStatus::Passed => "PASSED",
            _ => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::TimedOut => "timed_out",
            ExecutionStatus::UnsupportedLanguage => "unsupported_language",
            ExecutionStatus::ResourceExceeded => "resource_exceeded",
            ExecutionStatus::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

/// Execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Program output (stdout), or a placeholder
    pub stdout: String,
    /// Program errors (stderr), or a placeholder
    pub stderr: String,
    /// Execution status
    pub status: ExecutionStatus,
    /// Language the source was detected as
    pub language: Language,
    /// Wall-clock time spent in the sandbox
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn unsupported(language: Language) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Unsupported language: {}", language),
            status: ExecutionStatus::UnsupportedLanguage,
            language,
            duration: Duration::ZERO,
        }
    }

    pub fn internal_error(language: Language, message: impl Into<String>) -> Self {
        Self {
            stdout: NO_OUTPUT.to_string(),
            stderr: message.into(),
            status: ExecutionStatus::InternalError,
            language,
            duration: Duration::ZERO,
        }
    }

    pub fn display_status(&self) -> &'static str {
        self.status.display_label()
    }

    pub fn passed(&self) -> bool {
        self.status == ExecutionStatus::Passed
    }
}

/// Resource limits applied to every sandboxed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Wall-clock limit for the run step
    pub timeout: Duration,
    /// Maximum CPU time for the run step (seconds)
    pub cpu_time: u64,
    /// Maximum memory for the run step (bytes)
    pub memory: u64,
    /// Maximum size of any file a process writes (bytes)
    pub file_size: u64,
    /// Maximum captured bytes per output stream
    pub max_output: usize,
    /// Wall-clock limit for each build step
    pub build_timeout: Duration,
    /// Maximum memory for each build step (bytes)
    pub build_memory: u64,
}

impl ResourceLimits {
    /// Shrink the run timeout (and the CPU cap with it) to a caller's request
    pub fn with_timeout_cap(&self, requested: Option<Duration>) -> Self {
        let mut limits = self.clone();
        if let Some(requested) = requested {
            if !requested.is_zero() && requested < limits.timeout {
                limits.timeout = requested;
                limits.cpu_time = limits.cpu_time.min(requested.as_secs().max(1));
            }
        }
        limits
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            cpu_time: 10,
            memory: 512 * 1024 * 1024,   // 512MB
            file_size: 16 * 1024 * 1024, // 16MB
            max_output: 64 * 1024,
            build_timeout: Duration::from_secs(30),
            build_memory: 2048 * 1024 * 1024, // 2GB
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
        }
    }
}
