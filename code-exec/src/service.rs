use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    config::ExecutionConfig,
    detector::{HeuristicDetector, LanguageDetector},
    executor::SandboxedExecutor,
    languages::ToolchainRegistry,
    sandbox::Isolation,
    types::{ExecutionRequest, ExecutionResult, Language, ResourceLimits},
    Result,
};

/// Detect → look up recipe → run in a sandbox, with admission control.
///
/// Cheap to clone; clones share the registry, executor and permit pool.
/// Dropping a pending [`run`](Self::run) future kills the running process
/// tree and removes its sandbox.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    detector: Arc<dyn LanguageDetector>,
    registry: Arc<ToolchainRegistry>,
    executor: Arc<SandboxedExecutor>,
    semaphore: Arc<Semaphore>,
    resource_limits: ResourceLimits,
}

impl ExecutionCoordinator {
    pub async fn new(config: ExecutionConfig) -> Result<Self> {
        Self::with_detector(config, HeuristicDetector::new()).await
    }

    pub async fn with_detector<D>(config: ExecutionConfig, detector: D) -> Result<Self>
    where
        D: LanguageDetector + 'static,
    {
        config.validate()?;

        let work_root = config.work_root();
        tokio::fs::create_dir_all(&work_root).await?;
        let isolation = Isolation::resolve(config.isolation, &work_root).await?;
        info!(
            "Execution coordinator ready (isolation: {}, work root: {}, slots: {})",
            isolation.name(),
            work_root.display(),
            config.max_concurrent_executions
        );

        Ok(Self {
            detector: Arc::new(detector),
            registry: Arc::new(ToolchainRegistry::standard()),
            executor: Arc::new(SandboxedExecutor::new(work_root, isolation)),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_executions)),
            resource_limits: config.resource_limits(),
        })
    }

    pub async fn run(&self, request: ExecutionRequest) -> ExecutionResult {
        if request.source.contains('\0') {
            return ExecutionResult::internal_error(
                Language::Unknown,
                "Source contains binary data.",
            );
        }

        let language = self.detector.detect(&request.source);
        let Some(recipe) = self.registry.lookup(language) else {
            debug!("Rejecting source detected as {}", language);
            return ExecutionResult::unsupported(language);
        };

        // Acquire execution permit
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return ExecutionResult::internal_error(
                    language,
                    format!("Failed to acquire execution permit: {}", e),
                )
            }
        };

        let limits = self.resource_limits.with_timeout_cap(request.timeout);
        let span = info_span!("execution", id = %Uuid::new_v4(), language = %language);
        let result = self
            .executor
            .execute(recipe, &request.source, &limits)
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            info!(
                "Execution finished: {} in {}ms",
                result.status,
                result.duration.as_millis()
            )
        });
        result
    }

    pub fn detect(&self, source: &str) -> Language {
        self.detector.detect(source)
    }

    pub fn registry(&self) -> &ToolchainRegistry {
        &self.registry
    }

    pub fn isolation(&self) -> &Isolation {
        self.executor.isolation()
    }

    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.resource_limits
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}
