mod language;
mod process;
mod workspace;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{JudgeConfig, SandboxBackendKind};

pub use language::{CompileStep, Language, LanguageSpec};
pub use process::ProcessSandbox;
pub use workspace::Workspace;

/// A runnable program produced by [`SandboxBackend::prepare`].
///
/// Read-only once built; every testcase run of a submission shares it. The
/// backing workspace is removed when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub language: Language,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    _workspace: Option<Arc<Workspace>>,
}

impl Artifact {
    pub fn new(
        language: Language,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        workspace: Option<Arc<Workspace>>,
    ) -> Self {
        let workdir = workspace
            .as_ref()
            .map(|ws| ws.path().to_path_buf())
            .unwrap_or_default();
        Self {
            language,
            program: program.into(),
            args,
            workdir,
            _workspace: workspace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    RuntimeError(String),
    TimeLimitExceeded,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub outcome: ExitOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("compile error: {0}")]
    Compile(String),
    #[error("compile time limit exceeded")]
    TimeLimitExceeded,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes the source into a fresh workspace and compiles it when the
    /// language needs it. Called once per submission.
    async fn prepare(
        &self,
        language: Language,
        source: &str,
        build_timeout: Duration,
    ) -> Result<Artifact, BuildError>;

    /// Runs a prepared artifact once with `stdin`, killing it after `timeout`.
    async fn run(
        &self,
        artifact: &Artifact,
        stdin: &str,
        timeout: Duration,
    ) -> anyhow::Result<RunOutput>;

    /// One-shot build and run. The build gets its own budget, normally
    /// [`JudgeConfig::build_timeout`] of the run budget.
    async fn execute(
        &self,
        language: Language,
        source: &str,
        stdin: &str,
        build_timeout: Duration,
        timeout: Duration,
    ) -> Result<RunOutput, BuildError> {
        let artifact = self.prepare(language, source, build_timeout).await?;
        Ok(self.run(&artifact, stdin, timeout).await?)
    }
}

pub struct SandboxFactory;

impl SandboxFactory {
    pub fn from_config(config: &JudgeConfig) -> anyhow::Result<Arc<dyn SandboxBackend>> {
        match config.sandbox_backend {
            SandboxBackendKind::Process => Ok(Arc::new(ProcessSandbox::new(
                config.work_root.clone(),
                config.max_output_bytes,
            )?)),
        }
    }
}
