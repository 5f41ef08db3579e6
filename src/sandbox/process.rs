use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};

use crate::sandbox::{
    Artifact, BuildError, CompileStep, ExitOutcome, Language, LanguageSpec, RunOutput,
    SandboxBackend, Workspace,
};

/// Runs submissions as plain child processes inside a throwaway directory.
/// Provides wall-clock limits and cleanup only, not isolation.
pub struct ProcessSandbox {
    work_root: PathBuf,
    max_output_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(work_root: PathBuf, max_output_bytes: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&work_root)
            .with_context(|| format!("failed to create work root {}", work_root.display()))?;
        Ok(Self {
            work_root,
            max_output_bytes: max_output_bytes.max(1024),
        })
    }

    async fn compile(
        &self,
        workspace: &Workspace,
        lang: &LanguageSpec,
        step: &CompileStep,
        build_timeout: Duration,
    ) -> Result<PathBuf, BuildError> {
        let mut cmd = Command::new(step.program);
        cmd.args(step.render_args(lang.source_name))
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the compiler.
        let output = match tokio::time::timeout(build_timeout, cmd.output()).await {
            Ok(result) => result.with_context(|| format!("failed to spawn {}", step.program))?,
            Err(_) => return Err(BuildError::TimeLimitExceeded),
        };

        if !output.status.success() {
            let mut diagnostic = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if diagnostic.is_empty() {
                diagnostic = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            if diagnostic.is_empty() {
                diagnostic = output.status.to_string();
            }
            return Err(BuildError::Compile(diagnostic));
        }

        Ok(workspace.path().join(step.binary_name))
    }
}

#[async_trait]
impl SandboxBackend for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn prepare(
        &self,
        language: Language,
        source: &str,
        build_timeout: Duration,
    ) -> Result<Artifact, BuildError> {
        let lang = LanguageSpec::for_language(language);
        let workspace = Arc::new(Workspace::create_in(&self.work_root)?);
        workspace.write_source(lang.source_name, source).await?;

        if let Some(step) = &lang.compile {
            let started = Instant::now();
            let binary = self.compile(&workspace, &lang, step, build_timeout).await?;
            tracing::debug!(
                run_id = %workspace.run_id(),
                language = %language,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "artifact built"
            );
            return Ok(Artifact::new(language, binary, Vec::new(), Some(workspace)));
        }

        let interpreter = lang
            .interpreter
            .context("interpreter missing for interpreted language")?;
        Ok(Artifact::new(
            language,
            interpreter,
            vec![lang.source_name.to_string()],
            Some(workspace),
        ))
    }

    async fn run(
        &self,
        artifact: &Artifact,
        stdin: &str,
        timeout: Duration,
    ) -> anyhow::Result<RunOutput> {
        let started = Instant::now();
        let mut cmd = Command::new(&artifact.program);
        cmd.args(&artifact.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !artifact.workdir.as_os_str().is_empty() {
            cmd.current_dir(&artifact.workdir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}", display_program(&artifact.program)))?;

        if let Some(mut pipe) = child.stdin.take() {
            let input = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                let _ = pipe.write_all(&input).await;
            });
        }

        let stdout = child.stdout.take().context("missing stdout pipe")?;
        let stderr = child.stderr.take().context("missing stderr pipe")?;
        let limit = self.max_output_bytes;
        let stdout_task = tokio::spawn(async move { read_limited(stdout, limit).await });
        let stderr_task = tokio::spawn(async move { read_limited(stderr, limit).await });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => Some(result.context("failed waiting for child process")?),
            Err(_) => {
                let _ = child.kill().await;
                None
            }
        };

        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).to_string();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).to_string();

        let outcome = match status {
            None => ExitOutcome::TimeLimitExceeded,
            Some(status) if status.success() => ExitOutcome::Success,
            Some(status) => {
                let message = stderr.trim();
                if message.is_empty() {
                    ExitOutcome::RuntimeError(status.to_string())
                } else {
                    ExitOutcome::RuntimeError(message.to_string())
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            language = %artifact.language,
            duration_ms,
            outcome = ?outcome,
            "testcase run finished"
        );
        Ok(RunOutput {
            stdout,
            outcome,
            duration_ms,
        })
    }
}

fn display_program(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| program.display().to_string())
}

async fn read_limited<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut out = Vec::with_capacity(limit.min(8192));
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if out.len() < limit {
                    let remaining = limit - out.len();
                    out.extend_from_slice(&chunk[..remaining.min(n)]);
                }
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ProcessSandbox;
    use crate::sandbox::{BuildError, ExitOutcome, Language, SandboxBackend};

    fn has_tool(program: &str) -> bool {
        std::process::Command::new(program)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn sandbox(root: &std::path::Path) -> ProcessSandbox {
        ProcessSandbox::new(root.to_path_buf(), 64 * 1024).unwrap()
    }

    #[tokio::test]
    async fn runs_interpreted_program_with_stdin() {
        if !has_tool("python3") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let out = sandbox
            .execute(
                Language::Python,
                "n = int(input())\nprint(n * 2)\n",
                "3\n",
                Duration::from_secs(10),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.outcome, ExitOutcome::Success);
        assert_eq!(out.stdout, "6\n");
    }

    #[tokio::test]
    async fn kills_program_past_deadline() {
        if !has_tool("python3") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let out = sandbox
            .execute(
                Language::Python,
                "while True:\n    pass\n",
                "",
                Duration::from_secs(10),
                Duration::from_millis(300),
            )
            .await
            .unwrap();
        assert_eq!(out.outcome, ExitOutcome::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn reports_stderr_for_nonzero_exit() {
        if !has_tool("python3") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let out = sandbox
            .execute(
                Language::Python,
                "import sys\nsys.stderr.write('boom')\nsys.exit(3)\n",
                "",
                Duration::from_secs(10),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.outcome, ExitOutcome::RuntimeError("boom".to_string()));
    }

    #[tokio::test]
    async fn compile_failure_cleans_workspace() {
        if !has_tool("gcc") {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let err = sandbox
            .prepare(Language::C, "int main( {", Duration::from_secs(20))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Compile(ref msg) if !msg.is_empty()));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn artifact_drop_removes_workspace() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());
        let artifact = sandbox
            .prepare(Language::Python, "print(1)", Duration::from_secs(1))
            .await
            .unwrap();
        let dir = artifact.workdir.clone();
        assert!(dir.starts_with(root.path()));
        assert!(dir.join("main.py").exists());
        drop(artifact);
        assert!(!dir.exists());
    }
}
