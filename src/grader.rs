use std::{sync::Arc, time::Duration, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Problem, ProblemCatalog, TestCase},
    config::JudgeConfig,
    error::{EngineError, EngineResult},
    metrics::MetricsRegistry,
    sandbox::{Artifact, BuildError, ExitOutcome, Language, SandboxBackend},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestcaseResult {
    pub index: usize,
    pub passed: bool,
    pub hidden: bool,
    pub runtime_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeVerdict {
    pub problem_id: String,
    pub language: Language,
    pub passed: bool,
    pub passed_count: usize,
    pub total_count: usize,
    pub results: Vec<TestcaseResult>,
}

/// Canonical form of program output used for comparison: line endings become
/// `\n` and trailing whitespace is dropped. Nothing else is touched.
///
/// Carriage returns directly in front of a newline are removed as a run, so
/// `"\r\r\n"` collapses in one pass and the function is idempotent. This
/// differs from a plain `"\r\n"` to `"\n"` replacement: `"a\r\r\n"`
/// normalizes to `"a"`, not `"a\r"`.
pub fn normalize_output(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_cr = 0usize;
    for ch in raw.chars() {
        match ch {
            '\r' => pending_cr += 1,
            '\n' => {
                pending_cr = 0;
                out.push('\n');
            }
            other => {
                out.extend(std::iter::repeat_n('\r', pending_cr));
                pending_cr = 0;
                out.push(other);
            }
        }
    }
    out.truncate(out.trim_end().len());
    out
}

/// Grades one submission: build once, run every testcase in order, compare
/// normalized output.
pub struct Grader {
    catalog: Arc<dyn ProblemCatalog>,
    sandbox: Arc<dyn SandboxBackend>,
    metrics: Arc<MetricsRegistry>,
    config: JudgeConfig,
}

impl Grader {
    pub fn new(
        catalog: Arc<dyn ProblemCatalog>,
        sandbox: Arc<dyn SandboxBackend>,
        metrics: Arc<MetricsRegistry>,
        config: JudgeConfig,
    ) -> Self {
        Self {
            catalog,
            sandbox,
            metrics,
            config,
        }
    }

    /// Per-testcase timeout used for contest and duel submissions.
    pub fn submission_timeout(&self) -> Duration {
        self.config.submission_timeout
    }

    pub async fn judge(
        &self,
        problem_id: &str,
        language: Language,
        code: &str,
        timeout: Option<Duration>,
    ) -> EngineResult<GradeVerdict> {
        self.ensure_enabled()?;
        let problem_id = problem_id.trim();
        if problem_id.is_empty() {
            return Err(EngineError::validation("problemId is required"));
        }
        let problem = self.catalog.get(problem_id).await?;
        self.grade(&problem, language, code, timeout).await
    }

    pub async fn grade(
        &self,
        problem: &Problem,
        language: Language,
        code: &str,
        timeout: Option<Duration>,
    ) -> EngineResult<GradeVerdict> {
        self.ensure_enabled()?;
        if code.trim().is_empty() {
            return Err(EngineError::validation("code is required"));
        }
        if problem.test_cases.is_empty() {
            return Err(EngineError::validation("problem has no testCases"));
        }

        let timeout = timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.default_timeout);
        let artifact = match self
            .sandbox
            .prepare(language, code, self.config.build_timeout(timeout))
            .await
        {
            Ok(artifact) => artifact,
            Err(BuildError::Compile(message)) => {
                self.metrics.compile_failed();
                return Err(EngineError::CompileError(message));
            }
            Err(BuildError::TimeLimitExceeded) => {
                self.metrics.compile_failed();
                return Err(EngineError::CompileTimeLimitExceeded);
            }
            Err(BuildError::Internal(err)) => return Err(err.into()),
        };

        let mut results = Vec::with_capacity(problem.test_cases.len());
        for (index, case) in problem.test_cases.iter().enumerate() {
            results.push(self.run_case(&artifact, index, case, timeout).await);
        }

        let passed_count = results.iter().filter(|r| r.passed).count();
        let verdict = GradeVerdict {
            problem_id: problem.id.clone(),
            language,
            passed: passed_count == results.len(),
            passed_count,
            total_count: results.len(),
            results,
        };

        self.metrics.graded(verdict.passed);
        tracing::info!(
            problem_id = %verdict.problem_id,
            language = %language,
            backend = self.sandbox.name(),
            passed_count = verdict.passed_count,
            total_count = verdict.total_count,
            "submission graded"
        );
        Ok(verdict)
    }

    async fn run_case(
        &self,
        artifact: &Artifact,
        index: usize,
        case: &TestCase,
        timeout: Duration,
    ) -> TestcaseResult {
        let started = Instant::now();
        let (stdout, error, runtime_ms) = match self.sandbox.run(artifact, &case.input, timeout).await
        {
            Ok(run) => {
                let error = match run.outcome {
                    ExitOutcome::Success => None,
                    ExitOutcome::RuntimeError(message) => Some(format!("runtime error: {message}")),
                    ExitOutcome::TimeLimitExceeded => {
                        self.metrics.testcase_timed_out();
                        Some("time limit exceeded".to_string())
                    }
                };
                (run.stdout, error, run.duration_ms)
            }
            Err(err) => {
                tracing::warn!(index, error = %format!("{err:#}"), "sandbox run failed");
                (
                    String::new(),
                    Some(format!("runtime error: {err:#}")),
                    started.elapsed().as_millis() as u64,
                )
            }
        };

        let actual = normalize_output(&stdout);
        let passed = error.is_none() && actual == normalize_output(&case.expected_output);
        TestcaseResult {
            index,
            passed,
            hidden: case.is_hidden,
            runtime_ms,
            output: (!case.is_hidden).then_some(actual),
            error,
        }
    }

    fn ensure_enabled(&self) -> EngineResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(EngineError::Disabled)
        }
    }
}
