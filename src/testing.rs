//! Test doubles shared by the unit tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    catalog::{Difficulty, InMemoryCatalog, Problem, ProblemStatus, TestCase},
    config::JudgeConfig,
    grader::Grader,
    metrics::MetricsRegistry,
    sandbox::{
        Artifact, BuildError, ExitOutcome, Language, LanguageSpec, RunOutput, SandboxBackend,
    },
};

type Script = Arc<dyn Fn(&str) -> (String, ExitOutcome) + Send + Sync>;

/// Sandbox that looks submitted source up in a table of canned programs.
/// Compile failures only fire for compiled languages.
#[derive(Default)]
pub struct ScriptedSandbox {
    scripts: DashMap<String, Script>,
    compile_errors: DashMap<String, String>,
    compile_timeouts: DashMap<String, ()>,
    build_budgets: Mutex<Vec<Duration>>,
    delay: Option<Duration>,
    prepares: AtomicUsize,
    runs: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(self, code: &str, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.scripts.insert(
            code.to_string(),
            Arc::new(move |stdin| (f(stdin), ExitOutcome::Success)),
        );
        self
    }

    pub fn outcome(
        self,
        code: &str,
        f: impl Fn(&str) -> (String, ExitOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.scripts.insert(code.to_string(), Arc::new(f));
        self
    }

    pub fn compile_error(self, code: &str, message: &str) -> Self {
        self.compile_errors
            .insert(code.to_string(), message.to_string());
        self
    }

    pub fn compile_timeout(self, code: &str) -> Self {
        self.compile_timeouts.insert(code.to_string(), ());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Build budgets passed to `prepare`, in call order.
    pub fn build_budgets(&self) -> Vec<Duration> {
        self.build_budgets.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxBackend for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn prepare(
        &self,
        language: Language,
        source: &str,
        build_timeout: Duration,
    ) -> Result<Artifact, BuildError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        self.build_budgets.lock().unwrap().push(build_timeout);
        if LanguageSpec::for_language(language).compile.is_some() {
            if self.compile_timeouts.contains_key(source) {
                return Err(BuildError::TimeLimitExceeded);
            }
            if let Some(message) = self.compile_errors.get(source) {
                return Err(BuildError::Compile(message.clone()));
            }
        }
        Ok(Artifact::new(language, "scripted", vec![source.to_string()], None))
    }

    async fn run(
        &self,
        artifact: &Artifact,
        stdin: &str,
        _timeout: Duration,
    ) -> anyhow::Result<RunOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let script = artifact
            .args
            .first()
            .and_then(|source| self.scripts.get(source.as_str()))
            .map(|entry| entry.value().clone());
        let (stdout, outcome) = match script {
            Some(script) => script(stdin),
            None => (
                String::new(),
                ExitOutcome::RuntimeError("exit status: 1".to_string()),
            ),
        };
        Ok(RunOutput {
            stdout,
            outcome,
            duration_ms: 0,
        })
    }
}

pub fn problem(id: &str, difficulty: Difficulty, test_cases: Vec<TestCase>) -> Problem {
    Problem {
        id: id.to_string(),
        title: format!("Problem {id}"),
        statement: format!("Statement of {id}"),
        input_format: String::new(),
        output_format: String::new(),
        difficulty,
        tags: Vec::new(),
        status: ProblemStatus::Published,
        starter_code: Default::default(),
        test_cases,
    }
}

/// Reads an integer and prints it doubled.
pub const DOUBLER: &str = "print(int(input()) * 2)";

pub fn doubler(stdin: &str) -> String {
    let n: i64 = stdin.trim().parse().unwrap_or_default();
    format!("{}\n", n * 2)
}

pub fn doubling_problem(id: &str, difficulty: Difficulty) -> Problem {
    problem(
        id,
        difficulty,
        vec![
            TestCase::new("3\n", "6\n", false),
            TestCase::new("21\n", "42\n", true),
        ],
    )
}

pub fn grader_with(
    catalog: InMemoryCatalog,
    sandbox: Arc<dyn SandboxBackend>,
) -> (Arc<Grader>, Arc<MetricsRegistry>) {
    let metrics = Arc::new(MetricsRegistry::new());
    let grader = Grader::new(
        Arc::new(catalog),
        sandbox,
        metrics.clone(),
        JudgeConfig::default(),
    );
    (Arc::new(grader), metrics)
}
