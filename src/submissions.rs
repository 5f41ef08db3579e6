use std::{collections::BTreeMap, path::PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::Mutex};

use crate::{
    error::{EngineError, EngineResult},
    grader::GradeVerdict,
    sandbox::Language,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSubmission {
    pub user_id: String,
    pub problem_id: String,
    pub language: Language,
    pub code: String,
    pub attempt_number: u32,
    pub passed: bool,
    pub passed_count: usize,
    pub total_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSolved {
    pub user_id: String,
    pub problem_id: String,
    pub attempts_to_solve: u32,
    pub solved_at: DateTime<Utc>,
}

/// Append-only log of practice attempts with per-(user, problem) attempt
/// counters and first-solve markers.
pub struct SubmissionLog {
    counters: DashMap<(String, String), u32>,
    submissions: DashMap<String, Vec<PracticeSubmission>>,
    solved: DashMap<String, BTreeMap<String, PracticeSolved>>,
    persistence_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl SubmissionLog {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            counters: DashMap::new(),
            submissions: DashMap::new(),
            solved: DashMap::new(),
            persistence_path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn next_attempt_number(&self, user_id: &str, problem_id: &str) -> u32 {
        let mut counter = self
            .counters
            .entry((user_id.to_string(), problem_id.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    pub async fn record(
        &self,
        user_id: &str,
        language: Language,
        code: &str,
        verdict: &GradeVerdict,
    ) -> EngineResult<PracticeSubmission> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(EngineError::validation("userId is required"));
        }
        let problem_id = verdict.problem_id.trim();
        if problem_id.is_empty() {
            return Err(EngineError::validation("problemId is required"));
        }

        let attempt_number = self.next_attempt_number(user_id, problem_id);
        let submission = PracticeSubmission {
            user_id: user_id.to_string(),
            problem_id: problem_id.to_string(),
            language,
            code: code.to_string(),
            attempt_number,
            passed: verdict.passed,
            passed_count: verdict.passed_count,
            total_count: verdict.total_count,
            created_at: Utc::now(),
        };

        self.submissions
            .entry(submission.user_id.clone())
            .or_default()
            .push(submission.clone());
        if submission.passed {
            self.mark_solved_if_first(user_id, problem_id, attempt_number);
        }
        self.persist(&submission).await;

        tracing::debug!(
            user_id,
            problem_id,
            attempt_number,
            passed = submission.passed,
            "practice submission recorded"
        );
        Ok(submission)
    }

    pub fn list_submissions(&self, user_id: &str) -> Vec<PracticeSubmission> {
        self.submissions
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn list_solved(&self, user_id: &str) -> BTreeMap<String, PracticeSolved> {
        self.solved
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn mark_solved_if_first(&self, user_id: &str, problem_id: &str, attempts_to_solve: u32) {
        let mut solved = self.solved.entry(user_id.to_string()).or_default();
        solved
            .entry(problem_id.to_string())
            .or_insert_with(|| PracticeSolved {
                user_id: user_id.to_string(),
                problem_id: problem_id.to_string(),
                attempts_to_solve,
                solved_at: Utc::now(),
            });
    }

    async fn persist(&self, submission: &PracticeSubmission) {
        let Some(path) = &self.persistence_path else {
            return;
        };
        let line = match serde_json::to_string(submission) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode submission");
                return;
            }
        };

        let _guard = self.write_lock.lock().await;
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).append(true);
        let result = match options.open(path).await {
            Ok(mut file) => file.write_all(format!("{line}\n").as_bytes()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(path = %path.display(), error = %err, "failed to append submission log");
        }
    }
}
