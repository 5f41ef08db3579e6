mod engine;
mod reaper;
mod selection;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Difficulty, Problem, TestCase},
    sandbox::Language,
    store::Keyed,
};

pub use engine::{ContestEngine, SubmitOutcome};
pub use reaper::{ContestReaper, DeadlineQueue};
pub use selection::select_problems;

pub const MAX_SAMPLES: usize = 3;
pub const PLACEHOLDER_PROBLEM_ID: &str = "placeholder-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContestStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    #[serde(default)]
    pub room_code: String,
    pub language: Language,
    #[serde(default)]
    pub duration_minutes: i64,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default = "default_task_count")]
    pub task_count: i64,
    #[serde(default)]
    pub task_difficulties: Vec<Difficulty>,
}

fn default_task_count() -> i64 {
    1
}

/// Player-facing copy of a catalog problem. Only visible samples are kept;
/// grading always goes back to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestProblem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    pub statement: String,
    #[serde(default)]
    pub input_format: String,
    #[serde(default)]
    pub output_format: String,
    #[serde(default)]
    pub samples: Vec<TestCase>,
}

impl ContestProblem {
    pub fn from_problem(problem: &Problem) -> Self {
        Self {
            id: problem.id.clone(),
            title: problem.title.clone(),
            difficulty: Some(problem.difficulty),
            statement: problem.statement.clone(),
            input_format: problem.input_format.clone(),
            output_format: problem.output_format.clone(),
            samples: problem.samples(MAX_SAMPLES),
        }
    }

    pub fn placeholder(difficulty: Option<Difficulty>) -> Self {
        Self {
            id: PLACEHOLDER_PROBLEM_ID.to_string(),
            title: "Warmup".to_string(),
            difficulty,
            statement: "Solve the problem.".to_string(),
            input_format: String::new(),
            output_format: String::new(),
            samples: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub user_id: String,
    pub display_name: String,
    pub problem_id: String,
    pub code: String,
    pub submitted_at: DateTime<Utc>,
    pub correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub solved: BTreeSet<String>,
    #[serde(default)]
    pub last_submission: BTreeMap<String, Submission>,
    /// When the user last increased their solved count; breaks ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_solved_at: Option<DateTime<Utc>>,
}

impl UserProgress {
    pub fn new(user_id: &str, display_name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            solved: BTreeSet::new(),
            last_submission: BTreeMap::new(),
            last_solved_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestSession {
    pub id: String,
    pub room_code: String,
    pub status: ContestStatus,
    pub language: Language,
    /// Zero means the session never expires.
    pub duration_minutes: i64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_user_id: Option<String>,
    pub problems: Vec<ContestProblem>,
    #[serde(default)]
    pub progress: BTreeMap<String, UserProgress>,
}

impl Keyed for ContestSession {
    fn key(&self) -> &str {
        &self.id
    }
}

impl ContestSession {
    pub fn is_running(&self) -> bool {
        self.status == ContestStatus::Running
    }

    pub fn has_problem(&self, problem_id: &str) -> bool {
        self.problems.iter().any(|p| p.id == problem_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_running() && self.ends_at.is_some_and(|ends_at| now >= ends_at)
    }

    pub fn solved_count(&self, user_id: &str) -> usize {
        self.progress.get(user_id).map_or(0, |progress| {
            self.problems
                .iter()
                .filter(|p| progress.solved.contains(&p.id))
                .count()
        })
    }

    pub fn user_solved_all(&self, user_id: &str) -> bool {
        !self.problems.is_empty() && self.solved_count(user_id) == self.problems.len()
    }

    /// User with the most solved problems; ties go to whoever reached that
    /// count first, then to the smaller user id. `None` when nobody solved
    /// anything.
    pub fn leader(&self) -> Option<String> {
        self.progress
            .values()
            .map(|p| (self.solved_count(&p.user_id), p))
            .filter(|(count, _)| *count > 0)
            .min_by(|(count_a, a), (count_b, b)| {
                count_b
                    .cmp(count_a)
                    .then_with(|| a.last_solved_at.cmp(&b.last_solved_at))
                    .then_with(|| a.user_id.cmp(&b.user_id))
            })
            .map(|(_, p)| p.user_id.clone())
    }

    pub fn finish(&mut self, now: DateTime<Utc>, winner: Option<String>) {
        self.status = ContestStatus::Finished;
        self.finished_at = Some(now);
        self.winner_user_id = winner;
    }
}
