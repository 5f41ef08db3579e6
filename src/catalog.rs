use std::{
    collections::BTreeMap,
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProblemStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    #[serde(alias = "output")]
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
}

#[cfg(test)]
impl TestCase {
    pub fn new(input: &str, expected_output: &str, is_hidden: bool) -> Self {
        Self {
            input: input.to_string(),
            expected_output: expected_output.to_string(),
            is_hidden,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub input_format: String,
    #[serde(default)]
    pub output_format: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: ProblemStatus,
    #[serde(default)]
    pub starter_code: BTreeMap<String, String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn is_published(&self) -> bool {
        self.status == ProblemStatus::Published
    }

    /// Visible testcases shown to players, at most `limit`.
    pub fn samples(&self, limit: usize) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .filter(|tc| !tc.is_hidden)
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Read-only view of the problem catalog.
#[async_trait]
pub trait ProblemCatalog: Send + Sync {
    async fn get(&self, id: &str) -> EngineResult<Problem>;

    /// Every problem regardless of status, in catalog order.
    async fn list(&self) -> EngineResult<Vec<Problem>>;
}

/// Catalog loaded once at startup and shared read-only.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    problems: Arc<Vec<Problem>>,
}

impl InMemoryCatalog {
    pub fn new(problems: Vec<Problem>) -> Self {
        Self {
            problems: Arc::new(problems),
        }
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog {}", path.display()))?;
        let problems: Vec<Problem> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid catalog json in {}", path.display()))?;
        Ok(Self::new(problems))
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }
}

#[async_trait]
impl ProblemCatalog for InMemoryCatalog {
    async fn get(&self, id: &str) -> EngineResult<Problem> {
        self.problems
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(EngineError::NotFound("problem"))
    }

    async fn list(&self) -> EngineResult<Vec<Problem>> {
        Ok(self.problems.to_vec())
    }
}
