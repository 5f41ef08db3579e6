mod bot;
mod engine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{sandbox::Language, store::Keyed};

pub use bot::BotRegistry;
pub use engine::{MatchEngine, MatchSubmitOutcome};

/// Display name of the simulated opponent in BOT matches.
pub const BOT_NAME: &str = "Bot";
/// Points awarded for a passing duel submission.
pub const SOLVE_POINTS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    Bot,
    Duel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchStatus {
    Pending,
    Running,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub name: String,
    pub score: i64,
}

impl PlayerResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            score: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatch {
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub player1: String,
    #[serde(default)]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    #[serde(rename = "type")]
    pub match_type: MatchType,
    pub status: MatchStatus,
    pub player1: PlayerResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player2: Option<PlayerResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Keyed for Match {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Match {
    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::Finished
    }

    /// Looks a player up by display name.
    pub fn player_mut(&mut self, name: &str) -> Option<&mut PlayerResult> {
        if self.player1.name == name {
            return Some(&mut self.player1);
        }
        self.player2.as_mut().filter(|p| p.name == name)
    }

    pub fn player(&self, name: &str) -> Option<&PlayerResult> {
        std::iter::once(&self.player1)
            .chain(self.player2.as_ref())
            .find(|p| p.name == name)
    }
}
