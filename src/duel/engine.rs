use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    config::DuelConfig,
    duel::{
        BOT_NAME, BotRegistry, Match, MatchStatus, MatchType, NewMatch, PlayerResult, SOLVE_POINTS,
        bot,
    },
    error::{EngineError, EngineResult},
    grader::{GradeVerdict, Grader},
    metrics::MetricsRegistry,
    store::{EntityLocks, Repository},
};

#[derive(Debug, Clone, Serialize)]
pub struct MatchSubmitOutcome {
    #[serde(rename = "match")]
    pub duel: Match,
    pub verdict: GradeVerdict,
}

pub struct MatchEngine {
    repo: Arc<dyn Repository<Match>>,
    grader: Arc<Grader>,
    metrics: Arc<MetricsRegistry>,
    locks: EntityLocks,
    bots: BotRegistry,
    config: DuelConfig,
}

impl MatchEngine {
    pub fn new(
        repo: Arc<dyn Repository<Match>>,
        grader: Arc<Grader>,
        metrics: Arc<MetricsRegistry>,
        config: DuelConfig,
    ) -> Self {
        Self {
            repo,
            grader,
            metrics,
            locks: EntityLocks::new(),
            bots: BotRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &DuelConfig {
        &self.config
    }

    pub fn bots(&self) -> &BotRegistry {
        &self.bots
    }

    /// Allocates a match. BOT matches start RUNNING against the simulated
    /// opponent, whose simulator is spawned before returning.
    pub async fn create_match(self: &Arc<Self>, request: NewMatch) -> EngineResult<Match> {
        let player1 = request.player1.trim();
        if player1.is_empty() {
            return Err(EngineError::validation("player1 is required"));
        }
        if request.match_type == MatchType::Bot && player1 == BOT_NAME {
            return Err(EngineError::validation("player1 name is reserved"));
        }

        let now = Utc::now();
        let is_bot = request.match_type == MatchType::Bot;
        let record = Match {
            id: Uuid::new_v4().to_string(),
            match_type: request.match_type,
            status: if is_bot {
                MatchStatus::Running
            } else {
                MatchStatus::Pending
            },
            player1: PlayerResult::new(player1),
            player2: is_bot.then(|| PlayerResult::new(BOT_NAME)),
            problem_id: request
                .problem_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            language: request.language,
            created_at: now,
            updated_at: now,
        };

        self.repo.create(record.clone()).await?;
        self.metrics.match_created();
        tracing::info!(
            match_id = %record.id,
            match_type = ?record.match_type,
            player1,
            "match created"
        );

        if is_bot {
            let cancel = self.bots.register(&record.id);
            tokio::spawn(bot::simulate(Arc::clone(self), record.id.clone(), cancel));
        }
        Ok(record)
    }

    /// Seats the second player. Repeated joins return the match unchanged.
    pub async fn join_match(&self, match_id: &str, player2: &str) -> EngineResult<Match> {
        let player2 = player2.trim();
        if player2.is_empty() {
            return Err(EngineError::validation("player2 is required"));
        }
        let _guard = self.locks.lock(match_id).await;
        let mut record = self.repo.get(match_id).await?;
        if record.player2.is_some() {
            return Ok(record);
        }
        if record.is_finished() {
            return Err(EngineError::Conflict("match already finished".to_string()));
        }

        record.player2 = Some(PlayerResult::new(player2));
        record.status = MatchStatus::Running;
        record.updated_at = Utc::now();
        self.repo.update(record.clone()).await?;
        tracing::info!(match_id, player2, "player joined match");
        Ok(record)
    }

    pub async fn update_score(
        &self,
        match_id: &str,
        player: &str,
        delta: i64,
        finish: bool,
    ) -> EngineResult<Match> {
        let _guard = self.locks.lock(match_id).await;
        let mut record = self.repo.get(match_id).await?;
        self.apply_score(&mut record, player, delta, finish)?;
        self.repo.update(record.clone()).await?;
        Ok(record)
    }

    pub async fn get_match(&self, match_id: &str) -> EngineResult<Match> {
        self.repo.get(match_id).await
    }

    /// Grades `code` against the match problem; a pass scores and ends the
    /// match.
    pub async fn submit(
        &self,
        match_id: &str,
        player: &str,
        code: &str,
    ) -> EngineResult<MatchSubmitOutcome> {
        let player = player.trim();
        if player.is_empty() || code.trim().is_empty() {
            return Err(EngineError::validation("player and code are required"));
        }

        let record = self.repo.get(match_id).await?;
        match record.status {
            MatchStatus::Pending => {
                return Err(EngineError::Conflict("match has not started".to_string()));
            }
            MatchStatus::Finished => {
                return Err(EngineError::Conflict("match already finished".to_string()));
            }
            MatchStatus::Running => {}
        }
        if record.player(player).is_none() {
            return Err(EngineError::validation(format!("{player} is not in this match")));
        }

        let problem_id = record
            .problem_id
            .as_deref()
            .unwrap_or(&self.config.default_problem_id);
        let language = record.language.unwrap_or(self.config.default_language);
        let verdict = self
            .grader
            .judge(problem_id, language, code, Some(self.grader.submission_timeout()))
            .await?;

        let _guard = self.locks.lock(match_id).await;
        let mut record = self.repo.get(match_id).await?;
        if verdict.passed && !record.is_finished() {
            self.apply_score(&mut record, player, SOLVE_POINTS, true)?;
            self.repo.update(record.clone()).await?;
        }
        tracing::info!(
            match_id,
            player,
            problem_id = %verdict.problem_id,
            passed = verdict.passed,
            "match submission graded"
        );
        Ok(MatchSubmitOutcome {
            duel: record,
            verdict,
        })
    }

    /// One simulator step. Returns `false` once the match is finished.
    pub(super) async fn bot_tick(&self, match_id: &str, increment: i64) -> EngineResult<bool> {
        let _guard = self.locks.lock(match_id).await;
        let mut record = self.repo.get(match_id).await?;
        if record.is_finished() {
            return Ok(false);
        }
        let bot = record
            .player2
            .get_or_insert_with(|| PlayerResult::new(BOT_NAME));
        bot.score += increment;
        record.updated_at = Utc::now();
        self.repo.update(record).await?;
        self.metrics.bot_ticked();
        Ok(true)
    }

    fn apply_score(
        &self,
        record: &mut Match,
        player: &str,
        delta: i64,
        finish: bool,
    ) -> EngineResult<()> {
        if record.is_finished() {
            return Err(EngineError::Conflict("match already finished".to_string()));
        }
        let Some(entry) = record.player_mut(player) else {
            return Err(EngineError::validation(format!("{player} is not in this match")));
        };
        entry.score += delta;
        if finish {
            record.status = MatchStatus::Finished;
            self.bots.cancel(&record.id);
            tracing::info!(match_id = %record.id, finisher = player, "match finished");
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}
