use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    catalog::ProblemCatalog,
    config::ContestConfig,
    contest::{
        ContestSession, ContestStatus, DeadlineQueue, RoomSettings, Submission, UserProgress,
        select_problems,
    },
    error::{EngineError, EngineResult},
    grader::Grader,
    metrics::MetricsRegistry,
    store::{EntityLocks, Repository},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub session: ContestSession,
    /// Absent when the session had already finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
}

/// Owns room-game sessions: creation from room settings, graded
/// submissions, and the RUNNING -> FINISHED transition.
pub struct ContestEngine {
    repo: Arc<dyn Repository<ContestSession>>,
    catalog: Arc<dyn ProblemCatalog>,
    grader: Arc<Grader>,
    metrics: Arc<MetricsRegistry>,
    locks: EntityLocks,
    deadlines: Arc<DeadlineQueue>,
    config: ContestConfig,
}

impl ContestEngine {
    pub fn new(
        repo: Arc<dyn Repository<ContestSession>>,
        catalog: Arc<dyn ProblemCatalog>,
        grader: Arc<Grader>,
        metrics: Arc<MetricsRegistry>,
        config: ContestConfig,
    ) -> Self {
        Self {
            repo,
            catalog,
            grader,
            metrics,
            locks: EntityLocks::new(),
            deadlines: Arc::new(DeadlineQueue::new()),
            config,
        }
    }

    pub fn deadlines(&self) -> Arc<DeadlineQueue> {
        self.deadlines.clone()
    }

    pub async fn create_from_room_settings(
        &self,
        settings: &RoomSettings,
    ) -> EngineResult<ContestSession> {
        let room_code = settings.room_code.trim();
        if room_code.is_empty() {
            return Err(EngineError::validation("roomCode is required"));
        }

        let duration_minutes = match settings.duration_minutes {
            d if d < 0 => self.config.default_duration_min.max(1),
            d => d,
        };

        let catalog = match self.catalog.list().await {
            Ok(problems) => problems,
            Err(err) => {
                tracing::warn!(room_code, error = %err, "catalog unavailable, using placeholder");
                Vec::new()
            }
        };
        let selection = select_problems(&catalog, settings, self.config.max_tasks);
        if selection.is_under_filled() {
            tracing::warn!(
                room_code,
                requested = selection.requested,
                selected = selection.problems.len(),
                "catalog exhausted, starting with fewer problems"
            );
        }

        let now = Utc::now();
        let session = ContestSession {
            id: Uuid::new_v4().to_string(),
            room_code: room_code.to_string(),
            status: ContestStatus::Running,
            language: settings.language,
            duration_minutes,
            started_at: now,
            ends_at: (duration_minutes > 0).then(|| now + Duration::minutes(duration_minutes)),
            finished_at: None,
            winner_user_id: None,
            problems: selection.problems,
            progress: Default::default(),
        };

        self.repo.create(session.clone()).await?;
        self.metrics.contest_created();
        if let Some(ends_at) = session.ends_at {
            self.deadlines.push(&session.id, ends_at);
        }
        tracing::info!(
            session_id = %session.id,
            room_code,
            language = %session.language,
            problems = session.problems.len(),
            duration_minutes,
            "contest session started"
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> EngineResult<ContestSession> {
        self.expire_if_due(session_id, Utc::now()).await
    }

    /// Finishes the session if its deadline has passed at `now`. Shared by
    /// reads, submissions and the reaper.
    pub async fn expire_if_due(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<ContestSession> {
        let session_id = required(session_id, "session id")?;
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.repo.get(session_id).await?;
        if self.apply_expiry(&mut session, now) {
            self.repo.update(session.clone()).await?;
        }
        Ok(session)
    }

    pub async fn submit(
        &self,
        session_id: &str,
        user_id: &str,
        display_name: &str,
        problem_id: &str,
        code: &str,
    ) -> EngineResult<SubmitOutcome> {
        let session_id = required(session_id, "session id")?;
        let user_id = required(user_id, "user id")?;
        let problem_id = required(problem_id, "problem id")?;
        if code.trim().is_empty() {
            return Err(EngineError::validation("code is required"));
        }
        let submitted_at = Utc::now();

        let language = {
            let _guard = self.locks.lock(session_id).await;
            let mut session = self.repo.get(session_id).await?;
            if !session.has_problem(problem_id) {
                return Err(EngineError::Conflict("problem not in this session".to_string()));
            }
            if self.apply_expiry(&mut session, submitted_at) {
                self.repo.update(session.clone()).await?;
            }
            if !session.is_running() {
                return Ok(SubmitOutcome {
                    session,
                    submission: None,
                });
            }
            session.language
        };

        // Grading runs unlocked; the result is applied to a fresh read below.
        let (correct, error_message) = match self
            .grader
            .judge(problem_id, language, code, Some(self.grader.submission_timeout()))
            .await
        {
            Ok(verdict) if verdict.passed => (true, None),
            Ok(verdict) => (
                false,
                Some(format!(
                    "wrong answer: {}/{}",
                    verdict.passed_count, verdict.total_count
                )),
            ),
            Err(EngineError::Disabled) => return Err(EngineError::Disabled),
            Err(err) => (false, Some(err.to_string())),
        };

        // The deadline was checked at `submitted_at`; only a finish that
        // predates the submission discards the graded result.
        let _guard = self.locks.lock(session_id).await;
        let mut session = self.repo.get(session_id).await?;
        if session.finished_at.is_some_and(|at| at <= submitted_at) {
            return Ok(SubmitOutcome {
                session,
                submission: None,
            });
        }
        let finished_while_grading = !session.is_running();

        let submission = Submission {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            problem_id: problem_id.to_string(),
            code: code.to_string(),
            submitted_at,
            correct,
            error_message,
        };

        let progress = session
            .progress
            .entry(user_id.to_string())
            .or_insert_with(|| UserProgress::new(user_id, display_name));
        if !display_name.is_empty() {
            progress.display_name = display_name.to_string();
        }
        progress
            .last_submission
            .insert(problem_id.to_string(), submission.clone());
        if correct && progress.solved.insert(problem_id.to_string()) {
            let solved_at = progress
                .last_solved_at
                .map_or(submitted_at, |prev| prev.max(submitted_at));
            progress.last_solved_at = Some(solved_at);
        }

        let now = Utc::now();
        if finished_while_grading {
            let winner_solved_all = session
                .winner_user_id
                .as_deref()
                .is_some_and(|winner| session.user_solved_all(winner));
            if !winner_solved_all {
                session.winner_user_id = session.leader();
            }
            tracing::info!(
                session_id,
                user_id,
                winner = session.winner_user_id.as_deref().unwrap_or(""),
                "late-graded submission applied to finished session"
            );
        } else if session.user_solved_all(user_id) {
            session.finish(now, Some(user_id.to_string()));
            self.metrics.contest_finished();
            tracing::info!(session_id, winner = user_id, "contest solved by a player");
        } else {
            self.apply_expiry(&mut session, now);
        }

        self.repo.update(session.clone()).await?;
        tracing::info!(
            session_id,
            user_id,
            problem_id,
            correct,
            "contest submission recorded"
        );
        Ok(SubmitOutcome {
            session,
            submission: Some(submission),
        })
    }

    /// Force-closes a session on behalf of its owner.
    pub async fn delete(&self, session_id: &str) -> EngineResult<()> {
        let session_id = required(session_id, "session id")?;
        let _guard = self.locks.lock(session_id).await;
        let session = self.repo.get(session_id).await?;
        self.repo.delete(session_id).await?;
        if session.is_running() {
            self.metrics.contest_finished();
        }
        tracing::info!(session_id, "contest session deleted");
        Ok(())
    }

    fn apply_expiry(&self, session: &mut ContestSession, now: DateTime<Utc>) -> bool {
        if !session.is_expired(now) {
            return false;
        }
        let winner = session.leader();
        tracing::info!(
            session_id = %session.id,
            winner = winner.as_deref().unwrap_or(""),
            "contest session expired"
        );
        session.finish(now, winner);
        self.metrics.contest_finished();
        true
    }
}

fn required<'a>(value: &'a str, field: &str) -> EngineResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    Ok(value)
}
