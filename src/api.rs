use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    contest::{ContestEngine, ContestSession, RoomSettings, SubmitOutcome},
    duel::{Match, MatchEngine, MatchSubmitOutcome, NewMatch},
    error::{EngineError, EngineResult},
    grader::{GradeVerdict, Grader},
    metrics::MetricsRegistry,
    sandbox::Language,
    submissions::{PracticeSolved, PracticeSubmission, SubmissionLog},
};

const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub grader: Arc<Grader>,
    pub submissions: Arc<SubmissionLog>,
    pub contests: Arc<ContestEngine>,
    pub matches: Arc<MatchEngine>,
    pub metrics: Arc<MetricsRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GradeRequest {
    problem_id: String,
    language: String,
    code: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PracticeResponse {
    #[serde(flatten)]
    verdict: GradeVerdict,
    attempt_number: u32,
}

#[derive(Debug, Deserialize)]
struct JoinRequest {
    player2: String,
}

#[derive(Debug, Deserialize)]
struct ScoreRequest {
    player: String,
    delta: i64,
    #[serde(default)]
    finish: bool,
}

#[derive(Debug, Deserialize)]
struct MatchSubmitRequest {
    player: String,
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContestSubmitRequest {
    problem_id: String,
    code: String,
    #[serde(default)]
    display_name: Option<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/grade", post(grade))
        .route("/v1/submissions", post(submit_practice))
        .route("/v1/users/{user_id}/submissions", get(list_submissions))
        .route("/v1/users/{user_id}/solved", get(list_solved))
        .route("/v1/matches", post(create_match))
        .route("/v1/matches/{id}", get(get_match))
        .route("/v1/matches/{id}/join", post(join_match))
        .route("/v1/matches/{id}/score", post(update_score))
        .route("/v1/matches/{id}/submit", post(submit_match))
        .route("/v1/contests", post(create_contest))
        .route("/v1/contests/{id}", get(get_contest).delete(delete_contest))
        .route("/v1/contests/{id}/submit", post(submit_contest))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

async fn grade(
    State(state): State<AppState>,
    Json(request): Json<GradeRequest>,
) -> EngineResult<Json<GradeVerdict>> {
    let language: Language = request.language.parse()?;
    let verdict = state
        .grader
        .judge(
            &request.problem_id,
            language,
            &request.code,
            request.timeout_ms.map(Duration::from_millis),
        )
        .await?;
    Ok(Json(verdict))
}

async fn submit_practice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GradeRequest>,
) -> EngineResult<Json<PracticeResponse>> {
    let user_id = caller_id(&headers)?;
    let language: Language = request.language.parse()?;
    let verdict = state
        .grader
        .judge(
            &request.problem_id,
            language,
            &request.code,
            request.timeout_ms.map(Duration::from_millis),
        )
        .await?;
    let record = state
        .submissions
        .record(&user_id, language, &request.code, &verdict)
        .await?;
    Ok(Json(PracticeResponse {
        verdict,
        attempt_number: record.attempt_number,
    }))
}

async fn list_submissions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<PracticeSubmission>> {
    Json(state.submissions.list_submissions(&user_id))
}

async fn list_solved(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<Vec<PracticeSolved>> {
    Json(state.submissions.list_solved(&user_id).into_values().collect())
}

async fn create_match(
    State(state): State<AppState>,
    Json(request): Json<NewMatch>,
) -> EngineResult<(StatusCode, Json<Match>)> {
    let created = state.matches.create_match(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> EngineResult<Json<Match>> {
    Ok(Json(state.matches.get_match(&id).await?))
}

async fn join_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<JoinRequest>,
) -> EngineResult<Json<Match>> {
    Ok(Json(state.matches.join_match(&id, &request.player2).await?))
}

async fn update_score(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ScoreRequest>,
) -> EngineResult<Json<Match>> {
    let updated = state
        .matches
        .update_score(&id, &request.player, request.delta, request.finish)
        .await?;
    Ok(Json(updated))
}

async fn submit_match(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MatchSubmitRequest>,
) -> EngineResult<Json<MatchSubmitOutcome>> {
    let outcome = state
        .matches
        .submit(&id, &request.player, &request.code)
        .await?;
    Ok(Json(outcome))
}

async fn create_contest(
    State(state): State<AppState>,
    Json(settings): Json<RoomSettings>,
) -> EngineResult<(StatusCode, Json<ContestSession>)> {
    let session = state.contests.create_from_room_settings(&settings).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_contest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> EngineResult<Json<ContestSession>> {
    Ok(Json(state.contests.get(&id).await?))
}

async fn delete_contest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> EngineResult<StatusCode> {
    state.contests.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_contest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<ContestSubmitRequest>,
) -> EngineResult<Json<SubmitOutcome>> {
    let user_id = caller_id(&headers)?;
    let display_name = request.display_name.as_deref().unwrap_or(&user_id);
    let outcome = state
        .contests
        .submit(&id, &user_id, display_name, &request.problem_id, &request.code)
        .await?;
    Ok(Json(outcome))
}

fn caller_id(headers: &HeaderMap) -> Result<String, EngineError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EngineError::validation(format!("{USER_HEADER} header is required")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::{AppState, routes};
    use crate::{
        catalog::{Difficulty, InMemoryCatalog},
        config::{ContestConfig, DuelConfig},
        contest::ContestEngine,
        duel::MatchEngine,
        sandbox::Language,
        store::MemoryRepository,
        submissions::SubmissionLog,
        testing::{DOUBLER, ScriptedSandbox, doubler, doubling_problem, grader_with},
    };

    fn app() -> Router {
        let catalog = InMemoryCatalog::new(vec![
            doubling_problem("e1", Difficulty::Easy),
            doubling_problem("m1", Difficulty::Medium),
        ]);
        let sandbox = ScriptedSandbox::new().program(DOUBLER, doubler);
        let (grader, metrics) = grader_with(catalog.clone(), Arc::new(sandbox));
        let contests = Arc::new(ContestEngine::new(
            Arc::new(MemoryRepository::new("session")),
            Arc::new(catalog),
            grader.clone(),
            metrics.clone(),
            ContestConfig::default(),
        ));
        let matches = Arc::new(MatchEngine::new(
            Arc::new(MemoryRepository::new("match")),
            grader.clone(),
            metrics.clone(),
            DuelConfig {
                default_problem_id: "e1".to_string(),
                default_language: Language::Python,
                ..DuelConfig::default()
            },
        ));
        routes(AppState {
            grader,
            submissions: Arc::new(SubmissionLog::new(None)),
            contests,
            matches,
            metrics,
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let app = app();
        let (status, body) = call(&app, "GET", "/healthz", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        let (status, _) = call(&app, "GET", "/metrics", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn grade_hides_hidden_output() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/v1/grade",
            None,
            Some(json!({"problemId": "e1", "language": "py", "code": DOUBLER})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["passed"], true);
        assert_eq!(body["passedCount"], 2);
        assert_eq!(body["results"][0]["output"], "6");
        assert!(body["results"][1].get("output").is_none());
    }

    #[tokio::test]
    async fn grade_maps_errors_to_status() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/v1/grade",
            None,
            Some(json!({"problemId": "e1", "language": "cobol", "code": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported_language");

        let (status, _) = call(
            &app,
            "POST",
            "/v1/grade",
            None,
            Some(json!({"problemId": "nope", "language": "go", "code": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn practice_submissions_are_logged_per_user() {
        let app = app();
        let request = json!({"problemId": "e1", "language": "python", "code": DOUBLER});
        let (status, _) = call(&app, "POST", "/v1/submissions", None, Some(request.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(&app, "POST", "/v1/submissions", Some("u1"), Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attemptNumber"], 1);
        assert_eq!(body["passed"], true);

        let (_, listed) = call(&app, "GET", "/v1/users/u1/submissions", None, None).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (_, solved) = call(&app, "GET", "/v1/users/u1/solved", None, None).await;
        assert_eq!(solved[0]["attemptsToSolve"], 1);
    }

    #[tokio::test]
    async fn contest_lifecycle_over_http() {
        let app = app();
        let (status, session) = call(
            &app,
            "POST",
            "/v1/contests",
            None,
            Some(json!({"roomCode": "R1", "language": "PY", "durationMinutes": 10, "taskCount": 1, "difficulty": "EASY"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session["status"], "RUNNING");
        let id = session["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/v1/contests/{id}/submit"),
            Some("alice"),
            Some(json!({"problemId": "m1", "code": DOUBLER})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, outcome) = call(
            &app,
            "POST",
            &format!("/v1/contests/{id}/submit"),
            Some("alice"),
            Some(json!({"problemId": "e1", "code": DOUBLER, "displayName": "Alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["submission"]["correct"], true);
        assert_eq!(outcome["session"]["status"], "FINISHED");
        assert_eq!(outcome["session"]["winnerUserId"], "alice");

        let (status, _) = call(&app, "DELETE", &format!("/v1/contests/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app, "GET", &format!("/v1/contests/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn duel_lifecycle_over_http() {
        let app = app();
        let (status, created) = call(
            &app,
            "POST",
            "/v1/matches",
            None,
            Some(json!({"type": "DUEL", "player1": "Alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "PENDING");
        let id = created["id"].as_str().unwrap().to_string();

        let (_, joined) = call(
            &app,
            "POST",
            &format!("/v1/matches/{id}/join"),
            None,
            Some(json!({"player2": "Bob"})),
        )
        .await;
        assert_eq!(joined["status"], "RUNNING");

        let (status, body) = call(
            &app,
            "POST",
            &format!("/v1/matches/{id}/score"),
            None,
            Some(json!({"player": "Nobody", "delta": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, outcome) = call(
            &app,
            "POST",
            &format!("/v1/matches/{id}/submit"),
            None,
            Some(json!({"player": "Bob", "code": DOUBLER})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["verdict"]["passed"], true);
        assert_eq!(outcome["match"]["status"], "FINISHED");
        assert_eq!(outcome["match"]["player2"]["score"], 100);

        let (_, fetched) = call(&app, "GET", &format!("/v1/matches/{id}"), None, None).await;
        assert_eq!(fetched["status"], "FINISHED");
    }
}
