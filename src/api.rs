//! HTTP Surface
//!
//! - `GET  /execution/{id}`: an action or workflow execution record
//! - `POST /runner/{id}`: runner postback, fed to result ingestion
//! - `POST /workflow/{id}`: start a submitted workflow execution
//!
//! Malformed ids answer 406, missing records 404, bad reports 400 and
//! executions that are already running or finished 409. Error bodies are
//! `{"error": message}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::execution::{Orchestrator, ResultIngestion, RunnerReport};
use crate::id::ExecutionId;
use crate::store::{Collection, Records};
use crate::workflow::state::WorkflowStatus;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    records: Records,
    orchestrator: Orchestrator,
    ingestion: ResultIngestion,
    shutdown: CancellationToken,
}

impl AppState {
    /// Workflow runs started over HTTP are cancelled with `shutdown`.
    pub fn new(orchestrator: Orchestrator, shutdown: CancellationToken) -> Self {
        let records = orchestrator.records().clone();
        Self {
            ingestion: ResultIngestion::new(records.clone()),
            records,
            orchestrator,
            shutdown,
        }
    }
}

/// Engine errors rendered as HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidIdFormat(_) => StatusCode::NOT_ACCEPTABLE,
            EngineError::InvalidReport(_) => StatusCode::BAD_REQUEST,
            EngineError::AlreadyTerminal { .. } | EngineError::AlreadyRunning(_) => {
                StatusCode::CONFLICT
            }
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            e => {
                error!("Request failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execution/{id}", get(get_execution))
        .route("/runner/{id}", post(post_runner))
        .route("/workflow/{id}", post(post_workflow))
        .with_state(state)
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = ExecutionId::parse(&id).map_err(EngineError::from)?;

    let document = match state
        .records
        .execution_document(Collection::ActionExecutions, &id)
        .await
    {
        Ok(document) => document,
        Err(EngineError::ExecutionNotFound(_)) => {
            state
                .records
                .execution_document(Collection::WorkflowExecutions, &id)
                .await?
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(Value::Object(document)))
}

async fn post_runner(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<RunnerReport>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.ingestion.report(&id, report).await?;
    Ok(Json(json!({ "recorded": outcome.is_recorded() })))
}

async fn post_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = ExecutionId::parse(&id).map_err(EngineError::from)?;

    let execution = state.records.workflow_execution(&id).await?;
    if execution.status.is_terminal() {
        return Err(EngineError::AlreadyTerminal {
            id,
            status: execution.status.to_string(),
        }
        .into());
    }
    if execution.status == WorkflowStatus::Running {
        return Err(EngineError::AlreadyRunning(id).into());
    }

    info!("Starting workflow execution {} on request", id);
    let _task = state
        .orchestrator
        .spawn(id.clone(), state.shutdown.child_token());

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "execution_id": id.as_str() })),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::execution::testing::{records_with_actions, PanickingStore, ScriptedFabric};
    use crate::workflow::model::{StepDescriptor, WorkflowDefinition};
    use crate::execution::testing::Scripted;
    use crate::execution::PollPolicy;
    use crate::workflow::state::{ActionStatus, NewActionExecution, NewWorkflowExecution};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.waiter.poll_interval_ms = 1;
        config
    }

    fn state(records: Records) -> AppState {
        let fabric = Arc::new(ScriptedFabric::new(records.clone()));
        AppState::new(Orchestrator::new(records, fabric, &config()), CancellationToken::new())
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn action_execution(records: &Records) -> ExecutionId {
        records
            .insert_action_execution(&NewActionExecution {
                action_namespace: "core".to_string(),
                action_name: "echo".to_string(),
                version: 1,
                parameters: json!("hi"),
                job_id: "core-echo-1".to_string(),
                execution_status: ActionStatus::Submitted,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_malformed_id_is_406_without_store_access() {
        let app = router(state(Records::new(Arc::new(PanickingStore))));

        let (status, body) = send(app.clone(), get("/execution/xyz")).await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
        assert!(body["error"].as_str().unwrap().contains("24 character"));

        let (status, _) = send(
            app.clone(),
            post_json("/runner/ABC", json!({"execution_status": "success"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);

        let (status, _) = send(app, Request::builder().method("POST").uri("/workflow/1").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn test_get_missing_execution_is_404() {
        let app = router(state(records_with_actions(&[]).await));
        let (status, _) = send(app, get("/execution/000000000000000000000000")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_action_then_workflow_execution() {
        let records = records_with_actions(&[]).await;
        let action_id = action_execution(&records).await;
        let workflow_id = records
            .insert_workflow_execution(&NewWorkflowExecution::submitted("ops", "w", 1))
            .await
            .unwrap();
        let app = router(state(records));

        let (status, body) = send(app.clone(), get(&format!("/execution/{}", action_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["_id"], json!(action_id.as_str()));
        assert_eq!(body["execution_status"], json!("submitted"));

        let (status, body) = send(app, get(&format!("/execution/{}", workflow_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workflow_name"], json!("w"));
        assert_eq!(body["status"], json!("submitted"));
    }

    #[tokio::test]
    async fn test_postback_recorded_once() {
        let records = records_with_actions(&[]).await;
        let id = action_execution(&records).await;
        let app = router(state(records.clone()));
        let report = json!({
            "job_id": "core-echo-1",
            "pod_id": "core-echo-1-abcde",
            "execution_status": "success",
            "execution_output": "hi"
        });

        let uri = format!("/runner/{}", id);
        let (status, body) = send(app.clone(), post_json(&uri, report.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"recorded": true}));

        let (status, body) = send(app, post_json(&uri, report)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"recorded": false}));

        let stored = records.action_execution(&id).await.unwrap();
        assert_eq!(stored.execution_status, ActionStatus::Success);
        assert_eq!(stored.standard_output, Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_postback_with_bad_status_is_400() {
        let records = records_with_actions(&[]).await;
        let id = action_execution(&records).await;
        let app = router(state(records));

        let (status, _) = send(
            app,
            post_json(&format!("/runner/{}", id), json!({"execution_status": "finished"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_postback_for_unknown_execution_is_404() {
        let app = router(state(records_with_actions(&[]).await));
        let (status, _) = send(
            app,
            post_json("/runner/000000000000000000000000", json!({"execution_status": "failed"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_workflow() {
        let records = records_with_actions(&["echo"]).await;
        records
            .put_workflow_definition(
                &WorkflowDefinition::new("ops", "w", 1, "a")
                    .with_step("a", StepDescriptor::new("core", "echo", 1)),
            )
            .await
            .unwrap();
        let id = records
            .insert_workflow_execution(&NewWorkflowExecution::submitted("ops", "w", 1))
            .await
            .unwrap();
        let app = router(state(records.clone()));

        let start = || {
            Request::builder()
                .method("POST")
                .uri(format!("/workflow/{}", id))
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send(app.clone(), start()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["execution_id"], json!(id.as_str()));

        let mut finished = false;
        for _ in 0..100 {
            if records.workflow_execution(&id).await.unwrap().status == WorkflowStatus::Success {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished);

        let (status, _) = send(app, start()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_start_while_running_is_409() {
        let records = records_with_actions(&["hang"]).await;
        records
            .put_workflow_definition(
                &WorkflowDefinition::new("ops", "w", 1, "a")
                    .with_step("a", StepDescriptor::new("core", "hang", 1)),
            )
            .await
            .unwrap();
        let id = records
            .insert_workflow_execution(&NewWorkflowExecution::submitted("ops", "w", 1))
            .await
            .unwrap();

        let fabric = Arc::new(ScriptedFabric::new(records.clone()).script("hang", Scripted::Silent));
        let orchestrator = Orchestrator::new(records.clone(), fabric.clone(), &config())
            .with_poll_policy(PollPolicy::new(Duration::from_secs(60), 10));
        let shutdown = CancellationToken::new();
        let app = router(AppState::new(orchestrator, shutdown.clone()));

        let start = || {
            Request::builder()
                .method("POST")
                .uri(format!("/workflow/{}", id))
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(app.clone(), start()).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let mut running = false;
        for _ in 0..100 {
            if records.workflow_execution(&id).await.unwrap().status == WorkflowStatus::Running {
                running = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(running);

        let (status, body) = send(app, start()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already running"));

        shutdown.cancel();
        let mut cancelled = false;
        for _ in 0..100 {
            if records.workflow_execution(&id).await.unwrap().status == WorkflowStatus::Cancelled {
                cancelled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cancelled);
        assert_eq!(fabric.requests().len(), 1);
    }

    #[test]
    fn test_error_status_mapping() {
        let status = |e: EngineError| ApiError(e).into_response().status();

        assert_eq!(status(EngineError::InvalidReport("x".to_string())), StatusCode::BAD_REQUEST);
        assert_eq!(status(EngineError::Cancelled), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status(EngineError::AlreadyRunning(ExecutionId::generate())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(EngineError::ExecutionNotFound(ExecutionId::generate())),
            StatusCode::NOT_FOUND
        );
    }
}
