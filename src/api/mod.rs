//! HTTP surface: a thin shell mapping the five route groups onto
//! [`Dispatcher`] and [`AuthZ`] operations, with the router built the way
//! this crate's `api/mod.rs` always has (route constants, a
//! `ServiceBuilder` stacking tracing and CORS, one handler per route).
//! Auth is handled per-route via the [`crate::auth`] extractors instead
//! of a single global middleware, since `/tasks` GET, `/login` and
//! `/agents` POST each authenticate differently (or not at all).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::authz::AuthZ;
use crate::auth::{AdminIdentity, AgentIdentity};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, Result};

type HandlerResult<T> = std::result::Result<T, DispatchError>;

const SERVICE_NAME: &str = "dispatch-core";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/health";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_RESULT: &str = "/task_result";
const ROUTE_LOGIN: &str = "/login";
const ROUTE_LOGOUT: &str = "/logout";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_AGENTS_SELFREG: &str = "/agents_selfreg";

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::Serialization(_) => StatusCode::BAD_REQUEST,
            DispatchError::Unauthorized => StatusCode::FORBIDDEN,
            DispatchError::UnknownAgent => StatusCode::NOT_FOUND,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::QueueOverflow => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::AgentDeregistered => StatusCode::GONE,
            DispatchError::MethodNotAllowed(..) => StatusCode::METHOD_NOT_ALLOWED,
            DispatchError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": true, "msg": self.to_string()}))).into_response()
    }
}

/// Shared application state threaded through every handler via axum's
/// `State` extractor, with the dispatcher and AuthZ store behind the same
/// `Arc`-cloned pattern as the original orchestrator handle.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub authz: Arc<dyn AuthZ>,
}

pub struct ApiServer {
    config: Config,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: Config, dispatcher: Arc<Dispatcher>, authz: Arc<dyn AuthZ>) -> Self {
        Self {
            config,
            state: AppState { dispatcher, authz },
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();
        let listener = tokio::net::TcpListener::bind(format!(
            "{}:{}",
            self.config.api.host, self.config.api.port
        ))
        .await
        .map_err(|e| DispatchError::Internal(e.into()))?;

        info!(
            "dispatch API listening on {}:{}",
            self.config.api.host, self.config.api.port
        );

        axum::serve(listener, app)
            .await
            .map_err(|e| DispatchError::Internal(e.into()))?;
        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .api
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
            ])
            .max_age(Duration::from_secs(3600));

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_TASKS, get(pull_task).post(submit_task))
            .route(ROUTE_TASK_RESULT, post(post_task_result))
            .route(ROUTE_LOGIN, post(login))
            .route(ROUTE_LOGOUT, post(logout))
            .route(
                ROUTE_AGENTS,
                get(list_agents)
                    .post(self_register_agent)
                    .patch(rename_agent)
                    .delete(delete_agent),
            )
            .route(
                ROUTE_AGENTS_SELFREG,
                get(get_self_reg).post(set_self_reg),
            )
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors_layer))
            .with_state(self.state.clone())
    }
}

/// Length-first comparison so numeric-like agent names order naturally:
/// shorter strings rank lower, ties broken lexicographically.
fn sort_agents(names: &mut [String]) {
    names.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

async fn pull_task(
    State(state): State<AppState>,
    agent: AgentIdentity,
) -> HandlerResult<Json<Value>> {
    let task = state.dispatcher.pull(&agent.name).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct SubmitQuery {
    target: String,
    timeout: Option<u64>,
}

async fn submit_task(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Query(query): Query<SubmitQuery>,
    Json(body): Json<Value>,
) -> HandlerResult<Json<Value>> {
    let timeout = query.timeout.map(Duration::from_secs);
    let results = state.dispatcher.submit(&query.target, body, timeout).await?;
    Ok(Json(json!({"error": false, "results": results})))
}

#[derive(Debug, Deserialize)]
struct TaskResultQuery {
    id: u64,
}

async fn post_task_result(
    State(state): State<AppState>,
    agent: AgentIdentity,
    Query(query): Query<TaskResultQuery>,
    Json(payload): Json<Value>,
) -> HandlerResult<StatusCode> {
    state.dispatcher.complete(&agent.name, query.id, payload).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    token: String,
}

async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> HandlerResult<Json<Value>> {
    let token = state.authz.init_session(&query.token).await?;
    Ok(Json(json!({"error": false, "token": token})))
}

async fn logout(
    State(state): State<AppState>,
    admin: AdminIdentity,
) -> HandlerResult<Json<Value>> {
    state.authz.kill_session(&admin.session_id).await?;
    Ok(Json(json!({"error": false})))
}

async fn list_agents(
    State(state): State<AppState>,
    _admin: AdminIdentity,
) -> HandlerResult<Json<Value>> {
    let liveness = state.dispatcher.agent_liveness().await?;
    let mut names: Vec<String> = liveness.keys().cloned().collect();
    sort_agents(&mut names);
    let online: HashMap<String, bool> = liveness;
    Ok(Json(json!({"agents": names, "online": online})))
}

#[derive(Debug, Deserialize)]
struct SelfRegQuery {
    name: String,
    hwid: String,
}

async fn self_register_agent(
    State(state): State<AppState>,
    Query(query): Query<SelfRegQuery>,
) -> HandlerResult<StatusCode> {
    if !state.authz.self_reg_enabled().await? {
        return Err(DispatchError::Unauthorized);
    }
    state.authz.add_agent(&query.name, &query.hwid).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct RenameQuery {
    id: String,
    #[serde(rename = "newId")]
    new_id: String,
}

async fn rename_agent(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Query(query): Query<RenameQuery>,
) -> HandlerResult<StatusCode> {
    if !state.authz.agent_exists(&query.id).await? {
        return Err(DispatchError::UnknownAgent);
    }
    state.dispatcher.rename(&query.id, &query.new_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    id: String,
}

async fn delete_agent(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Query(query): Query<DeleteQuery>,
) -> HandlerResult<StatusCode> {
    state.dispatcher.deregister(&query.id).await?;
    Ok(StatusCode::OK)
}

async fn get_self_reg(
    State(state): State<AppState>,
    _admin: AdminIdentity,
) -> HandlerResult<String> {
    let enabled = state.authz.self_reg_enabled().await?;
    Ok(if enabled { "1".to_string() } else { "0".to_string() })
}

#[derive(Debug, Deserialize)]
struct SelfRegFlagQuery {
    enabled: String,
}

async fn set_self_reg(
    State(state): State<AppState>,
    _admin: AdminIdentity,
    Query(query): Query<SelfRegFlagQuery>,
) -> HandlerResult<Json<Value>> {
    let enabled = match query.enabled.as_str() {
        "1" => true,
        "0" => false,
        _ => return Err(DispatchError::Validation("enabled must be 1 or 0".into())),
    };
    state.authz.set_self_reg_enabled(enabled).await?;
    Ok(Json(json!({"error": false})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_sort_is_length_first_then_lexicographic() {
        let mut names = vec![
            "7-3".to_string(),
            "42-10".to_string(),
            "1".to_string(),
            "42-1".to_string(),
        ];
        sort_agents(&mut names);
        assert_eq!(names, vec!["1", "7-3", "42-1", "42-10"]);
    }
}
