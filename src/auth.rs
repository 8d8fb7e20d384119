//! Request-level identity extraction, replacing the header-shape-sniffing
//! dual auth scheme of the original source with explicit, route-level
//! axum extractors: [`AdminIdentity`] for session/bearer-token admins and
//! [`AgentIdentity`] for hwid-authenticated agents.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::api::AppState;
use crate::error::DispatchError;

fn unauthorized() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({"error": true, "msg": "Authorization failure"})),
    )
        .into_response()
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// An authenticated admin, identified by a session id minted at `/login`.
pub struct AdminIdentity {
    pub session_id: String,
}

impl FromRequestParts<AppState> for AdminIdentity {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session_id = bearer_token(parts).ok_or_else(unauthorized)?;
        let valid = state
            .authz
            .check_session(session_id)
            .await
            .map_err(dispatch_error_response)?;
        if !valid {
            return Err(unauthorized());
        }
        Ok(AdminIdentity {
            session_id: session_id.to_string(),
        })
    }
}

/// An authenticated agent, identified by its hwid credential and resolved
/// to its admin-visible name.
pub struct AgentIdentity {
    pub name: String,
}

impl FromRequestParts<AppState> for AgentIdentity {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let hwid = bearer_token(parts).ok_or_else(unauthorized)?;
        let known = state
            .authz
            .check_agent_hwid(hwid)
            .await
            .map_err(dispatch_error_response)?;
        if !known {
            return Err(unauthorized());
        }
        let name = state
            .authz
            .agent_name_for_hwid(hwid)
            .await
            .map_err(dispatch_error_response)?;
        Ok(AgentIdentity { name })
    }
}

fn dispatch_error_response(err: DispatchError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": true, "msg": err.to_string()})),
    )
        .into_response()
}
