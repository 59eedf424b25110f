//! REST API handlers.
//!
//! Handlers decode the body themselves so that malformed JSON goes through
//! the same error path as every other validation failure.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use enrober_core::{
    DeploymentPatch, EnroberError, EnvironmentPatch, NewDeployment, NewEnvironment, Regenerate,
    RequestContext, RoutingInput,
};
use enrober_state::{EnvVar, PodTemplate};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::ApiState;
use crate::error::ApiError;

type ApiResult = Result<Response, ApiError>;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestContext {
        host: text(header::HOST).unwrap_or_default(),
        authorization: text(header::AUTHORIZATION),
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError(EnroberError::InvalidBody(e.to_string())))
}

/// Empty strings count as "not supplied".
fn supplied(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ── Request bodies ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEnvironmentRequest {
    pub environment_name: String,
    #[serde(default)]
    pub host_names: Vec<String>,
    #[serde(default)]
    pub isolated: Option<bool>,
}

/// `publicSecret` / `privateSecret` set to true regenerate that key.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchEnvironmentRequest {
    #[serde(default)]
    pub host_names: Option<Vec<String>>,
    #[serde(default)]
    pub public_secret: bool,
    #[serde(default)]
    pub private_secret: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingFields {
    #[serde(default)]
    pub public_hosts: Option<String>,
    #[serde(default)]
    pub public_paths: Option<String>,
    #[serde(default)]
    pub private_hosts: Option<String>,
    #[serde(default)]
    pub private_paths: Option<String>,
}

impl From<RoutingFields> for RoutingInput {
    fn from(f: RoutingFields) -> Self {
        RoutingInput {
            public_hosts: supplied(f.public_hosts),
            public_paths: supplied(f.public_paths),
            private_hosts: supplied(f.private_hosts),
            private_paths: supplied(f.private_paths),
        }
    }
}

fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub deployment_name: String,
    #[serde(flatten)]
    pub routing: RoutingFields,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default, rename = "ptsURL")]
    pub pts_url: Option<String>,
    #[serde(default)]
    pub pts: Option<PodTemplate>,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDeploymentRequest {
    #[serde(flatten)]
    pub routing: RoutingFields,
    #[serde(default)]
    pub replicas: Option<i32>,
    #[serde(default, rename = "ptsURL")]
    pub pts_url: Option<String>,
    #[serde(default)]
    pub pts: Option<PodTemplate>,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub tail: Option<usize>,
}

// ── Environments ───────────────────────────────────────────────

/// POST /environments
pub async fn create_environment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let req: CreateEnvironmentRequest = decode(&body)?;
    let input = NewEnvironment {
        name: req.environment_name,
        host_names: req.host_names,
        isolated: req.isolated,
    };
    let env = state
        .enrober
        .create_environment(input, &request_context(&headers))
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(env)).into_response())
}

/// GET /environments
pub async fn list_environments(State(state): State<ApiState>) -> ApiResult {
    let envs = state.enrober.list_environments()?;
    Ok(ApiResponse::ok(envs).into_response())
}

/// GET /environments/{env}
pub async fn get_environment(State(state): State<ApiState>, Path(env): Path<String>) -> ApiResult {
    let env = state.enrober.get_environment(&env)?;
    Ok(ApiResponse::ok(env).into_response())
}

/// PATCH /environments/{env}
pub async fn patch_environment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let req: PatchEnvironmentRequest = decode(&body)?;
    let patch = EnvironmentPatch {
        host_names: req.host_names,
        regenerate: Regenerate {
            public: req.public_secret,
            private: req.private_secret,
        },
    };
    let env = state
        .enrober
        .patch_environment(&env, patch, &request_context(&headers))
        .await?;
    Ok(ApiResponse::ok(env).into_response())
}

/// DELETE /environments/{env}
pub async fn delete_environment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    state
        .enrober
        .delete_environment(&env, &request_context(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── Deployments ────────────────────────────────────────────────

/// POST /environments/{env}/deployments
pub async fn create_deployment(
    State(state): State<ApiState>,
    Path(env): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let req: CreateDeploymentRequest = decode(&body)?;
    let input = NewDeployment {
        name: req.deployment_name,
        routing: req.routing.into(),
        replicas: req.replicas,
        pts_url: supplied(req.pts_url),
        pts: req.pts,
        env_vars: req.env_vars,
    };
    let dep = state
        .enrober
        .create_deployment(&env, input, &request_context(&headers))
        .await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(dep)).into_response())
}

/// GET /environments/{env}/deployments
pub async fn list_deployments(State(state): State<ApiState>, Path(env): Path<String>) -> ApiResult {
    let deps = state.enrober.list_deployments(&env)?;
    Ok(ApiResponse::ok(deps).into_response())
}

/// GET /environments/{env}/deployments/{name}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path((env, name)): Path<(String, String)>,
) -> ApiResult {
    let dep = state.enrober.get_deployment(&env, &name)?;
    Ok(ApiResponse::ok(dep).into_response())
}

/// PATCH /environments/{env}/deployments/{name}
pub async fn patch_deployment(
    State(state): State<ApiState>,
    Path((env, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let req: PatchDeploymentRequest = decode(&body)?;
    let patch = DeploymentPatch {
        routing: req.routing.into(),
        replicas: req.replicas,
        pts_url: supplied(req.pts_url),
        pts: req.pts,
        env_vars: req.env_vars,
    };
    let dep = state
        .enrober
        .patch_deployment(&env, &name, patch, &request_context(&headers))
        .await?;
    Ok(ApiResponse::ok(dep).into_response())
}

/// DELETE /environments/{env}/deployments/{name}
pub async fn delete_deployment(
    State(state): State<ApiState>,
    Path((env, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult {
    state
        .enrober
        .delete_deployment(&env, &name, &request_context(&headers))
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /environments/{env}/deployments/{name}/logs?tail=N
pub async fn deployment_logs(
    State(state): State<ApiState>,
    Path((env, name)): Path<(String, String)>,
    Query(query): Query<LogsQuery>,
) -> ApiResult {
    let logs = state.enrober.deployment_logs(&env, &name, query.tail)?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        logs,
    )
        .into_response())
}
