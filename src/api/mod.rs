use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::application::Application;
use crate::error::Error;
use crate::persistence::ApplicationStore;
use crate::queue::TaskPayload;
use crate::service::DeployerService;
use crate::tasks;

/// Image deployed when the caller does not name one.
const DEFAULT_IMAGE: &str = "traefik/whoami";

pub fn make_api(service: Arc<DeployerService>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/reset-redis", get(reset_store))
        .route(
            "/application",
            get(get_all_applications)
                .put(restart_all_applications)
                .delete(delete_all_applications),
        )
        .route(
            "/application/:team_id",
            get(get_application)
                .post(deploy_application)
                .delete(delete_application),
        )
        .with_state(service)
}

/// Query booleans accept `true`, `1` and `yes`, case-insensitive.
fn truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    message: String,
    job_id: Uuid,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    deleted_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TeamResponse {
    team_id: String,
}

async fn home() -> &'static str {
    "The service is running!\n"
}

async fn reset_store(
    State(service): State<Arc<DeployerService>>,
) -> Result<Json<MessageResponse>, Error> {
    service.store().flush().await?;

    Ok(Json(MessageResponse {
        message: "Redis has been reset!".to_string(),
    }))
}

#[instrument(skip_all, fields(%team_id))]
async fn get_application(
    State(service): State<Arc<DeployerService>>,
    Path(team_id): Path<String>,
) -> Result<Json<Application>, Error> {
    let application = service
        .store()
        .get_application(&team_id)
        .await?
        .ok_or_else(|| Error::NotFound(team_id.clone()))?;

    // Best-effort log refresh; a failing log service never fails the read.
    let application = service
        .log_fetcher()
        .update_logs(service.store(), application)
        .await;

    Ok(Json(application))
}

async fn get_all_applications(
    State(service): State<Arc<DeployerService>>,
) -> Result<Json<Vec<Application>>, Error> {
    let applications = service.store().get_applications().await?;
    Ok(Json(applications))
}

#[derive(Debug, Deserialize)]
struct DeployParams {
    subdomain: Option<String>,
    #[serde(rename = "image-name")]
    image_name: Option<String>,
    #[serde(rename = "registry-credentials")]
    registry_credentials: Option<String>,
    redeploy: Option<String>,
    #[serde(rename = "callback-url")]
    callback_url: Option<String>,
}

#[instrument(skip_all, fields(%team_id))]
async fn deploy_application(
    State(service): State<Arc<DeployerService>>,
    Path(team_id): Path<String>,
    Query(params): Query<DeployParams>,
) -> Result<(StatusCode, Json<JobResponse>), Error> {
    let subdomain = params.subdomain.unwrap_or_else(|| team_id.clone());
    let image_name = params.image_name.unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let redeploy = params.redeploy.as_deref().map(truthy).unwrap_or(true);

    let job_id = service
        .queue()
        .enqueue(
            TaskPayload::Deploy {
                team_id,
                subdomain,
                image_name,
                registry_credentials: params.registry_credentials,
                redeploy,
            },
            params.callback_url,
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            message: "Deployment started".to_string(),
            job_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct RestartParams {
    #[serde(rename = "callback-url")]
    callback_url: Option<String>,
}

async fn restart_all_applications(
    State(service): State<Arc<DeployerService>>,
    Query(params): Query<RestartParams>,
) -> Result<(StatusCode, Json<JobResponse>), Error> {
    let job_id = service
        .queue()
        .enqueue(TaskPayload::Resume, params.callback_url)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobResponse {
            message: "Restart of all applications started".to_string(),
            job_id,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    force: Option<String>,
}

#[instrument(skip_all, fields(%team_id))]
async fn delete_application(
    State(service): State<Arc<DeployerService>>,
    Path(team_id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<TeamResponse>, Error> {
    let force = params.force.as_deref().map(truthy).unwrap_or(false);

    tasks::delete_application(service.runtime(), service.store(), &team_id, force).await?;

    Ok(Json(TeamResponse { team_id }))
}

#[derive(Debug, Deserialize)]
struct DeleteAllParams {
    force: Option<String>,
    #[serde(rename = "delete-all-applications")]
    delete_all_applications: Option<String>,
}

async fn delete_all_applications(
    State(service): State<Arc<DeployerService>>,
    Query(params): Query<DeleteAllParams>,
) -> Result<Json<DeletedResponse>, Error> {
    let confirmed = params
        .delete_all_applications
        .as_deref()
        .map(truthy)
        .unwrap_or(false);
    if !confirmed {
        return Err(Error::InvalidParameter("Delete all flag not set".to_string()));
    }

    let force = params.force.as_deref().map(truthy).unwrap_or(false);

    // Failures of individual deletes are logged by the task; the endpoint
    // reports every processed id either way.
    let report = tasks::delete_all_applications(service.runtime(), service.store(), force).await;

    Ok(Json(DeletedResponse {
        deleted_ids: report.deleted,
    }))
}
