use tracing::{debug, error, info};

use crate::application::{Application, ApplicationStatus};
use crate::docker::{ContainerInfo, Runtime};
use crate::error::Error;
use crate::persistence::ApplicationStore;
use crate::tasks::TaskOutcome;

/// Deploy (or redeploy) the application of a team: converge any leftover
/// container state, pull and run the image, wait for it to stay running,
/// and persist the outcome. Every terminal branch writes a record so the
/// result is observable through the API.
pub async fn deploy_application(
    runtime: &impl Runtime,
    store: &impl ApplicationStore,
    team_id: &str,
    subdomain: &str,
    image_name: &str,
    registry_credentials: Option<&str>,
    redeploy: bool,
) -> TaskOutcome {
    let mut application = Application::new(team_id, subdomain, image_name);
    let container_name = format!("team-{team_id}");

    let result = run_deploy(
        runtime,
        store,
        team_id,
        subdomain,
        image_name,
        registry_credentials,
        redeploy,
        &container_name,
    )
    .await;

    let (error, status_code) = match result {
        Ok(info) => {
            application.status = Some(info.status);
            application.container_id = Some(info.id);
            application.container_name = Some(info.name);
            application.route = Some(info.route);
            application.logs = Some(info.logs);
            application.started_at = Some(info.started_at);
            (None, 200)
        }
        Err(Error::InvalidParameter(message)) => {
            application.status = Some(ApplicationStatus::InvalidParameter);
            application.error = Some(message.clone());
            (Some(message), 400)
        }
        Err(Error::ContainerStart {
            message,
            container_id,
            logs,
            ..
        }) => {
            application.status = Some(ApplicationStatus::Exited);
            application.container_id = Some(container_id);
            application.error = Some(message.clone());
            application.logs = Some(logs);
            (Some(message), 400)
        }
        Err(Error::Unauthorized) => {
            application.status = Some(ApplicationStatus::InvalidRegistryCredentials);
            (None, 401)
        }
        Err(err) => {
            error!(%team_id, error = %err, "deployment failed unexpectedly");
            application.status = Some(ApplicationStatus::InternalError);
            (None, 500)
        }
    };

    if let Err(err) = store.save(&application).await {
        error!(%team_id, error = %err, "failed to persist application record");
        return TaskOutcome {
            application: None,
            error: Some(err.to_string()),
            status_code: 500,
        };
    }

    TaskOutcome {
        application: Some(application),
        error,
        status_code,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_deploy(
    runtime: &impl Runtime,
    store: &impl ApplicationStore,
    team_id: &str,
    subdomain: &str,
    image_name: &str,
    registry_credentials: Option<&str>,
    redeploy: bool,
    container_name: &str,
) -> Result<ContainerInfo, Error> {
    check_deploy_conditions(runtime, store, team_id, subdomain, container_name, redeploy).await?;

    debug!(%team_id, %subdomain, %image_name, "deploying application");

    runtime
        .run(image_name, subdomain, container_name, registry_credentials)
        .await
}

/// Preflight of a deploy: re-read persisted state and reconcile it with
/// the container runtime before anything is pulled or started.
///
/// - no record, free subdomain: proceed, after a best-effort delete of any
///   leftover container carrying this team's name
/// - record exists, redeploy allowed: delete the stored container (by id,
///   then by name) and proceed
/// - record exists, redeploy refused: invalid parameter
/// - no record but the subdomain is taken: invalid parameter
async fn check_deploy_conditions(
    runtime: &impl Runtime,
    store: &impl ApplicationStore,
    team_id: &str,
    subdomain: &str,
    container_name: &str,
    redeploy: bool,
) -> Result<(), Error> {
    let application = store.get_application(team_id).await?;
    let subdomain_used = store.is_subdomain_used(subdomain).await?;

    match (application, subdomain_used) {
        (None, false) => {
            info!(%team_id, "no application found, deploying");
            match runtime.delete(container_name).await {
                Ok(false) => {}
                Ok(true) => {
                    info!(
                        %team_id, %container_name,
                        "deleted leftover container, the system was repaired from an inconsistent state"
                    );
                }
                Err(err) => {
                    // No record refers to this container, so losing it is
                    // not fatal; leave a trace for the operator.
                    error!(
                        %team_id, %container_name, error = %err,
                        "failed to delete leftover container with no stored record, please investigate"
                    );
                }
            }
            Ok(())
        }
        (Some(application), _) if redeploy => {
            info!(%team_id, "application already exists, redeploying");

            let mut found = false;
            if let Some(container_id) = application.container_id.as_deref() {
                found = runtime.delete(container_id).await.map_err(|err| {
                    error!(%team_id, %container_id, error = %err, "failed to delete container");
                    Error::Internal(format!(
                        "failed to delete container {container_id} for team {team_id}"
                    ))
                })?;
            }
            if !found {
                found = runtime.delete(container_name).await.map_err(|err| {
                    error!(%team_id, %container_name, error = %err, "failed to delete container");
                    Error::Internal(format!(
                        "failed to delete container {container_name} for team {team_id}"
                    ))
                })?;
            }

            if found {
                info!(%team_id, "deleted existing container, proceeding with deployment");
            } else {
                info!(%team_id, "no container exists, proceeding with deployment");
            }
            Ok(())
        }
        (Some(_), _) => Err(Error::InvalidParameter(format!(
            "Application already exists for team {team_id}"
        ))),
        (None, true) => Err(Error::InvalidParameter(format!(
            "Subdomain {subdomain} is already in use"
        ))),
    }
}
