use tracing::{error, info};

use crate::application::ApplicationStatus;
use crate::docker::Runtime;
use crate::error::Error;
use crate::persistence::ApplicationStore;

/// Start every persisted container again, typically after a host restart.
/// Records without a container are skipped; records whose container fails
/// to start are marked `internal_error`. The sweep processes every record
/// and only aborts when the store itself stops cooperating.
pub async fn resume_stopped_containers(
    runtime: &impl Runtime,
    store: &impl ApplicationStore,
) -> Result<(), Error> {
    let applications = store.get_applications().await?;
    info!("found {} applications", applications.len());

    for mut application in applications {
        let team_id = application.team_id.clone();
        info!(%team_id, "resuming application");

        let Some(container_id) = application.container_id.clone() else {
            if application.status == Some(ApplicationStatus::Running) {
                info!(%team_id, "container was not running, skipping");
            } else {
                info!(%team_id, status = ?application.status, "no container recorded, skipping");
            }
            continue;
        };

        match runtime.start(&container_id).await {
            Ok(started_at) => {
                info!(%team_id, %container_id, "successfully started container");
                application.status = Some(ApplicationStatus::Running);
                if let Some(started_at) = started_at {
                    application.started_at = Some(started_at);
                }
            }
            Err(err) => {
                error!(%team_id, %container_id, error = %err, "failed to start container");
                application.status = Some(ApplicationStatus::InternalError);
            }
        }

        if let Err(err) = store.save(&application).await {
            error!(%team_id, error = %err, "failed to save application record");
            return Err(err);
        }
    }

    Ok(())
}
