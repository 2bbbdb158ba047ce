use tracing::{error, info};

use crate::application::ApplicationStatus;
use crate::docker::Runtime;
use crate::error::Error;
use crate::persistence::ApplicationStore;

/// Delete a team's application: stop and remove its container when the
/// record says it is running, then drop the record and its set
/// memberships. With `force`, a failing container delete is logged and the
/// records are removed anyway.
pub async fn delete_application(
    runtime: &impl Runtime,
    store: &impl ApplicationStore,
    team_id: &str,
    force: bool,
) -> Result<(), Error> {
    let application = store
        .get_application(team_id)
        .await?
        .ok_or_else(|| Error::NotFound(team_id.to_string()))?;

    match (application.status, application.container_id.as_deref()) {
        (Some(ApplicationStatus::Running), None) => {
            let message = format!("no container information stored for team {team_id}");
            error!("{message}");
            return Err(Error::Internal(message));
        }
        (Some(ApplicationStatus::Running), Some(container_id)) => {
            if let Err(err) = runtime.delete(container_id).await {
                error!(%team_id, %container_id, error = %err, "failed to delete container");
                if !force {
                    return Err(Error::Internal(format!(
                        "failed to delete container {container_id} for team {team_id}: {err}"
                    )));
                }
                info!(%team_id, "force deleting application records");
            }
        }
        _ => {}
    }

    store.delete(team_id).await?;
    info!(%team_id, "successfully deleted application");

    Ok(())
}

/// Outcome of a delete-all sweep. `deleted` lists every processed team id,
/// including the ones whose individual delete failed.
#[derive(Clone, Debug)]
pub struct DeleteAllReport {
    pub deleted: Vec<String>,
    pub error: Option<String>,
    pub status_code: u16,
}

/// Best-effort delete of every managed application. Failures are collected
/// and reported; the sweep never stops early.
pub async fn delete_all_applications(
    runtime: &impl Runtime,
    store: &impl ApplicationStore,
    force: bool,
) -> DeleteAllReport {
    let team_ids = match store.get_all_team_ids().await {
        Ok(team_ids) => team_ids,
        Err(err) => {
            error!(error = %err, "failed to list managed applications");
            return DeleteAllReport {
                deleted: Vec::new(),
                error: Some(err.to_string()),
                status_code: 500,
            };
        }
    };

    let total = team_ids.len();
    let mut deleted = Vec::with_capacity(total);
    let mut errors = Vec::new();

    for team_id in team_ids {
        if let Err(err) = delete_application(runtime, store, &team_id, force).await {
            errors.push(err.to_string());
        }
        deleted.push(team_id);
    }

    if !errors.is_empty() {
        error!(
            "failed to delete {} applications out of {total}",
            errors.len()
        );
        return DeleteAllReport {
            deleted,
            error: Some(errors.join("\n")),
            status_code: 500,
        };
    }

    info!("successfully deleted {} applications", deleted.len());
    DeleteAllReport {
        deleted,
        error: None,
        status_code: 200,
    }
}
