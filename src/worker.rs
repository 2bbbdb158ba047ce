use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::callback::notify_callback_url;
use crate::queue::{Job, JobStatus, TaskPayload};
use crate::service::DeployerService;
use crate::tasks::{self, TaskOutcome};

/// A background worker pulling jobs from the shared FIFO queue. Each
/// worker handles one job at a time, records the outcome into the job
/// metadata, and posts the callback when one was requested.
pub struct Worker {
    service: Arc<DeployerService>,
}

impl Worker {
    pub fn new(service: Arc<DeployerService>) -> Self {
        Self { service }
    }

    /// Run the worker loop. Queue errors are logged and retried; the loop
    /// itself never returns.
    pub async fn start(self) {
        info!("starting worker");

        loop {
            let job = match self.service.queue().dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "failed to poll the job queue");
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            debug!(job_id = %job.id, "received job");
            self.process(job).await;
        }
    }

    async fn process(&self, job: Job) {
        let service = self.service.as_ref();
        let queue = service.queue();

        if let Err(err) = queue.set_state(job.id, JobStatus::Started).await {
            error!(job_id = %job.id, error = %err, "failed to mark job as started");
        }

        let outcome = match job.task {
            TaskPayload::Deploy {
                team_id,
                subdomain,
                image_name,
                registry_credentials,
                redeploy,
            } => {
                tasks::deploy_application(
                    service.runtime(),
                    service.store(),
                    &team_id,
                    &subdomain,
                    &image_name,
                    registry_credentials.as_deref(),
                    redeploy,
                )
                .await
            }
            TaskPayload::Delete { team_id, force } => {
                match tasks::delete_application(service.runtime(), service.store(), &team_id, force)
                    .await
                {
                    Ok(()) => TaskOutcome::success(None),
                    Err(err) => TaskOutcome::from_error(&err),
                }
            }
            TaskPayload::DeleteAll { force } => {
                let report =
                    tasks::delete_all_applications(service.runtime(), service.store(), force).await;
                TaskOutcome {
                    application: None,
                    error: report.error,
                    status_code: report.status_code,
                }
            }
            TaskPayload::Resume => {
                match tasks::resume_stopped_containers(service.runtime(), service.store()).await {
                    Ok(()) => TaskOutcome::success(None),
                    Err(err) => TaskOutcome::from_error(&err),
                }
            }
        };

        debug!(job_id = %job.id, status_code = outcome.status_code, "job finished");

        if let Err(err) = queue
            .store_result(
                job.id,
                outcome.application.as_ref(),
                outcome.status_message().as_deref(),
                outcome.status_code,
            )
            .await
        {
            error!(job_id = %job.id, error = %err, "failed to store job outcome");
        }

        match queue.job_meta(job.id).await {
            Ok(meta) => notify_callback_url(service.client(), job.id, &meta).await,
            Err(err) => error!(job_id = %job.id, error = %err, "failed to read job metadata"),
        }
    }
}
