use tracing::{debug, error};
use uuid::Uuid;

use crate::queue::{JobMeta, JobStatus};

/// Post `{job_id, status, application}` to the job's callback URL, if one
/// was registered. Fire and forget: transport failures are logged and
/// never fail the job.
pub async fn notify_callback_url(client: &reqwest::Client, job_id: Uuid, meta: &JobMeta) {
    let Some(callback_url) = meta.callback_url.as_deref() else {
        return;
    };

    let payload = serde_json::json!({
        "job_id": job_id,
        "status": meta.state.unwrap_or(JobStatus::Queued).to_string(),
        "application": meta.application,
    });

    debug!(%job_id, %callback_url, "posting job outcome to callback url");

    if let Err(err) = client.post(callback_url).json(&payload).send().await {
        error!(%callback_url, error = %err, "failed to send callback");
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::application::{Application, ApplicationStatus};

    use super::*;

    #[tokio::test]
    async fn posts_job_outcome_to_the_callback_url() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let job_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "job_id": job_id,
                "status": "finished",
                "application": { "team_id": "42", "status": "running" },
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut application = Application::new("42", "alpha", "traefik/whoami");
        application.status = Some(ApplicationStatus::Running);

        let meta = JobMeta {
            state: Some(JobStatus::Finished),
            callback_url: Some(format!("{}/hook", server.uri())),
            application: Some(application),
            status: Some("success".to_string()),
            status_code: Some(200),
        };

        notify_callback_url(&reqwest::Client::new(), job_id, &meta).await;
        Ok(())
    }

    #[tokio::test]
    async fn does_nothing_without_a_callback_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let meta = JobMeta::default();
        notify_callback_url(&reqwest::Client::new(), Uuid::new_v4(), &meta).await;
    }

    #[tokio::test]
    async fn transport_failures_are_swallowed() {
        let meta = JobMeta {
            callback_url: Some("http://127.0.0.1:1/unreachable".to_string()),
            ..JobMeta::default()
        };

        // Must not panic or error out.
        notify_callback_url(&reqwest::Client::new(), Uuid::new_v4(), &meta).await;
    }
}
