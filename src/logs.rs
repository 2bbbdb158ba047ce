use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::application::Application;
use crate::persistence::ApplicationStore;

/// Logs younger than this are served from the record without asking the
/// log service again, in seconds.
const LOG_FRESHNESS_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    data: QueryRangeData,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    result: Vec<LogStream>,
}

#[derive(Debug, Deserialize)]
struct LogStream {
    values: Vec<(String, String)>,
}

/// Queries the external log service for lines tagged with a container id
/// and merges them onto the application record.
#[derive(Clone)]
pub struct LogFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl LogFetcher {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Refresh the record's logs when the watermark is stale. Persists the
    /// record on a non-empty fetch; any transport failure leaves the
    /// record unchanged.
    pub async fn update_logs(
        &self,
        store: &impl ApplicationStore,
        mut application: Application,
    ) -> Application {
        let now = Utc::now().timestamp();

        if let Some(updated_at) = application.logs_updated_at {
            if now - updated_at < LOG_FRESHNESS_SECS {
                debug!(team_id = %application.team_id, "logs are up to date");
                return application;
            }
        }

        let Some(container_id) = application.container_id.clone() else {
            info!(team_id = %application.team_id, "no container information stored, skipping log refresh");
            return application;
        };

        let Some(values) = self.fetch(&container_id).await else {
            return application;
        };

        application.logs_updated_at = Some(now);

        if values.is_empty() {
            debug!(%container_id, "no logs found for container");
            return application;
        }

        match serde_json::to_string(&values) {
            Ok(encoded) => application.logs = Some(encoded),
            Err(err) => {
                error!(%container_id, error = %err, "failed to encode fetched logs");
                return application;
            }
        }

        if let Err(err) = store.save(&application).await {
            error!(team_id = %application.team_id, error = %err, "failed to save refreshed logs");
        }

        application
    }

    /// The `[timestamp, line]` pairs of the first stream matching the
    /// container id, or `None` on any transport failure.
    async fn fetch(&self, container_id: &str) -> Option<Vec<(String, String)>> {
        let query = format!("{{container_id=\"{container_id}\"}}");
        let url = format!("{}/loki/api/v1/query_range", self.base_url);

        let response = match self
            .client
            .get(&url)
            .query(&[("query", query.as_str())])
            .send()
            .await
            .and_then(|response| response.error_for_status())
        {
            Ok(response) => response,
            Err(err) => {
                error!(%container_id, error = %err, "failed to get logs for container");
                return None;
            }
        };

        match response.json::<QueryRangeResponse>().await {
            Ok(body) => Some(
                body.data
                    .result
                    .into_iter()
                    .next()
                    .map(|stream| stream.values)
                    .unwrap_or_default(),
            ),
            Err(err) => {
                error!(%container_id, error = %err, "failed to decode log service response");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::tests::InMemoryStore;

    use super::*;

    #[tokio::test]
    async fn fetch_returns_the_first_stream() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loki/api/v1/query_range"))
            .and(query_param("query", "{container_id=\"deadbeef\"}"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "result": [
                        { "values": [["1700000000", "hello"], ["1700000001", "world"]] },
                        { "values": [["1700000002", "other stream"]] }
                    ]
                }
            })))
            .mount(&server)
            .await;

        let fetcher = LogFetcher::new(reqwest::Client::new(), server.uri());
        let values = fetcher.fetch("deadbeef").await.expect("fetch should succeed");

        assert_eq!(
            values,
            vec![
                ("1700000000".to_string(), "hello".to_string()),
                ("1700000001".to_string(), "world".to_string()),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn fetch_swallows_transport_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loki/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = LogFetcher::new(reqwest::Client::new(), server.uri());
        assert!(fetcher.fetch("deadbeef").await.is_none());
    }

    #[tokio::test]
    async fn fetch_handles_empty_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loki/api/v1/query_range"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": { "result": [] } })),
            )
            .mount(&server)
            .await;

        let fetcher = LogFetcher::new(reqwest::Client::new(), server.uri());
        assert_eq!(fetcher.fetch("deadbeef").await, Some(vec![]));
    }

    #[tokio::test]
    async fn fresh_logs_skip_the_log_service() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = InMemoryStore::default();
        let mut application = Application::new("42", "alpha", "traefik/whoami");
        application.container_id = Some("deadbeef".to_string());
        application.logs_updated_at = Some(Utc::now().timestamp());

        let fetcher = LogFetcher::new(reqwest::Client::new(), server.uri());
        let result = fetcher.update_logs(&store, application.clone()).await;

        assert_eq!(result, application);
        Ok(())
    }

    #[tokio::test]
    async fn stale_logs_are_fetched_and_persisted() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loki/api/v1/query_range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "result": [{ "values": [["1700000000", "hello"]] }] }
            })))
            .mount(&server)
            .await;

        let store = InMemoryStore::default();
        let mut application = Application::new("42", "alpha", "traefik/whoami");
        application.container_id = Some("deadbeef".to_string());
        application.logs_updated_at = Some(Utc::now().timestamp() - 2 * LOG_FRESHNESS_SECS);

        let fetcher = LogFetcher::new(reqwest::Client::new(), server.uri());
        let result = fetcher.update_logs(&store, application).await;

        assert_eq!(result.logs.as_deref(), Some("[[\"1700000000\",\"hello\"]]"));

        let stored = store
            .get_application("42")
            .await?
            .expect("record should have been persisted");
        assert_eq!(stored.logs, result.logs);
        assert_eq!(stored.logs_updated_at, result.logs_updated_at);
        Ok(())
    }
}
