use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Error;

/// Terminal status of an application record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApplicationStatus {
    Running,
    Exited,
    InvalidParameter,
    InvalidRegistryCredentials,
    InternalError,
}

/// The durable representation of a team's deployment, keyed by `team_id`
/// and stored as a Redis hash. Optional fields are only present once the
/// corresponding stage of a deployment has been reached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub team_id: String,
    pub subdomain: String,
    pub image_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// JSON-encoded array of log lines, as returned by the log service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Freshness watermark of `logs`, unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_updated_at: Option<i64>,
    /// Unix seconds of the last successful container start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

impl Application {
    pub fn new(team_id: &str, subdomain: &str, image_name: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            subdomain: subdomain.to_string(),
            image_name: image_name.to_string(),
            container_id: None,
            container_name: None,
            route: None,
            status: None,
            error: None,
            logs: None,
            logs_updated_at: None,
            started_at: None,
        }
    }

    /// The hash fields written to the store. `None` fields are omitted;
    /// clearing a previously stored `error` is handled by the store.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("team_id", self.team_id.clone()),
            ("subdomain", self.subdomain.clone()),
            ("image_name", self.image_name.clone()),
        ];

        if let Some(container_id) = &self.container_id {
            fields.push(("container_id", container_id.clone()));
        }
        if let Some(container_name) = &self.container_name {
            fields.push(("container_name", container_name.clone()));
        }
        if let Some(route) = &self.route {
            fields.push(("route", route.clone()));
        }
        if let Some(status) = &self.status {
            fields.push(("status", status.to_string()));
        }
        if let Some(error) = &self.error {
            fields.push(("error", error.clone()));
        }
        if let Some(logs) = &self.logs {
            fields.push(("logs", logs.clone()));
        }
        if let Some(logs_updated_at) = self.logs_updated_at {
            fields.push(("logs_updated_at", logs_updated_at.to_string()));
        }
        if let Some(started_at) = self.started_at {
            fields.push(("started_at", started_at.to_string()));
        }

        fields
    }

    pub fn from_fields(mut fields: HashMap<String, String>) -> Result<Self, Error> {
        let team_id = fields
            .remove("team_id")
            .ok_or_else(|| Error::Internal("application record has no team_id".to_string()))?;
        let subdomain = fields
            .remove("subdomain")
            .ok_or_else(|| Error::Internal("application record has no subdomain".to_string()))?;
        let image_name = fields
            .remove("image_name")
            .ok_or_else(|| Error::Internal("application record has no image_name".to_string()))?;

        Ok(Self {
            team_id,
            subdomain,
            image_name,
            container_id: fields.remove("container_id"),
            container_name: fields.remove("container_name"),
            route: fields.remove("route"),
            status: fields.remove("status").and_then(|raw| raw.parse().ok()),
            error: fields.remove("error"),
            logs: fields.remove("logs"),
            logs_updated_at: fields
                .remove("logs_updated_at")
                .and_then(|raw| raw.parse().ok()),
            started_at: fields.remove("started_at").and_then(|raw| raw.parse().ok()),
        })
    }
}
