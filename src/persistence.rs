use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use tracing::{debug, error, info, warn};

use crate::application::Application;
use crate::error::Error;

/// Set of team ids with a live record.
const MANAGED_APPLICATIONS: &str = "managed_applications";
/// Reverse index of subdomains claimed by a record.
const USED_SUBDOMAINS: &str = "used_subdomains";

/// Contract of the durable application store, as consumed by the
/// orchestrator tasks and the API. The production implementation is
/// [`Store`]; tests substitute an in-memory double.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// The record stored for `team_id`, or `None` when the team is not
    /// managed. A managed team without a record is an inconsistency and
    /// surfaces as an internal error.
    async fn get_application(&self, team_id: &str) -> Result<Option<Application>, Error>;

    /// Snapshot of all managed team ids.
    async fn get_all_team_ids(&self) -> Result<Vec<String>, Error>;

    /// All stored records. Any managed team without a record fails the
    /// whole call.
    async fn get_applications(&self) -> Result<Vec<Application>, Error>;

    async fn is_subdomain_used(&self, subdomain: &str) -> Result<bool, Error>;

    /// Upsert a record, registering its team id and subdomain in the
    /// membership sets. A previously stored `error` field is cleared when
    /// the incoming record carries none.
    async fn save(&self, application: &Application) -> Result<(), Error>;

    /// Remove the record and both set memberships atomically.
    async fn delete(&self, team_id: &str) -> Result<(), Error>;
}

/// The durable application store: one hash per team id plus the two
/// membership sets above, all in Redis db 0.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    pub fn new(redis_url: &str) -> Result<Self, Error> {
        let pool = RedisConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| Error::Internal(format!("failed to create redis pool: {err}")))?;

        Ok(Self { pool })
    }

    /// Wipe all state, including the other namespaces of the instance.
    pub async fn flush(&self) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("FLUSHALL").query_async(&mut conn).await?;
        info!("flushed the application store");
        Ok(())
    }
}

#[async_trait]
impl ApplicationStore for Store {
    async fn get_application(&self, team_id: &str) -> Result<Option<Application>, Error> {
        let mut conn = self.pool.get().await?;

        let managed: bool = conn.sismember(MANAGED_APPLICATIONS, team_id).await?;
        if !managed {
            return Ok(None);
        }

        let fields: HashMap<String, String> = conn.hgetall(team_id).await?;
        if fields.is_empty() {
            let message =
                format!("no application data for team {team_id}, the state of the store is inconsistent");
            error!("{message}");
            return Err(Error::Internal(message));
        }

        Application::from_fields(fields).map(Some)
    }

    async fn get_all_team_ids(&self) -> Result<Vec<String>, Error> {
        let mut conn = self.pool.get().await?;
        let team_ids: Vec<String> = conn.smembers(MANAGED_APPLICATIONS).await?;
        Ok(team_ids)
    }

    async fn get_applications(&self) -> Result<Vec<Application>, Error> {
        let team_ids = self.get_all_team_ids().await?;

        let mut applications = Vec::with_capacity(team_ids.len());
        for team_id in team_ids {
            let application = self.get_application(&team_id).await?.ok_or_else(|| {
                Error::Internal(format!(
                    "no application data for team {team_id}, the state of the store is inconsistent"
                ))
            })?;
            applications.push(application);
        }

        Ok(applications)
    }

    async fn is_subdomain_used(&self, subdomain: &str) -> Result<bool, Error> {
        let mut conn = self.pool.get().await?;
        let used: bool = conn.sismember(USED_SUBDOMAINS, subdomain).await?;
        Ok(used)
    }

    async fn save(&self, application: &Application) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        let team_id = application.team_id.as_str();

        conn.sadd::<_, _, ()>(MANAGED_APPLICATIONS, team_id).await?;
        conn.sadd::<_, _, ()>(USED_SUBDOMAINS, application.subdomain.as_str())
            .await?;

        if application.error.is_none() {
            let stale_error: bool = conn.hexists(team_id, "error").await?;
            if stale_error {
                debug!(%team_id, "clearing stored error field");
                conn.hdel::<_, _, ()>(team_id, "error").await?;
            }
        }

        info!(%team_id, "saving application record");
        let fields = application.to_fields();
        conn.hset_multiple::<_, _, _, ()>(team_id, &fields).await?;

        Ok(())
    }

    async fn delete(&self, team_id: &str) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;

        let fields: HashMap<String, String> = conn.hgetall(team_id).await?;
        let managed: bool = conn.sismember(MANAGED_APPLICATIONS, team_id).await?;

        if !managed {
            if !fields.is_empty() {
                warn!(%team_id, "record exists outside the managed set, removing it");
                conn.del::<_, ()>(team_id).await?;
            }
            return Ok(());
        }

        if fields.is_empty() {
            return Err(Error::Internal(format!(
                "no application data for team {team_id}, the state of the store is inconsistent"
            )));
        }

        let subdomain = fields.get("subdomain").cloned().unwrap_or_default();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(MANAGED_APPLICATIONS, team_id)
            .srem(USED_SUBDOMAINS, subdomain)
            .del(team_id);
        let _: () = pipe.query_async(&mut conn).await?;

        info!(%team_id, "deleted application record");
        Ok(())
    }
}
