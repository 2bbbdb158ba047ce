use std::collections::HashMap;

use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::application::Application;
use crate::error::Error;

const DEFAULT_QUEUE: &str = "queue:default";
/// How long a blocking dequeue waits before yielding back to the worker
/// loop, in seconds.
const DEQUEUE_TIMEOUT_SECS: usize = 5;
/// Finished job metadata expires after this many seconds.
const JOB_RESULT_TTL_SECS: usize = 500;

fn job_key(id: Uuid) -> String {
    format!("rq:job:{id}")
}

/// The payload of a queued job: one of the four background tasks, with its
/// raw arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskPayload {
    Deploy {
        team_id: String,
        subdomain: String,
        image_name: String,
        registry_credentials: Option<String>,
        redeploy: bool,
    },
    Delete {
        team_id: String,
        force: bool,
    },
    DeleteAll {
        force: bool,
    },
    Resume,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(flatten)]
    pub task: TaskPayload,
}

/// Lifecycle state of a job, reported to callback URLs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
}

/// The mutable per-job metadata read by the callback hook. Tasks store
/// their terminal outcome here before the callback fires.
#[derive(Clone, Debug, Default)]
pub struct JobMeta {
    pub state: Option<JobStatus>,
    pub callback_url: Option<String>,
    pub application: Option<Application>,
    pub status: Option<String>,
    pub status_code: Option<u16>,
}

/// Durable FIFO job queue, persisted in its own Redis database so queue
/// entries never collide with application state.
#[derive(Clone)]
pub struct JobQueue {
    pool: Pool,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, Error> {
        let pool = RedisConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|err| Error::Internal(format!("failed to create redis pool: {err}")))?;

        Ok(Self { pool })
    }

    /// Enqueue a task and return its job id immediately.
    pub async fn enqueue(
        &self,
        task: TaskPayload,
        callback_url: Option<String>,
    ) -> Result<Uuid, Error> {
        let job = Job {
            id: Uuid::new_v4(),
            task,
        };
        let payload = serde_json::to_string(&job)
            .map_err(|err| Error::Internal(format!("failed to encode job: {err}")))?;

        let mut conn = self.pool.get().await?;

        let mut fields: Vec<(&str, String)> = vec![("state", JobStatus::Queued.to_string())];
        if let Some(callback_url) = callback_url {
            fields.push(("callback_url", callback_url));
        }
        conn.hset_multiple::<_, _, _, ()>(job_key(job.id), &fields)
            .await?;

        conn.rpush::<_, _, ()>(DEFAULT_QUEUE, payload).await?;

        Ok(job.id)
    }

    /// Blocking FIFO pop. Returns `None` when the wait timed out without a
    /// job becoming available.
    pub async fn dequeue(&self) -> Result<Option<Job>, Error> {
        let mut conn = self.pool.get().await?;

        let popped: Option<(String, String)> =
            conn.blpop(DEFAULT_QUEUE, DEQUEUE_TIMEOUT_SECS as f64).await?;

        match popped {
            Some((_, payload)) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(|err| Error::Internal(format!("failed to decode job: {err}"))),
            None => Ok(None),
        }
    }

    pub async fn set_state(&self, id: Uuid, state: JobStatus) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;
        conn.hset::<_, _, _, ()>(job_key(id), "state", state.to_string())
            .await?;
        Ok(())
    }

    /// Store a task's terminal outcome into the job metadata and mark the
    /// job finished. The metadata expires after a grace period.
    pub async fn store_result(
        &self,
        id: Uuid,
        application: Option<&Application>,
        status: Option<&str>,
        status_code: u16,
    ) -> Result<(), Error> {
        let mut conn = self.pool.get().await?;

        let mut fields: Vec<(&str, String)> = vec![
            ("state", JobStatus::Finished.to_string()),
            ("status_code", status_code.to_string()),
        ];
        if let Some(status) = status {
            fields.push(("status", status.to_string()));
        }
        if let Some(application) = application {
            let encoded = serde_json::to_string(application)
                .map_err(|err| Error::Internal(format!("failed to encode application: {err}")))?;
            fields.push(("application", encoded));
        }

        let key = job_key(id);
        conn.hset_multiple::<_, _, _, ()>(&key, &fields).await?;
        conn.expire::<_, ()>(&key, JOB_RESULT_TTL_SECS as i64).await?;

        Ok(())
    }

    pub async fn job_meta(&self, id: Uuid) -> Result<JobMeta, Error> {
        let mut conn = self.pool.get().await?;
        let fields: HashMap<String, String> = conn.hgetall(job_key(id)).await?;

        Ok(JobMeta {
            state: fields.get("state").and_then(|raw| raw.parse().ok()),
            callback_url: fields.get("callback_url").cloned(),
            application: fields
                .get("application")
                .and_then(|raw| serde_json::from_str(raw).ok()),
            status: fields.get("status").cloned(),
            status_code: fields.get("status_code").and_then(|raw| raw.parse().ok()),
        })
    }
}
