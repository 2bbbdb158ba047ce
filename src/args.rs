use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct Args {
    /// Address to bind the HTTP API to
    #[clap(long, default_value = "0.0.0.0:8000")]
    pub address: SocketAddr,
    /// Base domain under which deployed applications are routed
    /// (`{subdomain}.app.{base_domain}`)
    #[clap(long, env = "BASE_DOMAIN", default_value = "localhost")]
    pub base_domain: String,
    /// The Docker network shared with the Traefik proxy
    #[clap(long, env = "TRAEFIK_NETWORK", default_value = "traefik_default")]
    pub traefik_network: String,
    /// Redis host holding application state and the job queue
    #[clap(long, env = "REDIS_HOST", default_value = "redis-db")]
    pub redis_host: String,
    #[clap(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,
    /// Redis database used for the job queue (application state lives in db 0)
    #[clap(long, env = "RQ_DB", default_value_t = 1)]
    pub queue_db: u32,
    /// Seconds to wait for a deployed container to stay running
    #[clap(long, env = "DEPLOY_TIMEOUT", default_value_t = 60)]
    pub deploy_timeout: u64,
    /// Base URL of the Loki instance queried for container logs
    #[clap(long, env = "LOKI_URL", default_value = "http://loki:3100")]
    pub loki_url: String,
    /// Number of background workers pulling from the job queue
    #[clap(long, default_value_t = 2)]
    pub workers: usize,
}

impl Args {
    /// URL of the application state database (db 0).
    pub fn store_url(&self) -> String {
        format!("redis://{}:{}/0", self.redis_host, self.redis_port)
    }

    /// URL of the job queue database.
    pub fn queue_url(&self) -> String {
        format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.queue_db)
    }
}
