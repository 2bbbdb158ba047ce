use std::time::Duration;

use bollard::Docker;

use crate::args::Args;
use crate::docker::{ContainerRuntime, ContainerSettings};
use crate::error::Error;
use crate::logs::LogFetcher;
use crate::persistence::Store;
use crate::queue::JobQueue;

/// The process-wide dependency bundle handed to handlers and tasks: the
/// container runtime, the state store, the job queue, the log fetcher, and
/// an outbound HTTP client for callbacks.
pub struct DeployerService {
    runtime: ContainerRuntime,
    store: Store,
    queue: JobQueue,
    log_fetcher: LogFetcher,
    client: reqwest::Client,
}

impl DeployerService {
    pub fn init(args: &Args) -> Result<Self, Error> {
        let docker = Docker::connect_with_local_defaults().map_err(Error::Docker)?;

        let settings = ContainerSettings::builder()
            .network_name(&args.traefik_network)
            .base_domain(&args.base_domain)
            .deploy_timeout(Duration::from_secs(args.deploy_timeout))
            .build();

        let store = Store::new(&args.store_url())?;
        let queue = JobQueue::new(&args.queue_url())?;

        let client = reqwest::Client::new();
        let log_fetcher = LogFetcher::new(client.clone(), args.loki_url.clone());

        Ok(Self {
            runtime: ContainerRuntime::new(docker, settings),
            store,
            queue,
            log_fetcher,
            client,
        })
    }

    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn log_fetcher(&self) -> &LogFetcher {
        &self.log_fetcher
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}
