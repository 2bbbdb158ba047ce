pub mod api;
pub mod application;
pub mod args;
pub mod callback;
pub mod docker;
pub mod error;
pub mod logs;
pub mod persistence;
pub mod queue;
pub mod service;
pub mod tasks;
pub mod worker;

pub use error::Error;

#[cfg(test)]
pub mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::application::{Application, ApplicationStatus};
    use crate::docker::{ContainerInfo, Runtime};
    use crate::error::Error;
    use crate::persistence::ApplicationStore;

    /// How a [`FakeRuntime::run`] call should fail.
    pub enum RunFailure {
        ContainerStart { logs: String },
        Unauthorized,
    }

    struct FakeContainer {
        id: String,
        name: String,
        running: bool,
    }

    #[derive(Default)]
    struct FakeRuntimeState {
        containers: Vec<FakeContainer>,
        next_id: usize,
        fail_deletes: bool,
        run_failure: Option<RunFailure>,
    }

    /// A container engine double for driving the orchestrator tasks
    /// without a live daemon.
    #[derive(Default)]
    pub struct FakeRuntime {
        state: Mutex<FakeRuntimeState>,
    }

    impl FakeRuntime {
        pub fn insert_container(&self, name: &str, running: bool) -> String {
            let mut state = self.state.lock().unwrap();
            let id = format!("fake-{}", state.next_id);
            state.next_id += 1;
            state.containers.push(FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                running,
            });
            id
        }

        pub fn fail_deletes(&self) {
            self.state.lock().unwrap().fail_deletes = true;
        }

        pub fn fail_next_run(&self, failure: RunFailure) {
            self.state.lock().unwrap().run_failure = Some(failure);
        }

        pub fn has_container(&self, id_or_name: &str) -> bool {
            self.state
                .lock()
                .unwrap()
                .containers
                .iter()
                .any(|container| container.id == id_or_name || container.name == id_or_name)
        }

        pub fn is_running(&self, id_or_name: &str) -> bool {
            self.state
                .lock()
                .unwrap()
                .containers
                .iter()
                .any(|container| {
                    (container.id == id_or_name || container.name == id_or_name)
                        && container.running
                })
        }
    }

    #[async_trait]
    impl Runtime for FakeRuntime {
        async fn run(
            &self,
            image_name: &str,
            subdomain: &str,
            container_name: &str,
            _registry_credentials: Option<&str>,
        ) -> Result<ContainerInfo, Error> {
            let mut state = self.state.lock().unwrap();

            if let Some(failure) = state.run_failure.take() {
                return match failure {
                    RunFailure::ContainerStart { logs } => Err(Error::ContainerStart {
                        message: format!("container for image {image_name} failed to stay running"),
                        container_id: "fake-crashed".to_string(),
                        container_status: "exited".to_string(),
                        logs,
                    }),
                    RunFailure::Unauthorized => Err(Error::Unauthorized),
                };
            }

            let id = format!("fake-{}", state.next_id);
            state.next_id += 1;
            state.containers.push(FakeContainer {
                id: id.clone(),
                name: container_name.to_string(),
                running: true,
            });

            Ok(ContainerInfo {
                status: ApplicationStatus::Running,
                id,
                name: container_name.to_string(),
                route: format!("{subdomain}.app.localhost"),
                logs: String::new(),
                started_at: 1_700_000_100,
            })
        }

        async fn start(&self, container_id: &str) -> Result<Option<i64>, Error> {
            let mut state = self.state.lock().unwrap();

            let Some(container) = state
                .containers
                .iter_mut()
                .find(|container| container.id == container_id)
            else {
                return Err(Error::InvalidParameter(format!(
                    "Container {container_id} not found"
                )));
            };

            if container.running {
                return Ok(None);
            }

            container.running = true;
            Ok(Some(1_700_000_200))
        }

        async fn delete(&self, id_or_name: &str) -> Result<bool, Error> {
            let mut state = self.state.lock().unwrap();

            if state.fail_deletes {
                return Err(Error::Internal("engine unavailable".to_string()));
            }

            let before = state.containers.len();
            state
                .containers
                .retain(|container| container.id != id_or_name && container.name != id_or_name);

            Ok(state.containers.len() < before)
        }
    }

    #[derive(Default)]
    struct InMemoryStoreState {
        applications: HashMap<String, Application>,
        managed: HashSet<String>,
        subdomains: HashSet<String>,
        fail_saves: bool,
    }

    /// An in-memory stand-in for the Redis store, mirroring its hash and
    /// set semantics.
    #[derive(Default)]
    pub struct InMemoryStore {
        state: Mutex<InMemoryStoreState>,
    }

    impl InMemoryStore {
        pub fn fail_saves(&self) {
            self.state.lock().unwrap().fail_saves = true;
        }
    }

    #[async_trait]
    impl ApplicationStore for InMemoryStore {
        async fn get_application(&self, team_id: &str) -> Result<Option<Application>, Error> {
            let state = self.state.lock().unwrap();

            if !state.managed.contains(team_id) {
                return Ok(None);
            }

            match state.applications.get(team_id) {
                Some(application) => Ok(Some(application.clone())),
                None => Err(Error::Internal(format!(
                    "no application data for team {team_id}, the state of the store is inconsistent"
                ))),
            }
        }

        async fn get_all_team_ids(&self) -> Result<Vec<String>, Error> {
            Ok(self.state.lock().unwrap().managed.iter().cloned().collect())
        }

        async fn get_applications(&self) -> Result<Vec<Application>, Error> {
            let team_ids = self.get_all_team_ids().await?;

            let mut applications = Vec::with_capacity(team_ids.len());
            for team_id in team_ids {
                match self.get_application(&team_id).await? {
                    Some(application) => applications.push(application),
                    None => {
                        return Err(Error::Internal(format!(
                            "no application data for team {team_id}, the state of the store is inconsistent"
                        )))
                    }
                }
            }

            Ok(applications)
        }

        async fn is_subdomain_used(&self, subdomain: &str) -> Result<bool, Error> {
            Ok(self.state.lock().unwrap().subdomains.contains(subdomain))
        }

        async fn save(&self, application: &Application) -> Result<(), Error> {
            let mut state = self.state.lock().unwrap();

            if state.fail_saves {
                return Err(Error::Internal("store unavailable".to_string()));
            }

            state.managed.insert(application.team_id.clone());
            state.subdomains.insert(application.subdomain.clone());

            // hash-style upsert: fields absent from the incoming record
            // keep their stored value, except `error`, which an errorless
            // save clears
            let merged = match state.applications.get(&application.team_id) {
                Some(existing) => {
                    let mut merged = application.clone();
                    merged.container_id =
                        merged.container_id.or_else(|| existing.container_id.clone());
                    merged.container_name = merged
                        .container_name
                        .or_else(|| existing.container_name.clone());
                    merged.route = merged.route.or_else(|| existing.route.clone());
                    merged.status = merged.status.or(existing.status);
                    merged.logs = merged.logs.or_else(|| existing.logs.clone());
                    merged.logs_updated_at = merged.logs_updated_at.or(existing.logs_updated_at);
                    merged.started_at = merged.started_at.or(existing.started_at);
                    merged
                }
                None => application.clone(),
            };

            state
                .applications
                .insert(application.team_id.clone(), merged);
            Ok(())
        }

        async fn delete(&self, team_id: &str) -> Result<(), Error> {
            let mut state = self.state.lock().unwrap();

            if !state.managed.contains(team_id) {
                state.applications.remove(team_id);
                return Ok(());
            }

            let Some(application) = state.applications.remove(team_id) else {
                return Err(Error::Internal(format!(
                    "no application data for team {team_id}, the state of the store is inconsistent"
                )));
            };

            state.managed.remove(team_id);
            state.subdomains.remove(&application.subdomain);
            Ok(())
        }
    }
}
