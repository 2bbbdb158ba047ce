mod delete;
mod deploy;
mod resume;

pub use delete::{delete_all_applications, delete_application, DeleteAllReport};
pub use deploy::deploy_application;
pub use resume::resume_stopped_containers;

use crate::application::Application;
use crate::error::Error;

/// Terminal result of a background task, recorded into the job metadata so
/// callbacks and polling clients can observe the outcome.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub application: Option<Application>,
    pub error: Option<String>,
    pub status_code: u16,
}

impl TaskOutcome {
    pub fn success(application: Option<Application>) -> Self {
        Self {
            application,
            error: None,
            status_code: 200,
        }
    }

    pub fn from_error(error: &Error) -> Self {
        Self {
            application: None,
            error: Some(error.to_string()),
            status_code: error.status_code().as_u16(),
        }
    }

    /// The outcome message stored in the job metadata: `success` on a 2xx
    /// outcome, otherwise the error message (when one exists).
    pub fn status_message(&self) -> Option<String> {
        if self.status_code < 400 {
            Some("success".to_string())
        } else {
            self.error.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_outcomes_report_success() {
        let outcome = TaskOutcome::success(None);
        assert_eq!(outcome.status_code, 200);
        assert_eq!(outcome.status_message().as_deref(), Some("success"));
    }

    #[test]
    fn failed_outcomes_report_the_error() {
        let outcome = TaskOutcome::from_error(&Error::NotFound("42".to_string()));
        assert_eq!(outcome.status_code, 404);
        assert_eq!(
            outcome.status_message().as_deref(),
            Some("No application found for team 42")
        );
    }

    #[test]
    fn errorless_failures_have_no_message() {
        let outcome = TaskOutcome {
            application: None,
            error: None,
            status_code: 500,
        };
        assert_eq!(outcome.status_message(), None);
    }
}
