//! Run-scoped identifiers shared by the relay components.

use std::sync::{PoisonError, RwLock};

/// Identifiers of the CI run being reported and of the test currently
/// executing in it.
///
/// The host constructs one `RunContext` per run and shares it (by `Arc`) with
/// the publish gate and the screenshot uploader. The run id is fixed at
/// construction; the current test id changes as tests start and finish.
#[derive(Debug)]
pub struct RunContext {
    run_id: String,
    current_test: RwLock<Option<String>>,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            current_test: RwLock::new(None),
        }
    }

    /// The CI run id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Routing key for every message published during this run.
    pub fn routing_key(&self) -> &str {
        &self.run_id
    }

    /// Marks a new test as active and returns its freshly generated CI test id.
    pub fn start_test(&self) -> String {
        let test_id = uuid::Uuid::new_v4().to_string();
        self.set_current_test(Some(test_id.clone()));
        test_id
    }

    /// Sets (or clears) the active CI test id.
    pub fn set_current_test(&self, test_id: Option<String>) {
        let mut guard = self
            .current_test
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = test_id;
    }

    /// Clears the active test.
    pub fn finish_test(&self) {
        self.set_current_test(None);
    }

    /// The active CI test id, if a test is running.
    pub fn current_test_id(&self) -> Option<String> {
        self.current_test
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Correlation id for a message published right now:
    /// `{run_id}_{test_id}` while a test is active, the run id otherwise.
    pub fn correlation_id(&self) -> String {
        match self.current_test_id() {
            Some(test_id) => format!("{}_{}", self.run_id, test_id),
            None => self.run_id.clone(),
        }
    }
}
