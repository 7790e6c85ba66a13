//! Executor contract - one state machine per submitted experiment.

use async_trait::async_trait;
use benchtop_core::{ExecutionError, ExperimentDefinition};
use benchtop_storage::Session;

/// Drives the execution of one submitted experiment.
///
/// The scheduler owns the executor from admission until a terminal outcome
/// and calls it with a freshly acquired session every time.
#[async_trait]
pub trait ExperimentExecutor: Send {
    /// Definition this executor was created from.
    fn definition(&self) -> &ExperimentDefinition;

    /// Prepare and start the experiment.
    async fn start(&mut self, session: &Session) -> Result<(), ExecutionError>;

    /// Advance the experiment. Returns `true` once it has completed.
    async fn progress(&mut self, session: &Session) -> Result<bool, ExecutionError>;

    /// Stop the experiment cooperatively.
    async fn cancel(&mut self, session: &Session) -> Result<(), ExecutionError>;
}

/// Builds executors for submitted definitions.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    /// Create an executor that has not been started yet.
    async fn create(
        &self,
        definition: ExperimentDefinition,
    ) -> Result<Box<dyn ExperimentExecutor>, ExecutionError>;
}
