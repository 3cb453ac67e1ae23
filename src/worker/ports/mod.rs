//! Port contracts for stage generators.

use crate::pipeline::domain::Stage;
use crate::worker::domain::{GeneratorOutput, OutputLine, StageJob};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Channel on which generators publish output lines as they arrive.
pub type OutputSender = UnboundedSender<OutputLine>;

/// An external content generator for one or more stages.
#[async_trait]
pub trait StageGenerator: Send + Sync {
    /// Runs the generator for `job`, streaming output lines to `output`.
    ///
    /// A non-zero exit is reported through [`GeneratorOutput`], not as an
    /// error. When `cancel` fires the generator stops its process and
    /// returns [`GeneratorError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns [`GeneratorError`] when the process cannot be started or
    /// observed, or when the run was cancelled.
    async fn run(
        &self,
        job: &StageJob,
        output: OutputSender,
        cancel: CancellationToken,
    ) -> Result<GeneratorOutput, GeneratorError>;
}

/// Errors raised by generator implementations.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// No command is configured for the stage.
    #[error("no generator configured for stage {0}")]
    NotConfigured(Stage),

    /// An argument template failed to render.
    #[error("failed to render generator arguments for stage {stage}: {reason}")]
    Template {
        /// Stage whose template failed.
        stage: Stage,
        /// Render error text.
        reason: String,
    },

    /// The process could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process or preparing its directory failed.
    #[error("generator I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled by worker shutdown.
    #[error("generator run cancelled")]
    Cancelled,
}
