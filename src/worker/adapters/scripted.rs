//! Generator that replays configured outcomes instead of running programs.
//!
//! Used by tests and local dry runs. Each stage has one [`ScriptedStep`];
//! stages without a step succeed silently.

use crate::pipeline::domain::{Stage, TaskId};
use crate::worker::{
    domain::{GeneratorOutput, OutputLine, OutputStream, StageJob},
    ports::{GeneratorError, OutputSender, StageGenerator},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Outcome replayed for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedStep {
    exit_code: Option<i32>,
    stdout: Vec<String>,
    stderr: Vec<String>,
    artifacts: Vec<(String, String)>,
    wait_for_cancel: bool,
}

impl ScriptedStep {
    /// A run that exits with status zero.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            exit_code: Some(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
            artifacts: Vec::new(),
            wait_for_cancel: false,
        }
    }

    /// A run that exits with `code`.
    #[must_use]
    pub const fn exit(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stdout: Vec::new(),
            stderr: Vec::new(),
            artifacts: Vec::new(),
            wait_for_cancel: false,
        }
    }

    /// A run that never finishes on its own and only returns once cancelled.
    #[must_use]
    pub fn until_cancelled() -> Self {
        Self {
            wait_for_cancel: true,
            ..Self::success()
        }
    }

    /// Adds a line written to standard output.
    #[must_use]
    pub fn with_stdout(mut self, line: impl Into<String>) -> Self {
        self.stdout.push(line.into());
        self
    }

    /// Adds a line written to standard error.
    #[must_use]
    pub fn with_stderr(mut self, line: impl Into<String>) -> Self {
        self.stderr.push(line.into());
        self
    }

    /// Adds a file written into the task directory before exiting.
    #[must_use]
    pub fn with_artifact(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.artifacts.push((name.into(), contents.into()));
        self
    }
}

/// Replays [`ScriptedStep`]s and records every job it was handed.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    steps: Mutex<BTreeMap<Stage, ScriptedStep>>,
    runs: Mutex<Vec<(TaskId, Stage)>>,
}

impl ScriptedGenerator {
    /// Creates a generator where every stage succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outcome of `stage`.
    #[must_use]
    pub fn with_step(self, stage: Stage, step: ScriptedStep) -> Self {
        self.set_step(stage, step);
        self
    }

    /// Replaces the outcome of `stage`.
    pub fn set_step(&self, stage: Stage, step: ScriptedStep) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stage, step);
    }

    /// Returns the jobs run so far, in order.
    #[must_use]
    pub fn runs(&self) -> Vec<(TaskId, Stage)> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn step_for(&self, stage: Stage) -> ScriptedStep {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&stage)
            .cloned()
            .unwrap_or_else(ScriptedStep::success)
    }
}

#[async_trait]
impl StageGenerator for ScriptedGenerator {
    async fn run(
        &self,
        job: &StageJob,
        output: OutputSender,
        cancel: CancellationToken,
    ) -> Result<GeneratorOutput, GeneratorError> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job.task_id.clone(), job.stage));
        let step = self.step_for(job.stage);

        tokio::fs::create_dir_all(&job.task_dir).await?;
        for (name, contents) in &step.artifacts {
            tokio::fs::write(job.task_dir.join(name), contents).await?;
        }

        let streams = [
            (OutputStream::Stdout, &step.stdout),
            (OutputStream::Stderr, &step.stderr),
        ];
        for (stream, lines) in streams {
            for line in lines {
                if output
                    .send(OutputLine {
                        stream,
                        text: line.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
        }

        if step.wait_for_cancel {
            cancel.cancelled().await;
            return Err(GeneratorError::Cancelled);
        }

        Ok(GeneratorOutput {
            exit_code: step.exit_code,
            stdout: join_lines(&step.stdout),
            stderr: join_lines(&step.stderr),
        })
    }
}

fn join_lines(lines: &[String]) -> String {
    lines.iter().map(|line| format!("{line}\n")).collect()
}
