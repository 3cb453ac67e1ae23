//! Generator that runs a configured external program per stage.

use crate::pipeline::domain::Stage;
use crate::worker::{
    domain::{FAILURE_TAIL_LINES, GeneratorOutput, OutputLine, OutputStream, StageJob},
    ports::{GeneratorError, OutputSender, StageGenerator},
};
use async_trait::async_trait;
use minijinja::{Environment, UndefinedBehavior, context};
use std::collections::{BTreeMap, VecDeque};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long output pipes may stay open after the generator exits.
///
/// A detached grandchild that inherited the pipes can hold them open
/// indefinitely; its output past this point is dropped.
pub const DEFAULT_OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Program and argument templates for one stage.
///
/// Arguments may reference `{{ task_id }}`, `{{ task_dir }}`, `{{ stage }}`
/// and `{{ user_id }}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorCommand {
    /// Executable to run.
    pub program: String,
    /// Argument templates.
    pub args: Vec<String>,
}

impl GeneratorCommand {
    /// Creates a command from a program and argument templates.
    #[must_use]
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }
}

/// Runs per-stage external programs with the task directory as working
/// directory.
pub struct SubprocessGenerator {
    commands: BTreeMap<Stage, GeneratorCommand>,
    environment: Environment<'static>,
    output_grace: Duration,
}

impl SubprocessGenerator {
    /// Creates a generator from per-stage commands.
    #[must_use]
    pub fn new(commands: impl IntoIterator<Item = (Stage, GeneratorCommand)>) -> Self {
        let mut environment = Environment::new();
        environment.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            commands: commands.into_iter().collect(),
            environment,
            output_grace: DEFAULT_OUTPUT_GRACE,
        }
    }

    /// Overrides how long output is drained after the generator exits.
    #[must_use]
    pub const fn with_output_grace(mut self, grace: Duration) -> Self {
        self.output_grace = grace;
        self
    }

    fn render_args(
        &self,
        job: &StageJob,
        command: &GeneratorCommand,
    ) -> Result<Vec<String>, GeneratorError> {
        let ctx = context! {
            task_id => job.task_id.as_str(),
            task_dir => job.task_dir.as_str(),
            stage => job.stage.as_str(),
            user_id => job.user_id.as_ref().map(|user| user.as_str().to_owned()).unwrap_or_default(),
        };
        command
            .args
            .iter()
            .map(|template| {
                self.environment
                    .render_str(template, &ctx)
                    .map_err(|error| GeneratorError::Template {
                        stage: job.stage,
                        reason: error.to_string(),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl StageGenerator for SubprocessGenerator {
    async fn run(
        &self,
        job: &StageJob,
        output: OutputSender,
        cancel: CancellationToken,
    ) -> Result<GeneratorOutput, GeneratorError> {
        let command = self
            .commands
            .get(&job.stage)
            .ok_or(GeneratorError::NotConfigured(job.stage))?;
        let args = self.render_args(job, command)?;
        tokio::fs::create_dir_all(&job.task_dir).await?;

        let mut child = Command::new(&command.program)
            .args(&args)
            .current_dir(&job.task_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GeneratorError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        info!(
            task_id = %job.task_id,
            stage = %job.stage,
            program = %command.program,
            pid = child.id(),
            "generator started"
        );

        let stdout = child
            .stdout
            .take()
            .map(|pipe| StreamReader::spawn(pipe, OutputStream::Stdout, output.clone()));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| StreamReader::spawn(pipe, OutputStream::Stderr, output.clone()));
        drop(output);

        let status = tokio::select! {
            exit = child.wait() => exit?,
            () = cancel.cancelled() => {
                warn!(task_id = %job.task_id, stage = %job.stage, "killing generator on shutdown");
                if let Err(err) = child.kill().await {
                    warn!(task_id = %job.task_id, error = %err, "failed to kill generator");
                }
                return Err(GeneratorError::Cancelled);
            }
        };

        let deadline = Instant::now() + self.output_grace;
        let result = GeneratorOutput {
            exit_code: status.code(),
            stdout: StreamReader::finish(stdout, deadline).await,
            stderr: StreamReader::finish(stderr, deadline).await,
        };
        debug!(task_id = %job.task_id, stage = %job.stage, exit_code = ?result.exit_code, "generator exited");
        Ok(result)
    }
}

type SharedTail = Arc<Mutex<VecDeque<String>>>;

/// Background reader of one output pipe.
///
/// Keeps the last [`FAILURE_TAIL_LINES`] lines. The reader task is aborted
/// when the value is dropped, so an abandoned pipe never outlives the run.
struct StreamReader {
    handle: JoinHandle<()>,
    tail: SharedTail,
}

impl StreamReader {
    /// Reads `pipe` line by line, forwarding each line. Invalid UTF-8 is
    /// replaced rather than ending the stream, and a final line without a
    /// newline is still delivered.
    fn spawn<R>(pipe: R, stream: OutputStream, output: OutputSender) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tail: SharedTail = Arc::new(Mutex::new(VecDeque::with_capacity(FAILURE_TAIL_LINES)));
        let captured = Arc::clone(&tail);
        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(pipe);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buffer);
                        let line = text.trim_end_matches(['\r', '\n']).to_owned();
                        push_bounded(&captured, line.clone());
                        // The receiver may already be gone; capture continues regardless.
                        if output.send(OutputLine { stream, text: line }).is_err() {
                            continue;
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "generator output stream closed");
                        break;
                    }
                }
            }
        });
        Self { handle, tail }
    }

    /// Waits for end of stream until `deadline`, then returns the kept lines.
    async fn finish(reader: Option<Self>, deadline: Instant) -> String {
        let Some(mut reader) = reader else {
            return String::new();
        };
        if tokio::time::timeout_at(deadline, &mut reader.handle)
            .await
            .is_err()
        {
            debug!("generator output still open after exit, detaching");
        }
        let tail = reader.tail.lock().unwrap_or_else(PoisonError::into_inner);
        tail.iter().fold(String::new(), |mut text, line| {
            text.push_str(line);
            text.push('\n');
            text
        })
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn push_bounded(tail: &SharedTail, line: String) {
    let mut lines = tail.lock().unwrap_or_else(PoisonError::into_inner);
    if lines.len() == FAILURE_TAIL_LINES {
        lines.pop_front();
    }
    lines.push_back(line);
}
