//! Domain types shared by stage workers and generators.

use crate::pipeline::domain::{Stage, TaskId, UserId};
use camino::Utf8PathBuf;

/// Maximum number of trailing output lines kept in a failure message.
pub const FAILURE_TAIL_LINES: usize = 20;

/// One unit of work handed to a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    /// Task being processed.
    pub task_id: TaskId,
    /// Submitting user, when the task record was found.
    pub user_id: Option<UserId>,
    /// Stage being executed.
    pub stage: Stage,
    /// Artifact directory of the task; the generator's working directory.
    pub task_dir: Utf8PathBuf,
}

/// Stream a captured output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// A single line of generator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Originating stream.
    pub stream: OutputStream,
    /// Line text without the trailing newline.
    pub text: String,
}

/// Result of a finished generator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratorOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Last [`FAILURE_TAIL_LINES`] lines of standard output.
    pub stdout: String,
    /// Last [`FAILURE_TAIL_LINES`] lines of standard error.
    pub stderr: String,
}

impl GeneratorOutput {
    /// Returns whether the generator exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Builds the error message recorded on the queue row for a failed run.
    ///
    /// Uses the tail of stderr, falling back to the tail of stdout when
    /// stderr is empty.
    #[must_use]
    pub fn failure_message(&self) -> String {
        let status = self.exit_code.map_or_else(
            || "terminated by signal".to_owned(),
            |code| format!("exit code {code}"),
        );
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let tail = tail_lines(source, FAILURE_TAIL_LINES);
        if tail.is_empty() {
            status
        } else {
            format!("{status}: {tail}")
        }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(count);
    lines.get(start..).unwrap_or_default().join("\n")
}
