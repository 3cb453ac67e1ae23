//! Launches agents as detached external programs.

use crate::bug::domain::BugRecord;
use crate::recovery::ports::{LaunchError, LaunchedWorker, WorkerLauncher};
use async_trait::async_trait;
use camino::Utf8PathBuf;
use minijinja::{Environment, UndefinedBehavior, context};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::debug;

/// Runs `program` with argument templates referencing `{{ bug_id }}` and
/// `{{ title }}`.
///
/// The child is not killed when the pool stops; it marks its own bug as
/// resolved or failed when done.
pub struct CommandLauncher {
    kind: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<Utf8PathBuf>,
    environment: Environment<'static>,
}

impl CommandLauncher {
    /// Creates a launcher of `kind`.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        program: impl Into<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut environment = Environment::new();
        environment.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            kind: kind.into(),
            program: program.into(),
            args: args.into_iter().collect(),
            working_dir: None,
            environment,
        }
    }

    /// Runs agents from `dir` instead of the pool's working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn render_args(&self, bug: &BugRecord) -> Result<Vec<String>, LaunchError> {
        let ctx = context! {
            bug_id => bug.id().value(),
            title => bug.title(),
        };
        self.args
            .iter()
            .map(|template| {
                self.environment
                    .render_str(template, &ctx)
                    .map_err(|err| LaunchError::Template(err.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn launch(&self, bug: &BugRecord) -> Result<LaunchedWorker, LaunchError> {
        let args = self.render_args(bug)?;
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id().ok_or(LaunchError::MissingPid)?;

        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            let code = child.wait().await.ok().and_then(|status| status.code());
            debug!(pid, exit_code = ?code, "agent process exited");
            if sender.send(code).is_err() {
                debug!(pid, "agent exit observed after the pool stopped tracking it");
            }
        });

        Ok(LaunchedWorker {
            pid,
            exit: Some(receiver),
        })
    }
}
