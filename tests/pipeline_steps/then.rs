//! Then steps for pipeline BDD scenarios.

use super::world::{PipelineWorld, run_async};
use reelwright::pipeline::domain::{QueueStatus, Stage, TaskId};
use reelwright::worker::services::PollOutcome;
use rstest_bdd_macros::then;

#[then(r#"the task is "{status}" at stage "{stage}""#)]
fn task_is_at(world: &PipelineWorld, status: String, stage: String) -> Result<(), eyre::Report> {
    let expected_status = QueueStatus::try_from(status.as_str())
        .map_err(|err| eyre::eyre!("invalid status in scenario: {err}"))?;
    let expected_stage = Stage::try_from(stage.as_str())
        .map_err(|err| eyre::eyre!("invalid stage in scenario: {err}"))?;
    let task_id = world.task()?;
    let row = run_async(world.queue.find(task_id))?
        .ok_or_else(|| eyre::eyre!("queue row of {task_id} missing"))?;

    if row.status() != expected_status || row.stage() != expected_stage {
        return Err(eyre::eyre!(
            "expected {expected_status:?} at {expected_stage}, found {:?} at {}",
            row.status(),
            row.stage()
        ));
    }
    Ok(())
}

#[then(r#"the content status is "{status}""#)]
fn content_status_is(world: &PipelineWorld, status: String) -> Result<(), eyre::Report> {
    let found = run_async(world.queue.content_status(world.task()?))?;
    if found.as_deref() != Some(status.as_str()) {
        return Err(eyre::eyre!("expected content status {status}, found {found:?}"));
    }
    Ok(())
}

#[then(r#"the recorded error is "{message}""#)]
fn recorded_error_is(world: &PipelineWorld, message: String) -> Result<(), eyre::Report> {
    let task_id = world.task()?;
    let row = run_async(world.queue.find(task_id))?
        .ok_or_else(|| eyre::eyre!("queue row of {task_id} missing"))?;
    if row.error() != Some(message.as_str()) {
        return Err(eyre::eyre!("expected error {message:?}, found {:?}", row.error()));
    }
    Ok(())
}

#[then("no stage lock is held")]
fn no_stage_lock_held(world: &PipelineWorld) -> Result<(), eyre::Report> {
    let locks = run_async(world.locks.list())?;
    if let Some(held) = locks.iter().find(|lock| lock.holder().is_some()) {
        return Err(eyre::eyre!("stage lock still held: {held:?}"));
    }
    Ok(())
}

#[then(r#"the "{stage}" log mentions "{text}""#)]
fn stage_log_mentions(world: &PipelineWorld, stage: String, text: String) -> Result<(), eyre::Report> {
    let parsed = Stage::try_from(stage.as_str())
        .map_err(|err| eyre::eyre!("invalid stage in scenario: {err}"))?;
    let path = world
        .root
        .join(world.task()?.as_str())
        .join(parsed.log_file_name());
    let contents = std::fs::read_to_string(&path)
        .map_err(|err| eyre::eyre!("failed to read {path}: {err}"))?;
    if !contents.contains(&text) {
        return Err(eyre::eyre!("{path} does not mention {text:?}:\n{contents}"));
    }
    Ok(())
}

#[then("the last poll was idle")]
fn last_poll_idle(world: &PipelineWorld) -> Result<(), eyre::Report> {
    match &world.last_outcome {
        Some(PollOutcome::Idle) => Ok(()),
        other => Err(eyre::eyre!("expected an idle poll, found {other:?}")),
    }
}

#[then("the last poll found the lock busy")]
fn last_poll_lock_busy(world: &PipelineWorld) -> Result<(), eyre::Report> {
    let task_id = world.task()?;
    match &world.last_outcome {
        Some(PollOutcome::LockBusy(busy)) if busy == task_id => Ok(()),
        other => Err(eyre::eyre!("expected a busy lock for {task_id}, found {other:?}")),
    }
}

#[then("the generators ran {count:u64} times")]
fn generators_ran(world: &PipelineWorld, count: u64) -> Result<(), eyre::Report> {
    let runs = world.generator.runs();
    if u64::try_from(runs.len())? != count {
        return Err(eyre::eyre!("expected {count} generator runs, found {runs:?}"));
    }
    Ok(())
}

#[then(r#"between polls the task was waiting at "{stages}""#)]
fn waiting_between_polls(world: &PipelineWorld, stages: String) -> Result<(), eyre::Report> {
    let task_id = world.task()?;
    let expected = stages
        .split(',')
        .map(|name| {
            Stage::try_from(name.trim())
                .map_err(|err| eyre::eyre!("invalid stage in scenario: {err}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let waiting: Vec<Stage> = world
        .trail
        .iter()
        .filter(|snapshot| snapshot.status == QueueStatus::Waiting)
        .map(|snapshot| snapshot.stage)
        .collect();
    if waiting != expected {
        return Err(eyre::eyre!("expected waiting at {expected:?}, trail was {:?}", world.trail));
    }
    if let Some(other) = world.trail.iter().find(|snapshot| &snapshot.task_id != task_id) {
        return Err(eyre::eyre!("poll reported {} instead of {task_id}", other.task_id));
    }
    Ok(())
}

#[then("every stage claimed the task exactly once")]
fn every_stage_claimed_once(world: &PipelineWorld) -> Result<(), eyre::Report> {
    let task_id = world.task()?;
    let expected: Vec<(TaskId, Stage)> = Stage::ALL
        .into_iter()
        .map(|stage| (task_id.clone(), stage))
        .collect();
    let runs = world.generator.runs();
    if runs != expected {
        return Err(eyre::eyre!("expected one run per stage for {task_id}, found {runs:?}"));
    }
    if world.trail.len() != Stage::ALL.len() {
        return Err(eyre::eyre!("expected {} claims, found {:?}", Stage::ALL.len(), world.trail));
    }
    Ok(())
}
