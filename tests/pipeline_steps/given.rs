//! Given steps for pipeline BDD scenarios.

use super::world::{PipelineWorld, run_async};
use eyre::WrapErr;
use reelwright::pipeline::domain::{Stage, TaskId};
use reelwright::worker::adapters::ScriptedStep;
use rstest_bdd_macros::given;

const OTHER_WORKER_PID: u32 = 9191;

#[given(r#"a task queued by "{user_id}""#)]
fn task_queued(world: &mut PipelineWorld, user_id: String) -> Result<(), eyre::Report> {
    let entry = run_async(world.queue.enqueue(&user_id, None)).wrap_err("enqueue task")?;
    world.task_id = Some(entry.task_id().clone());
    Ok(())
}

#[given("every stage generator succeeds")]
fn every_stage_succeeds(world: &mut PipelineWorld) {
    for stage in Stage::ALL {
        world
            .generator
            .set_step(stage, ScriptedStep::success().with_stdout(format!("{stage} done")));
    }
}

#[given(r#"the "{stage}" generator exits with code {code:i32} saying "{message}""#)]
fn generator_exits(
    world: &mut PipelineWorld,
    stage: String,
    code: i32,
    message: String,
) -> Result<(), eyre::Report> {
    let parsed = Stage::try_from(stage.as_str())
        .map_err(|err| eyre::eyre!("invalid stage in scenario: {err}"))?;
    world
        .generator
        .set_step(parsed, ScriptedStep::exit(code).with_stderr(message));
    Ok(())
}

#[given(r#"the "{stage}" lock is held by another task"#)]
fn lock_held_by_another_task(world: &mut PipelineWorld, stage: String) -> Result<(), eyre::Report> {
    let parsed = Stage::try_from(stage.as_str())
        .map_err(|err| eyre::eyre!("invalid stage in scenario: {err}"))?;
    let holder = TaskId::new("1767225600000_0ddba11")?;
    let acquired = run_async(world.locks.acquire(parsed, &holder, OTHER_WORKER_PID))
        .wrap_err("acquire stage lock for another task")?;
    if !acquired {
        return Err(eyre::eyre!("the {parsed} lock was already held"));
    }
    Ok(())
}
