//! When steps for pipeline BDD scenarios.

use super::world::{PipelineWorld, PollSnapshot, run_async};
use eyre::WrapErr;
use reelwright::pipeline::domain::Stage;
use reelwright::worker::services::PollOutcome;
use rstest_bdd_macros::when;
use tokio_util::sync::CancellationToken;

fn poll(world: &mut PipelineWorld, stage: Stage) -> Result<PollOutcome, eyre::Report> {
    let worker = world.worker(stage);
    let outcome = run_async(worker.poll_once(&CancellationToken::new()))
        .wrap_err_with(|| format!("poll the {stage} worker"))?;
    world.last_outcome = Some(outcome.clone());
    Ok(outcome)
}

#[when(r#"the "{stage}" worker polls once"#)]
fn worker_polls_once(world: &mut PipelineWorld, stage: String) -> Result<(), eyre::Report> {
    let parsed = Stage::try_from(stage.as_str())
        .map_err(|err| eyre::eyre!("invalid stage in scenario: {err}"))?;
    poll(world, parsed)?;
    Ok(())
}

#[when("each stage worker polls once in pipeline order")]
fn each_stage_polls_once(world: &mut PipelineWorld) -> Result<(), eyre::Report> {
    for stage in Stage::ALL {
        let outcome = poll(world, stage)?;
        let PollOutcome::Advanced { task_id, .. } = outcome else {
            return Err(eyre::eyre!("the {stage} worker did not advance: {outcome:?}"));
        };
        let row = run_async(world.queue.find(&task_id))?
            .ok_or_else(|| eyre::eyre!("queue row of {task_id} missing after the {stage} poll"))?;
        world.trail.push(PollSnapshot {
            task_id,
            stage: row.stage(),
            status: row.status(),
        });
    }
    Ok(())
}
