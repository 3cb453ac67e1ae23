//! Claim uniqueness and stage lock exclusivity under concurrent workers.

use super::helpers::{Stack, stack};
use eyre::{Result, ensure};
use reelwright::lock::services::LockedRun;
use reelwright::pipeline::domain::{QueueStatus, Stage, TaskId};
use rstest::rstest;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const TASKS: usize = 40;
const WORKERS: u32 = 8;

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dequeues_hand_out_each_row_once(stack: Stack) -> Result<()> {
    for creator in 0..TASKS {
        stack.queue.enqueue(&format!("creator-{creator}"), None).await?;
    }

    let mut handles = Vec::new();
    for pid in 100..100 + WORKERS {
        let queue = stack.queue.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(entry) = queue.dequeue(Stage::Script, pid).await? {
                ensure!(entry.worker_pid() == Some(pid), "claim recorded without its owner");
                claimed.push(entry.task_id().clone());
                tokio::task::yield_now().await;
            }
            Ok::<_, eyre::Report>(claimed)
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await??);
    }
    let unique: BTreeSet<&TaskId> = all.iter().collect();
    ensure!(all.len() == TASKS, "expected {TASKS} claims, got {}", all.len());
    ensure!(unique.len() == TASKS, "a row was claimed twice");
    ensure!(stack.queue_repo.row_count()? == TASKS);
    let counts = stack.queue.summary().await?.stage(Stage::Script);
    ensure!(counts.processing == u64::try_from(TASKS)? && counts.waiting == 0);
    ensure!(stack.queue.dequeue(Stage::Script, 1).await?.is_none());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_advances_move_a_row_once(stack: Stack) -> Result<()> {
    stack.queue.enqueue("creator", None).await?;
    let claimed = stack
        .queue
        .dequeue(Stage::Script, 100)
        .await?
        .ok_or_else(|| eyre::eyre!("nothing to claim"))?;
    let task_id = claimed.task_id().clone();

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let queue = stack.queue.clone();
        let id = task_id.clone();
        handles.push(tokio::spawn(async move {
            queue.advance(&id, Stage::Script).await
        }));
    }
    let mut moved = 0;
    for handle in handles {
        if handle.await??.is_some() {
            moved += 1;
        }
    }

    ensure!(moved == 1, "advance applied {moved} times");
    let row = stack
        .queue
        .find(&task_id)
        .await?
        .ok_or_else(|| eyre::eyre!("row missing"))?;
    ensure!(row.stage() == Stage::Image && row.status() == QueueStatus::Waiting);
    ensure!(stack.queue_repo.row_count()? == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stage_lock_admits_one_run_at_a_time(stack: Stack) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for pid in 200..200 + WORKERS {
        let locks = stack.locks.clone();
        let task_id = TaskId::new(format!("1767225600000_lock{pid}"))?;
        let running = Arc::clone(&active);
        let highest = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            loop {
                let now_running = Arc::clone(&running);
                let now_highest = Arc::clone(&highest);
                let work = async move {
                    let current = now_running.fetch_add(1, Ordering::SeqCst) + 1;
                    now_highest.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    now_running.fetch_sub(1, Ordering::SeqCst);
                };
                match locks.run_exclusive(Stage::Video, &task_id, pid, work).await? {
                    LockedRun::Completed(()) => return Ok::<_, eyre::Report>(()),
                    LockedRun::Busy => tokio::task::yield_now().await,
                }
            }
        }));
    }
    for handle in handles {
        handle.await??;
    }

    ensure!(peak.load(Ordering::SeqCst) == 1, "lock admitted concurrent runs");
    ensure!(stack.locks.find(Stage::Video).await?.holder().is_none());
    Ok(())
}
