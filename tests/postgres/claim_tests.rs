//! Claims and takeovers against a real `PostgreSQL` server.

use super::helpers::{TestDatabase, test_database};
use chrono::{Duration, TimeZone, Utc};
use eyre::{Result, ensure};
use reelwright::bug::{adapters::postgres::PostgresBugRepository, services::BugTracker};
use reelwright::clock::ManualClock;
use reelwright::lock::{adapters::postgres::PostgresStageLockRepository, services::StageLockService};
use reelwright::pipeline::{
    adapters::postgres::PostgresQueueRepository,
    domain::{QueueStatus, Stage, TaskId},
    services::QueueManager,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 8, 10, 14, 0, 0)
            .single()
            .expect("valid timestamp"),
    ))
}

fn queue(db: &TestDatabase, clock: &Arc<ManualClock>) -> QueueManager<PostgresQueueRepository, ManualClock> {
    QueueManager::new(
        Arc::new(PostgresQueueRepository::new(db.pool.clone())),
        Arc::clone(clock),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_skip_locked_rows() -> Result<()> {
    let Some(db) = test_database()? else {
        return Ok(());
    };
    let clock = clock();
    let shared = queue(&db, &clock);
    for creator in 0..20 {
        shared.enqueue(&format!("creator-{creator}"), None).await?;
        clock.advance(Duration::milliseconds(5));
    }

    let mut handles = Vec::new();
    for pid in 300..306_u32 {
        let worker_queue = shared.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(entry) = worker_queue.dequeue(Stage::Script, pid).await? {
                claimed.push(entry.task_id().clone());
            }
            Ok::<_, eyre::Report>(claimed)
        }));
    }
    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await??);
    }

    let unique: BTreeSet<&TaskId> = all.iter().collect();
    ensure!(all.len() == 20);
    ensure!(unique.len() == 20);
    let counts = shared.summary().await?.stage(Stage::Script);
    ensure!(counts.processing == 20);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn claims_are_oldest_first_and_advance_rewrites_the_row() -> Result<()> {
    let Some(db) = test_database()? else {
        return Ok(());
    };
    let clock = clock();
    let manager = queue(&db, &clock);
    let first = manager.enqueue("creator-a", None).await?;
    clock.advance(Duration::seconds(1));
    manager.enqueue("creator-b", None).await?;

    let claimed = manager
        .dequeue(Stage::Script, 301)
        .await?
        .ok_or_else(|| eyre::eyre!("nothing to claim"))?;
    ensure!(claimed.task_id() == first.task_id());
    ensure!(claimed.worker_pid() == Some(301));

    manager.advance(first.task_id(), Stage::Script).await?;
    let row = manager.find(first.task_id()).await?.ok_or_else(|| eyre::eyre!("row missing"))?;
    ensure!(row.stage() == Stage::Image);
    ensure!(row.status() == QueueStatus::Waiting);
    ensure!(row.worker_pid().is_none());
    ensure!(manager.content_status(first.task_id()).await?.as_deref() == Some("image"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn abandoned_stage_lock_is_taken_over_after_the_timeout() -> Result<()> {
    let Some(db) = test_database()? else {
        return Ok(());
    };
    let clock = clock();
    let locks = StageLockService::new(
        Arc::new(PostgresStageLockRepository::new(db.pool.clone())),
        Arc::clone(&clock),
        Duration::hours(1),
    );
    let holder = TaskId::new("1786370400000_aaaaaaaa")?;
    let waiting = TaskId::new("1786370400000_bbbbbbbb")?;

    ensure!(locks.acquire(Stage::Video, &holder, 11).await?);
    ensure!(!locks.acquire(Stage::Video, &waiting, 12).await?);
    clock.advance(Duration::minutes(61));
    ensure!(locks.acquire(Stage::Video, &waiting, 12).await?);

    let lock = locks.find(Stage::Video).await?;
    ensure!(lock.is_held_by(&waiting));
    ensure!(!locks.release(Stage::Video, &holder).await?);
    ensure!(locks.release(Stage::Video, &waiting).await?);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn an_open_bug_is_claimed_by_one_agent() -> Result<()> {
    let Some(db) = test_database()? else {
        return Ok(());
    };
    let clock = clock();
    let bugs = BugTracker::new(
        Arc::new(PostgresBugRepository::new(db.pool.clone())),
        Arc::clone(&clock),
    );
    let reported = bugs.report("thumbnail upload rejected").await?;

    let mut handles = Vec::new();
    for (agent, pid) in [("agent-a", 401), ("agent-b", 402), ("agent-c", 403)] {
        let tracker = bugs.clone();
        handles.push(tokio::spawn(async move { tracker.claim_next(agent, pid).await }));
    }
    let mut winners = Vec::new();
    for handle in handles {
        if let Some(bug) = handle.await?? {
            winners.push(bug);
        }
    }

    ensure!(winners.len() == 1);
    let claimed = bugs.find(reported.id()).await?.ok_or_else(|| eyre::eyre!("bug missing"))?;
    ensure!(claimed.assigned_to() == winners.first().and_then(|bug| bug.assigned_to()));
    ensure!(claimed.worker_pid().is_some());
    ensure!(claimed.worker_pid() == winners.first().and_then(|bug| bug.worker_pid()));
    Ok(())
}
