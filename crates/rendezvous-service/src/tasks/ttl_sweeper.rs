//! TTL sweeper background task.
//!
//! Groups are not torn down by their creators; they simply stop being
//! refreshed. The sweeper evicts every group whose `last_updated` is older
//! than the configured TTL.
//!
//! Sweeps are gated by a "next eligible sweep time": a sweep requested before
//! that time is a no-op. A group can therefore outlive its TTL by at most one
//! heartbeat, but never indefinitely.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the token
//! is cancelled, the task completes its current iteration and exits cleanly.

use crate::models::Group;
use crate::observability::metrics;
use crate::repositories::GroupRepository;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Evicts groups that exceeded their time-to-live.
#[derive(Debug)]
pub struct TtlSweeper {
    repo: Arc<GroupRepository>,
    ttl: Duration,
    heartbeat: Duration,
    /// Unix timestamp (seconds) before which `sweep` does nothing.
    next_sweep_at: Mutex<i64>,
}

impl TtlSweeper {
    /// Create a sweeper. The first call to `sweep` is always eligible.
    pub fn new(repo: Arc<GroupRepository>, ttl: Duration, heartbeat: Duration) -> Self {
        Self {
            repo,
            ttl,
            heartbeat,
            next_sweep_at: Mutex::new(i64::MIN),
        }
    }

    /// Group time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Interval between sweeps.
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Run one sweep at `now` (unix seconds).
    ///
    /// Returns `None` when the sweep is gated, otherwise the evicted groups.
    pub fn sweep(&self, now: i64) -> Option<Vec<Group>> {
        {
            let mut next = self.next_sweep_at.lock();
            if now < *next {
                return None;
            }
            // Ticks run on the monotonic clock while `now` is truncated wall
            // clock seconds, so a tick can read one second short of a full
            // heartbeat.
            *next = now.saturating_add(duration_secs(self.heartbeat).saturating_sub(1));
        }

        let evicted = self.repo.evict_expired(duration_secs(self.ttl), now);

        for group in &evicted {
            debug!(
                target: "rendezvous.task.ttl_sweeper",
                group_id = %group.id,
                group_name = %group.name,
                app_id = %group.app_id,
                "Deleted group, TTL exceeded"
            );
        }

        if !evicted.is_empty() {
            metrics::record_groups_evicted(evicted.len());
            info!(
                target: "rendezvous.task.ttl_sweeper",
                evicted_count = evicted.len(),
                "Evicted expired groups"
            );
        }

        Some(evicted)
    }
}

fn duration_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Start the TTL sweeper background task.
///
/// Ticks once per heartbeat and sweeps with the current wall clock.
///
/// # Returns
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "rendezvous.task.ttl_sweeper")]
pub async fn start_ttl_sweeper(sweeper: Arc<TtlSweeper>, cancel_token: CancellationToken) {
    info!(
        target: "rendezvous.task.ttl_sweeper",
        ttl_seconds = sweeper.ttl.as_secs(),
        heartbeat_seconds = sweeper.heartbeat.as_secs(),
        "Starting TTL sweeper task"
    );

    let mut interval = tokio::time::interval(sweeper.heartbeat);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweeper.sweep(Utc::now().timestamp());
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rendezvous.task.ttl_sweeper",
                    "TTL sweeper task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(
        target: "rendezvous.task.ttl_sweeper",
        "TTL sweeper task stopped"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);
    const HEARTBEAT: Duration = Duration::from_secs(60);

    fn sweeper_with_repo() -> (Arc<GroupRepository>, TtlSweeper) {
        let repo = Arc::new(GroupRepository::new());
        let sweeper = TtlSweeper::new(Arc::clone(&repo), TTL, HEARTBEAT);
        (repo, sweeper)
    }

    #[test]
    fn test_sweep_evicts_stale_and_keeps_fresh() {
        let (repo, sweeper) = sweeper_with_repo();
        let now = 1_000_000;

        let stale = repo
            .set_at(Group::new("stale", "app", vec![]), now - 700)
            .unwrap();
        let fresh = repo
            .set_at(Group::new("fresh", "app", vec![]), now - 500)
            .unwrap();

        let evicted = sweeper.sweep(now).expect("first sweep is never gated");

        assert_eq!(evicted.len(), 1);
        assert!(repo.get(&stale).is_err());
        assert!(repo.get(&fresh).is_ok());
        assert!(!repo.get_all().contains_key(&stale));
    }

    #[test]
    fn test_sweep_is_gated_until_next_heartbeat() {
        let (repo, sweeper) = sweeper_with_repo();
        let now = 1_000_000;

        assert!(sweeper.sweep(now).is_some());

        // Becomes stale after the first sweep, but the gate holds it back.
        repo.set_at(Group::new("late", "app", vec![]), now - 700)
            .unwrap();
        assert!(sweeper.sweep(now + 30).is_none());
        assert_eq!(repo.len(), 1);

        let evicted = sweeper.sweep(now + 60).expect("heartbeat elapsed");
        assert_eq!(evicted.len(), 1);
        assert!(repo.is_empty());
    }

    #[test]
    fn test_tick_one_second_short_still_sweeps() {
        let (repo, sweeper) = sweeper_with_repo();
        let now = 1_000_000;

        assert!(sweeper.sweep(now).is_some());

        repo.set_at(Group::new("late", "app", vec![]), now - 700)
            .unwrap();
        let evicted = sweeper
            .sweep(now + 59)
            .expect("next tick landing early on the wall clock is not skipped");

        assert_eq!(evicted.len(), 1);
        assert!(sweeper.sweep(now + 60).is_none());
    }

    #[test]
    fn test_refreshed_group_survives() {
        let (repo, sweeper) = sweeper_with_repo();
        let now = 1_000_000;

        let id = repo
            .set_at(Group::new("g", "app", vec![]), now - 700)
            .unwrap();
        let mut refresh = repo.get(&id).unwrap();
        refresh.name = "refreshed".to_string();
        repo.set_at(refresh, now - 10).unwrap();

        let evicted = sweeper.sweep(now).unwrap();

        assert!(evicted.is_empty());
        assert_eq!(repo.get(&id).unwrap().name, "refreshed");
    }

    #[tokio::test]
    async fn test_task_sweeps_on_first_tick() {
        let (repo, sweeper) = sweeper_with_repo();
        let stale = repo
            .set_at(
                Group::new("stale", "app", vec![]),
                Utc::now().timestamp() - 700,
            )
            .unwrap();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(start_ttl_sweeper(Arc::new(sweeper), cancel_token.clone()));

        // The first interval tick completes immediately.
        let mut evicted = false;
        for _ in 0..50 {
            if repo.get(&stale).is_err() {
                evicted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(evicted, "stale group should be evicted by the first tick");

        cancel_token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "Sweeper should stop after cancellation");
        result.unwrap().expect("Task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_token_stops_task() {
        let (_repo, sweeper) = sweeper_with_repo();
        let parent = CancellationToken::new();
        let child = parent.child_token();

        let handle = tokio::spawn(start_ttl_sweeper(Arc::new(sweeper), child));

        tokio::time::advance(Duration::from_secs(300)).await;
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Sweeper should stop when the parent token is cancelled")
            .expect("Task should not panic");
    }
}
