use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use crate::metrics::TASKS_EVICTED;
use crate::registry::TaskRegistry;
use crate::service::RobotService;
use crate::waiters::PoseWaiters;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub evicted_tasks: Vec<String>,
    pub swept_waiters: usize,
}

pub fn spawn_gc(svc: Arc<RobotService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(svc.config().gc_interval);
        loop {
            tick.tick().await;
            gc_tick(svc.registry(), svc.waiters(), svc.config().retention);
        }
    })
}

/// One sweep: evicts tasks older than `retention`, whatever their status,
/// and drops waiters nobody is listening on anymore.
pub fn gc_tick(registry: &TaskRegistry, waiters: &PoseWaiters, retention: Duration) -> GcReport {
    let evicted_tasks = registry.evict_older_than(retention);
    let swept_waiters = waiters.sweep();

    if !evicted_tasks.is_empty() {
        counter!(TASKS_EVICTED).increment(evicted_tasks.len() as u64);
        info!(
            evicted = evicted_tasks.len(),
            remaining = registry.len(),
            "GC evicted expired tasks"
        );
    }
    if swept_waiters > 0 {
        debug!(swept = swept_waiters, "GC dropped orphaned waiters");
    }

    GcReport {
        evicted_tasks,
        swept_waiters,
    }
}

#[cfg(test)]
mod tests {
    use robot_core::model::TaskStatus;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn evicted_task_is_not_found_afterwards() {
        let registry = TaskRegistry::new();
        let waiters = PoseWaiters::new();
        registry.create("old");
        registry.set_status("old", TaskStatus::Success).unwrap();

        let report = gc_tick(&registry, &waiters, Duration::from_secs(3600));
        assert_eq!(report, GcReport::default());

        tokio::time::advance(Duration::from_secs(3601)).await;
        registry.create("new");
        let report = gc_tick(&registry, &waiters, Duration::from_secs(3600));
        assert_eq!(report.evicted_tasks, vec!["old".to_string()]);
        assert!(registry.get("old").is_err());
        assert!(registry.get("new").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn running_tasks_are_evicted_too() {
        let registry = TaskRegistry::new();
        let waiters = PoseWaiters::new();
        registry.create("stuck");

        tokio::time::advance(Duration::from_secs(7200)).await;
        let report = gc_tick(&registry, &waiters, Duration::from_secs(3600));
        assert_eq!(report.evicted_tasks, vec!["stuck".to_string()]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn live_waiters_survive_the_sweep() {
        let registry = TaskRegistry::new();
        let waiters = PoseWaiters::new();
        let _live = waiters.register("cmd");

        let report = gc_tick(&registry, &waiters, Duration::from_secs(3600));
        assert_eq!(report.swept_waiters, 0);
        assert_eq!(waiters.len(), 1);
    }
}
