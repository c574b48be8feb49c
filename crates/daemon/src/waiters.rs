//! Pose-wait broker: callers blocked until the actuator reaches the target
//! pose.
//!
//! Each waiter is a oneshot sender in a shared set. Registration, removal and
//! resolution all happen under one mutex, so a convergent event resolves
//! exactly the waiters registered before it and each of them exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use robot_core::model::TelemetryEvent;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::ServiceError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("pose not reached within {0:?}")]
    Timeout(Duration),
    #[error("pose wait cancelled")]
    Cancelled,
}

impl From<WaitError> for ServiceError {
    fn from(value: WaitError) -> Self {
        match value {
            WaitError::Timeout(timeout) => Self::PoseTimeout(timeout),
            WaitError::Cancelled => Self::WaitCancelled,
        }
    }
}

#[derive(Debug)]
struct Pending {
    cmd_id: String,
    tx: oneshot::Sender<TelemetryEvent>,
}

#[derive(Debug, Default)]
struct WaiterSet {
    next_id: u64,
    pending: HashMap<u64, Pending>,
}

#[derive(Debug, Clone, Default)]
pub struct PoseWaiters {
    set: Arc<Mutex<WaiterSet>>,
}

impl PoseWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a waiter for `cmd_id`. The waiter leaves the set when it is
    /// resolved, when its wait times out, or when the handle is dropped.
    pub fn register(&self, cmd_id: &str) -> PoseWait {
        let (tx, rx) = oneshot::channel();
        let mut set = self.set.lock();
        let id = set.next_id;
        set.next_id += 1;
        set.pending.insert(
            id,
            Pending {
                cmd_id: cmd_id.to_string(),
                tx,
            },
        );
        PoseWait {
            id,
            rx,
            set: Arc::clone(&self.set),
        }
    }

    pub async fn wait_for_convergence(
        &self,
        cmd_id: &str,
        timeout: Duration,
    ) -> Result<TelemetryEvent, WaitError> {
        self.register(cmd_id).wait(timeout).await
    }

    /// Resolves every waiter currently in the set with `event` and empties
    /// the set. Returns how many waiters were still listening.
    pub fn resolve_all(&self, event: &TelemetryEvent) -> usize {
        let mut set = self.set.lock();
        let mut delivered = 0;
        for (_, pending) in set.pending.drain() {
            if pending.tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(cmd_id = %pending.cmd_id, "waiter gone before resolution");
            }
        }
        delivered
    }

    /// Drops waiters whose caller has already gone away.
    pub fn sweep(&self) -> usize {
        let mut set = self.set.lock();
        let before = set.pending.len();
        set.pending.retain(|_, pending| !pending.tx.is_closed());
        before - set.pending.len()
    }

    pub fn len(&self) -> usize {
        self.set.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one registered waiter.
#[derive(Debug)]
pub struct PoseWait {
    id: u64,
    rx: oneshot::Receiver<TelemetryEvent>,
    set: Arc<Mutex<WaiterSet>>,
}

impl PoseWait {
    /// Suspends until the waiter is resolved or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<TelemetryEvent, WaitError> {
        let outcome = tokio::time::timeout(timeout, &mut self.rx).await;
        match outcome {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(WaitError::Cancelled),
            Err(_) => {
                let still_pending = self.set.lock().pending.remove(&self.id).is_some();
                if still_pending {
                    return Err(WaitError::Timeout(timeout));
                }
                // Resolved at the deadline: the event is already in the channel.
                self.rx.try_recv().map_err(|_| WaitError::Timeout(timeout))
            }
        }
    }
}

impl Drop for PoseWait {
    fn drop(&mut self) {
        self.set.lock().pending.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(joints: &[f64]) -> TelemetryEvent {
        TelemetryEvent {
            joints: joints.to_vec(),
            status: None,
        }
    }

    #[tokio::test]
    async fn resolves_every_registered_waiter_once() {
        let waiters = PoseWaiters::new();
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let w = waiters.register(&format!("cmd-{i}"));
                tokio::spawn(w.wait(Duration::from_secs(30)))
            })
            .collect();
        assert_eq!(waiters.len(), 5);

        assert_eq!(waiters.resolve_all(&event(&[0.0, 0.0])), 5);
        assert!(waiters.is_empty());
        // A second convergent event finds nobody left.
        assert_eq!(waiters.resolve_all(&event(&[0.01, 0.0])), 0);

        for handle in handles {
            let got = handle.await.unwrap().unwrap();
            assert_eq!(got.joints, vec![0.0, 0.0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn late_registration_is_not_resolved_by_earlier_event() {
        let waiters = PoseWaiters::new();
        assert_eq!(waiters.resolve_all(&event(&[0.0])), 0);

        let late = waiters.register("late");
        let res = late.wait(Duration::from_secs(1)).await;
        assert_eq!(res, Err(WaitError::Timeout(Duration::from_secs(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_at_deadline_and_leaves_the_set() {
        let waiters = PoseWaiters::new();
        let start = tokio::time::Instant::now();
        let res = waiters
            .wait_for_convergence("cmd", Duration::from_secs(30))
            .await;
        assert_eq!(res, Err(WaitError::Timeout(Duration::from_secs(30))));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(waiters.is_empty());
    }

    #[tokio::test]
    async fn dropping_a_wait_removes_it() {
        let waiters = PoseWaiters::new();
        let w = waiters.register("cmd");
        assert_eq!(waiters.len(), 1);
        drop(w);
        assert!(waiters.is_empty());
        assert_eq!(waiters.resolve_all(&event(&[0.0])), 0);
    }

    #[tokio::test]
    async fn aborted_wait_task_releases_membership() {
        let waiters = PoseWaiters::new();
        let w = waiters.register("cmd");
        let handle = tokio::spawn(w.wait(Duration::from_secs(30)));
        tokio::task::yield_now().await;
        handle.abort();
        let _ = handle.await;
        assert!(waiters.is_empty());
    }

    #[test]
    fn sweep_removes_waiters_without_receivers() {
        let waiters = PoseWaiters::new();
        let (tx, rx) = oneshot::channel();
        drop(rx);
        waiters.set.lock().pending.insert(
            u64::MAX,
            Pending {
                cmd_id: "orphan".into(),
                tx,
            },
        );
        let _live = waiters.register("live");

        assert_eq!(waiters.sweep(), 1);
        assert_eq!(waiters.len(), 1);
    }
}
