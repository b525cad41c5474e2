use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use taskctl_backends::repositories::ExecutionRepository;
use taskctl_backends::runner::LifecycleEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use crate::push_channel::PushChannelManager;

/// Tracks which `(execution_id, timestamp_ms, message)` triples have already
/// been broadcast, so an at-least-once runner stream can't duplicate log
/// lines to viewers (spec.md §8 invariant 7). Kept separate from [`spawn`]
/// so the dedup rule itself is unit-testable without a running task.
struct LogDedup {
    seen: Mutex<HashSet<String>>,
}

impl LogDedup {
    fn new() -> Self {
        Self { seen: Mutex::new(HashSet::new()) }
    }

    /// `true` the first time this triple is seen, `false` on every repeat.
    fn is_fresh(&self, execution_id: &str, timestamp_ms: i64, message: &str) -> bool {
        self.seen
            .lock()
            .unwrap()
            .insert(format!("{execution_id}:{timestamp_ms}:{message}"))
    }

    /// Drops every key recorded for `execution_id`, once it reaches a
    /// terminal state, so memory doesn't grow unbounded across a long-lived
    /// process.
    fn clear_execution(&self, execution_id: &str) {
        self.seen
            .lock()
            .unwrap()
            .retain(|key| !key.starts_with(&format!("{execution_id}:")));
    }
}

/// Drains the runner's lifecycle-event channel: persists terminal status
/// transitions and fans log batches out through the push channel manager
/// (spec.md §4.1.2). Grounded on
/// `shuttle_deployer::persistence::Persistence`'s background task draining
/// its `log_recv` receiver.
///
/// The receiver is at-least-once; log events are deduplicated via
/// [`LogDedup`] before broadcast.
pub fn spawn(
    mut events: UnboundedReceiver<LifecycleEvent>,
    executions: Arc<dyn ExecutionRepository>,
    push: Arc<PushChannelManager>,
) -> tokio::task::JoinHandle<()> {
    let dedup = LogDedup::new();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                LifecycleEvent::StateChanged {
                    execution_id,
                    status,
                    exit_code,
                    completed_at,
                } => {
                    if !status.is_terminal() {
                        continue;
                    }
                    if let Err(err) = executions
                        .update_terminal(&execution_id, status, completed_at, exit_code)
                        .await
                    {
                        warn!(error = %err, %execution_id, "failed to persist terminal status");
                    }
                    push.broadcast_completion(&execution_id, status, exit_code).await;
                    dedup.clear_execution(&execution_id);
                }
                LifecycleEvent::Logs { execution_id, events } => {
                    let fresh: Vec<_> = events
                        .into_iter()
                        .filter(|event| dedup.is_fresh(&execution_id, event.timestamp_ms, &event.message))
                        .collect();
                    if !fresh.is_empty() {
                        push.broadcast_log(&execution_id, fresh).await;
                    }
                }
            }
        }
        info!("lifecycle event channel closed, ingestion task exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskctl_backends::fakes::{InMemoryConnections, InMemoryExecutions};
    use taskctl_common::models::execution::{Execution, Status};
    use tokio::sync::mpsc::unbounded_channel;

    fn sample_execution(execution_id: &str) -> Execution {
        Execution {
            execution_id: execution_id.into(),
            user_email: "a@x.io".into(),
            command: "ls".into(),
            status: Status::Running,
            started_at: Utc::now(),
            completed_at: None,
            exit_code: None,
            request_id: None,
            compute_platform: "fargate".into(),
        }
    }

    #[test]
    fn dedup_rejects_repeat_triples_but_accepts_distinct_ones() {
        let dedup = LogDedup::new();

        assert!(dedup.is_fresh("exec_1", 1, "booting"));
        assert!(!dedup.is_fresh("exec_1", 1, "booting"));
        assert!(dedup.is_fresh("exec_1", 2, "booting"));
        assert!(dedup.is_fresh("exec_2", 1, "booting"));
    }

    #[test]
    fn clear_execution_only_forgets_its_own_keys() {
        let dedup = LogDedup::new();
        dedup.is_fresh("exec_1", 1, "a");
        dedup.is_fresh("exec_2", 1, "a");

        dedup.clear_execution("exec_1");

        assert!(dedup.is_fresh("exec_1", 1, "a"));
        assert!(!dedup.is_fresh("exec_2", 1, "a"));
    }

    #[tokio::test]
    async fn state_changed_event_persists_terminal_status() {
        let executions: Arc<dyn ExecutionRepository> = Arc::new(InMemoryExecutions::default());
        executions.insert(sample_execution("exec_1")).await.unwrap();
        let push = Arc::new(PushChannelManager::new(
            Arc::new(InMemoryConnections::default()),
            executions.clone(),
            None,
        ));

        let (tx, rx) = unbounded_channel();
        let handle = spawn(rx, executions.clone(), push);

        tx.send(LifecycleEvent::StateChanged {
            execution_id: "exec_1".into(),
            status: Status::Succeeded,
            exit_code: Some(0),
            completed_at: Utc::now(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let execution = executions.get("exec_1").await.unwrap().unwrap();
        assert_eq!(execution.status, Status::Succeeded);
        assert_eq!(execution.exit_code, Some(0));
    }

    #[tokio::test]
    async fn non_terminal_state_changed_is_ignored() {
        let executions: Arc<dyn ExecutionRepository> = Arc::new(InMemoryExecutions::default());
        executions.insert(sample_execution("exec_1")).await.unwrap();
        let push = Arc::new(PushChannelManager::new(
            Arc::new(InMemoryConnections::default()),
            executions.clone(),
            None,
        ));

        let (tx, rx) = unbounded_channel();
        let handle = spawn(rx, executions.clone(), push);

        tx.send(LifecycleEvent::StateChanged {
            execution_id: "exec_1".into(),
            status: Status::Running,
            exit_code: None,
            completed_at: Utc::now(),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let execution = executions.get("exec_1").await.unwrap().unwrap();
        assert_eq!(execution.status, Status::Running);
    }
}
