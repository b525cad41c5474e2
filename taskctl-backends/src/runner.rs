use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskctl_common::{models::execution::LogEvent, Result};

/// The abstracted container runtime (spec.md §6). Implementations talk to
/// ECS/Kubernetes/Nomad/etc; this crate only ships an in-memory fake behind
/// `test-utils`, matching the teacher's capability-interface pattern
/// (`shuttle_gateway::DockerContext` / `shuttle_backends::client`).
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Launches a task from `task_template_name` running `command` with the
    /// given environment. Returns the runner-assigned `execution_id` and,
    /// if the runner knows it, the instant the task was actually created.
    async fn start_task(
        &self,
        task_template_name: &str,
        command: &str,
        env: &std::collections::BTreeMap<String, String>,
    ) -> Result<(String, Option<DateTime<Utc>>)>;

    async fn kill_task(&self, execution_id: &str) -> Result<()>;

    /// Registers a new task template family for `image_id`, returning the
    /// runner-side template name. Idempotent re-registration of the same
    /// `image_id` MUST return the same template name.
    async fn register_image(&self, image_id: &str, image_ref: &str) -> Result<String>;

    /// Deregisters every revision of a task template the runner holds.
    /// Individual revision failures are the caller's concern to log; this
    /// call only fails if the runner could not attempt deregistration at
    /// all.
    async fn remove_task_template(&self, task_template_name: &str) -> Result<()>;

    async fn fetch_logs_by_execution_id(&self, execution_id: &str) -> Result<Vec<LogEvent>>;

    /// Whether a named IAM-style role is known to the runtime. Used to
    /// validate `task_role`/`exec_role` at `RegisterImage` time.
    async fn role_exists(&self, role_name: &str) -> Result<bool>;
}

/// One asynchronous event emitted by the runtime's lifecycle stream
/// (spec.md §4.1.2).
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    StateChanged {
        execution_id: String,
        status: taskctl_common::models::execution::Status,
        exit_code: Option<i32>,
        completed_at: DateTime<Utc>,
    },
    Logs {
        execution_id: String,
        events: Vec<LogEvent>,
    },
}

#[cfg(feature = "test-utils")]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use taskctl_common::{Error, ErrorKind};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    /// An in-memory [`TaskRunner`] for tests. Started tasks are tracked so
    /// `kill_task` and `fetch_logs_by_execution_id` have something to act on;
    /// lifecycle events are driven explicitly by test code via
    /// [`FakeRunner::emit`], not generated spontaneously.
    pub struct FakeRunner {
        next_id: AtomicU64,
        tasks: Mutex<HashMap<String, Vec<LogEvent>>>,
        templates: Mutex<HashMap<String, String>>,
        roles: Mutex<std::collections::HashSet<String>>,
        events: UnboundedSender<LifecycleEvent>,
    }

    impl FakeRunner {
        pub fn new() -> (std::sync::Arc<Self>, UnboundedReceiver<LifecycleEvent>) {
            let (tx, rx) = unbounded_channel();
            (
                std::sync::Arc::new(Self {
                    next_id: AtomicU64::new(1),
                    tasks: Mutex::new(HashMap::new()),
                    templates: Mutex::new(HashMap::new()),
                    roles: Mutex::new(std::collections::HashSet::new()),
                    events: tx,
                }),
                rx,
            )
        }

        pub fn allow_role(&self, role: impl Into<String>) {
            self.roles.lock().unwrap().insert(role.into());
        }

        pub fn push_logs(&self, execution_id: &str, events: Vec<LogEvent>) {
            self.tasks
                .lock()
                .unwrap()
                .entry(execution_id.to_string())
                .or_default()
                .extend(events.clone());
            let _ = self.events.send(LifecycleEvent::Logs {
                execution_id: execution_id.to_string(),
                events,
            });
        }

        pub fn finish(
            &self,
            execution_id: &str,
            status: taskctl_common::models::execution::Status,
            exit_code: i32,
        ) {
            let _ = self.events.send(LifecycleEvent::StateChanged {
                execution_id: execution_id.to_string(),
                status,
                exit_code: Some(exit_code),
                completed_at: Utc::now(),
            });
        }
    }

    #[async_trait]
    impl TaskRunner for FakeRunner {
        async fn start_task(
            &self,
            _task_template_name: &str,
            _command: &str,
            _env: &std::collections::BTreeMap<String, String>,
        ) -> Result<(String, Option<DateTime<Utc>>)> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let execution_id = format!("exec_{id}");
            self.tasks.lock().unwrap().insert(execution_id.clone(), Vec::new());
            Ok((execution_id, None))
        }

        async fn kill_task(&self, execution_id: &str) -> Result<()> {
            if self.tasks.lock().unwrap().contains_key(execution_id) {
                Ok(())
            } else {
                Err(Error::from_kind(ErrorKind::NotFound))
            }
        }

        async fn register_image(&self, image_id: &str, image_ref: &str) -> Result<String> {
            let mut templates = self.templates.lock().unwrap();
            if let Some(existing) = templates.get(image_id) {
                return Ok(existing.clone());
            }
            let name = format!("template-{image_id}");
            templates.insert(image_id.to_string(), name.clone());
            tracing::debug!(image_ref, %name, "registered fake task template");
            Ok(name)
        }

        async fn remove_task_template(&self, task_template_name: &str) -> Result<()> {
            self.templates
                .lock()
                .unwrap()
                .retain(|_, v| v != task_template_name);
            Ok(())
        }

        async fn fetch_logs_by_execution_id(&self, execution_id: &str) -> Result<Vec<LogEvent>> {
            self.tasks
                .lock()
                .unwrap()
                .get(execution_id)
                .cloned()
                .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))
        }

        async fn role_exists(&self, role_name: &str) -> Result<bool> {
            Ok(self.roles.lock().unwrap().contains(role_name))
        }
    }
}
