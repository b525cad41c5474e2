use std::collections::{BTreeMap, HashMap, HashSet};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskctl_backends::runner::{LifecycleEvent, TaskRunner};
use taskctl_common::{
    models::execution::{LogEvent, Status},
    Error, ErrorKind, Result,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The one concrete [`TaskRunner`] this crate ships: it launches commands as
/// local OS processes rather than on a cloud container platform. The real
/// runtime (ECS/Kubernetes/Nomad) is explicitly out of scope (spec.md §1) and
/// exposed only as the abstract capability in `taskctl-backends::runner`;
/// this adapter exists so the orchestrator binary has something runnable,
/// the same role `taskctl-auth::dal::Sqlite` plays for persistence.
pub struct ProcessRunner {
    tasks: Mutex<HashMap<String, TaskHandle>>,
    templates: Mutex<HashMap<String, String>>,
    roles: Mutex<HashSet<String>>,
    events: UnboundedSender<LifecycleEvent>,
}

struct TaskHandle {
    child: Arc<Mutex<Child>>,
    logs: Arc<Mutex<Vec<LogEvent>>>,
}

impl ProcessRunner {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = unbounded_channel();
        (
            Arc::new(Self {
                tasks: Mutex::new(HashMap::new()),
                templates: Mutex::new(HashMap::new()),
                roles: Mutex::new(HashSet::new()),
                events: tx,
            }),
            rx,
        )
    }

    /// Local processes have no IAM concept; every role name supplied at
    /// startup is treated as known.
    pub async fn allow_role(&self, role: impl Into<String>) {
        self.roles.lock().await.insert(role.into());
    }
}

#[async_trait]
impl TaskRunner for ProcessRunner {
    async fn start_task(
        &self,
        task_template_name: &str,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(String, Option<DateTime<Utc>>)> {
        let execution_id = format!("exec_{}", taskctl_common::crypto::random_token(8));

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .envs(env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::source(ErrorKind::ServiceUnavailable, err))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let logs = Arc::new(Mutex::new(Vec::new()));

        spawn_log_reader(stdout, execution_id.clone(), logs.clone(), self.events.clone());
        spawn_log_reader(stderr, execution_id.clone(), logs.clone(), self.events.clone());

        let child = Arc::new(Mutex::new(child));
        self.tasks.lock().await.insert(
            execution_id.clone(),
            TaskHandle {
                child: child.clone(),
                logs,
            },
        );

        spawn_waiter(execution_id.clone(), child, self.events.clone());

        info!(%execution_id, %task_template_name, "started local process task");
        Ok((execution_id, Some(Utc::now())))
    }

    async fn kill_task(&self, execution_id: &str) -> Result<()> {
        let handle = {
            let tasks = self.tasks.lock().await;
            tasks
                .get(execution_id)
                .map(|h| h.child.clone())
                .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?
        };
        handle
            .lock()
            .await
            .start_kill()
            .map_err(|err| Error::source(ErrorKind::Internal, err))
    }

    async fn register_image(&self, image_id: &str, image_ref: &str) -> Result<String> {
        let mut templates = self.templates.lock().await;
        if let Some(existing) = templates.get(image_id) {
            return Ok(existing.clone());
        }
        let name = format!("local-template-{image_id}");
        templates.insert(image_id.to_string(), name.clone());
        info!(image_ref, %name, "registered local task template");
        Ok(name)
    }

    async fn remove_task_template(&self, task_template_name: &str) -> Result<()> {
        self.templates.lock().await.retain(|_, v| v != task_template_name);
        Ok(())
    }

    async fn fetch_logs_by_execution_id(&self, execution_id: &str) -> Result<Vec<LogEvent>> {
        let tasks = self.tasks.lock().await;
        let handle = tasks.get(execution_id).ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        Ok(handle.logs.lock().await.clone())
    }

    async fn role_exists(&self, role_name: &str) -> Result<bool> {
        Ok(self.roles.lock().await.contains(role_name))
    }
}

fn spawn_log_reader(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    execution_id: String,
    logs: Arc<Mutex<Vec<LogEvent>>>,
    events: UnboundedSender<LifecycleEvent>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let event = LogEvent {
                timestamp_ms: Utc::now().timestamp_millis(),
                message: line,
            };
            logs.lock().await.push(event.clone());
            let _ = events.send(LifecycleEvent::Logs {
                execution_id: execution_id.clone(),
                events: vec![event],
            });
        }
    });
}

fn spawn_waiter(execution_id: String, child: Arc<Mutex<Child>>, events: UnboundedSender<LifecycleEvent>) {
    tokio::spawn(async move {
        let exit_status = child.lock().await.wait().await;
        let (status, exit_code) = match exit_status {
            Ok(status) if status.success() => (Status::Succeeded, status.code()),
            Ok(status) => (
                if status.code().is_none() {
                    Status::Stopped
                } else {
                    Status::Failed
                },
                status.code(),
            ),
            Err(err) => {
                warn!(error = %err, %execution_id, "failed to wait on local process");
                (Status::Failed, None)
            }
        };

        let _ = events.send(LifecycleEvent::StateChanged {
            execution_id,
            status,
            exit_code,
            completed_at: Utc::now(),
        });
    });
}
