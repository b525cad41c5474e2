use std::sync::Arc;

use chrono::Utc;
use taskctl_backends::repositories::ExecutionRepository;
use taskctl_backends::runner::TaskRunner;
use taskctl_common::{
    models::execution::{
        parse_timeout, Execution, ExecutionResponse, KillResponse, LogsResponse, RunRequest,
        RunResponse, Status,
    },
    Error, ErrorKind, Result,
};
use tracing::{error, instrument, warn};

use crate::image_catalog::ImageCatalog;
use crate::push_channel::PushChannelManager;
use crate::secrets::SecretService;

/// Ties task launch, image resolution, secret injection, execution
/// persistence, and status transitions together (spec.md §4.1). Grounded on
/// `shuttle_deployer::deployment::DeploymentManager`'s role as the single
/// owner coordinating the runtime and persistence on a project's behalf.
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    runner: Arc<dyn TaskRunner>,
    executions: Arc<dyn ExecutionRepository>,
    images: ImageCatalog,
    secrets: SecretService,
    push: Arc<PushChannelManager>,
    compute_platform: String,
}

impl ExecutionOrchestrator {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        executions: Arc<dyn ExecutionRepository>,
        images: ImageCatalog,
        secrets: SecretService,
        push: Arc<PushChannelManager>,
        compute_platform: String,
    ) -> Self {
        Self {
            runner,
            executions,
            images,
            secrets,
            push,
            compute_platform,
        }
    }

    #[instrument(skip(self, request))]
    pub async fn run_command(&self, user_email: &str, request: RunRequest) -> Result<RunResponse> {
        if request.command.trim().is_empty() {
            return Err(Error::custom(ErrorKind::InvalidRequest, "command must not be empty"));
        }
        let timeout = parse_timeout(&request.timeout)?;

        // Secret resolution failures abort before anything is launched
        // (spec.md §4.1 "failure semantics").
        let mut env = self.secrets.resolve_for_execution(&request.secrets).await?;
        env.extend(request.env.clone());

        let registration = if request.image.trim().is_empty() {
            self.images
                .get_default()
                .await?
                .ok_or_else(|| Error::custom(ErrorKind::InvalidRequest, "no default image registered"))?
        } else {
            self.images.resolve(&request.image).await?.ok_or_else(|| {
                Error::custom(
                    ErrorKind::InvalidRequest,
                    format!("image {} is not registered", request.image),
                )
            })?
        };

        let (execution_id, created_at) = self
            .runner
            .start_task(&registration.task_template_name, &request.command, &env)
            .await?;

        let execution = Execution {
            execution_id: execution_id.clone(),
            user_email: user_email.to_string(),
            command: request.command,
            status: Status::Running,
            started_at: created_at.unwrap_or_else(Utc::now),
            completed_at: None,
            exit_code: None,
            request_id: request.request_id,
            compute_platform: self.compute_platform.clone(),
        };

        // The task is already running; a persistence failure here must not
        // fail the caller's request (spec.md §4.1 asymmetry).
        if let Err(err) = self.executions.insert(execution).await {
            error!(error = %err, %execution_id, "failed to persist execution record after launch");
        }

        if let Some(duration) = timeout {
            let runner = self.runner.clone();
            let executions = self.executions.clone();
            let timed_out_execution_id = execution_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let still_running = matches!(
                    executions.get(&timed_out_execution_id).await,
                    Ok(Some(execution)) if !execution.status.is_terminal()
                );
                if still_running {
                    if let Err(err) = runner.kill_task(&timed_out_execution_id).await {
                        warn!(error = %err, execution_id = %timed_out_execution_id, "failed to kill execution after timeout");
                    }
                }
            });
        }

        Ok(RunResponse {
            execution_id,
            status: Status::Running,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_execution_status(&self, execution_id: &str) -> Result<ExecutionResponse> {
        if execution_id.trim().is_empty() {
            return Err(Error::from_kind(ErrorKind::InvalidRequest));
        }
        let execution = self
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        Ok(execution.into())
    }

    pub async fn list_executions(&self) -> Result<Vec<ExecutionResponse>> {
        Ok(self
            .executions
            .list()
            .await?
            .into_iter()
            .map(ExecutionResponse::from)
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn kill_execution(&self, execution_id: &str) -> Result<KillResponse> {
        let execution = self
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        if execution.status.is_terminal() {
            return Err(Error::custom(
                ErrorKind::InvalidRequest,
                format!("execution is already {}", execution.status),
            ));
        }

        self.runner.kill_task(execution_id).await?;

        Ok(KillResponse {
            execution_id: execution_id.to_string(),
            message: "kill signal sent".to_string(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_logs_by_execution_id(
        &self,
        execution_id: &str,
        user_email: &str,
        client_ip: &str,
        last_seen_timestamp: Option<i64>,
    ) -> Result<LogsResponse> {
        if execution_id.trim().is_empty() {
            return Err(Error::from_kind(ErrorKind::InvalidRequest));
        }

        let execution = self
            .executions
            .get(execution_id)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;

        let mut events = self.runner.fetch_logs_by_execution_id(execution_id).await?;
        if let Some(threshold) = last_seen_timestamp {
            events.retain(|event| event.timestamp_ms > threshold);
        }

        let websocket_url = if execution.status.is_terminal() {
            None
        } else {
            self.push
                .mint_stream_url(execution_id, user_email, client_ip)
                .await?
        };

        Ok(LogsResponse {
            execution_id: execution_id.to_string(),
            status: execution.status,
            events,
            websocket_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use taskctl_backends::fakes::{InMemoryConnections, InMemoryExecutions, InMemoryImages, InMemorySecrets};
    use taskctl_backends::runner::fake::FakeRunner;
    use taskctl_backends::value_store::fake::FakeValueStore;
    use taskctl_common::models::image::RegisterImageRequest;
    use taskctl_common::models::secret::CreateSecretRequest;

    async fn orchestrator() -> (ExecutionOrchestrator, Arc<FakeRunner>) {
        let (runner, rx) = FakeRunner::new();
        std::mem::forget(rx);

        let images = ImageCatalog::new(Arc::new(InMemoryImages::default()), runner.clone());
        images
            .register_image(RegisterImageRequest {
                image: "a:1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let secrets = SecretService::new(Arc::new(InMemorySecrets::default()), Arc::new(FakeValueStore::default()));
        let executions: Arc<dyn ExecutionRepository> = Arc::new(InMemoryExecutions::default());
        let push = Arc::new(PushChannelManager::new(
            Arc::new(InMemoryConnections::default()),
            executions.clone(),
            None,
        ));

        (
            ExecutionOrchestrator::new(runner.clone(), executions, images, secrets, push, "fake".into()),
            runner,
        )
    }

    #[tokio::test]
    async fn run_command_requires_non_empty_command() {
        let (orch, _runner) = orchestrator().await;
        let err = orch
            .run_command("a@x.io", RunRequest { command: "  ".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn run_command_uses_default_image_when_unspecified() {
        let (orch, _runner) = orchestrator().await;
        let resp = orch
            .run_command("a@x.io", RunRequest { command: "ls".into(), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(resp.status, Status::Running);

        let status = orch.get_execution_status(&resp.execution_id).await.unwrap();
        assert_eq!(status.status, Status::Running);
        assert_eq!(status.exit_code, None);
    }

    #[tokio::test]
    async fn run_command_rejects_invalid_timeout() {
        let (orch, _runner) = orchestrator().await;
        let err = orch
            .run_command(
                "a@x.io",
                RunRequest { command: "ls".into(), timeout: "invalid".into(), ..Default::default() },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn run_command_rejects_unregistered_image() {
        let (orch, _runner) = orchestrator().await;
        let err = orch
            .run_command(
                "a@x.io",
                RunRequest { command: "ls".into(), image: "nope:1".into(), ..Default::default() },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn caller_env_wins_over_secret_injection() {
        let (orch, _runner) = orchestrator().await;
        orch.secrets
            .create_secret(
                CreateSecretRequest {
                    name: "db".into(),
                    key_name: "DB_URL".into(),
                    description: "".into(),
                    value: "from-secret".into(),
                },
                "admin@x.io",
            )
            .await
            .unwrap();

        let mut env = BTreeMap::new();
        env.insert("DB_URL".to_string(), "override".to_string());

        orch.run_command(
            "a@x.io",
            RunRequest {
                command: "psql".into(),
                secrets: vec!["db".into()],
                env,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        // The fake runner doesn't expose received env directly; this test
        // exercises that resolution + merge don't error with both present.
    }

    #[tokio::test]
    async fn kill_on_terminal_execution_is_invalid_request() {
        let (orch, runner) = orchestrator().await;
        let resp = orch
            .run_command("a@x.io", RunRequest { command: "ls".into(), ..Default::default() })
            .await
            .unwrap();

        orch.kill_execution(&resp.execution_id).await.unwrap();
        runner.finish(&resp.execution_id, Status::Stopped, 137);
        orch.executions
            .update_terminal(&resp.execution_id, Status::Stopped, Utc::now(), Some(137))
            .await
            .unwrap();

        let err = orch.kill_execution(&resp.execution_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn kill_unknown_execution_is_not_found() {
        let (orch, _runner) = orchestrator().await;
        let err = orch.kill_execution("does-not-exist").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn logs_without_base_url_have_no_websocket() {
        let (orch, _runner) = orchestrator().await;
        let resp = orch
            .run_command("a@x.io", RunRequest { command: "ls".into(), ..Default::default() })
            .await
            .unwrap();

        let logs = orch
            .get_logs_by_execution_id(&resp.execution_id, "a@x.io", "1.1.1.1", None)
            .await
            .unwrap();
        assert_eq!(logs.websocket_url, None);
    }
}
