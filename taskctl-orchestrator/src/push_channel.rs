use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{self, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use taskctl_backends::repositories::{ConnectionRepository, ExecutionRepository};
use taskctl_common::{
    models::execution::{LogEvent, Status},
    models::stream::{Functionality, StreamConnection, StreamFrame},
    crypto::random_token,
    Result,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{instrument, warn};

/// Bound on a single frame write; a viewer slower than this is disconnected
/// rather than allowed to stall broadcasts to everyone else (spec.md §5).
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

struct ChannelHandle {
    connection_id: String,
    sender: mpsc::UnboundedSender<StreamFrame>,
}

/// Owns every currently-connected log viewer and fans out events to them
/// (spec.md §4.2). Locking is per-`execution_id`: the outer `RwLock` only
/// ever guards a map lookup, the actual connection list is behind its own
/// `Mutex` so one execution's churn never blocks another's broadcast.
pub struct PushChannelManager {
    connections: Arc<dyn ConnectionRepository>,
    executions: Arc<dyn ExecutionRepository>,
    base_url: Option<String>,
    channels: RwLock<HashMap<String, Arc<Mutex<Vec<ChannelHandle>>>>>,
}

impl PushChannelManager {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        executions: Arc<dyn ExecutionRepository>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            connections,
            executions,
            base_url,
            channels: RwLock::new(HashMap::new()),
        }
    }

    async fn execution_channels(&self, execution_id: &str) -> Arc<Mutex<Vec<ChannelHandle>>> {
        if let Some(existing) = self.channels.read().await.get(execution_id) {
            return existing.clone();
        }
        self.channels
            .write()
            .await
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Mints a pending [`StreamConnection`] + token and composes the viewer
    /// URL, or `None` if no push-channel base URL is configured (spec.md
    /// §4.2, §4.1's `GetLogsByExecutionID`).
    #[instrument(skip(self))]
    pub async fn mint_stream_url(
        &self,
        execution_id: &str,
        user_email: &str,
        client_ip: &str,
    ) -> Result<Option<String>> {
        let Some(base) = self.base_url.as_ref() else {
            return Ok(None);
        };

        let token = random_token(32);
        let connection_id = format!("pending_{}", random_token(8));
        let connection = StreamConnection {
            connection_id,
            execution_id: execution_id.to_string(),
            functionality: Functionality::LogStreaming,
            user_email: user_email.to_string(),
            client_ip_at_creation: client_ip.to_string(),
            created_at: Utc::now(),
        };
        self.connections.insert_pending(connection, token.clone()).await?;

        Ok(Some(format!("wss://{base}/?execution_id={execution_id}&token={token}")))
    }

    /// Drives one viewer's websocket from upgrade to close: authenticates via
    /// the one-shot token, registers a fan-out handle, then relays frames
    /// until the client disconnects or the execution completes (spec.md
    /// §4.2). Grounded on `shuttle_deployer::handlers::logs_websocket_handler`'s
    /// upgrade-then-relay shape.
    #[instrument(skip(self, socket))]
    pub async fn handle_socket(&self, mut socket: WebSocket, execution_id: String, token: String) {
        let connection = match self.connections.consume_token(&token).await {
            Ok(Some(connection)) if connection.execution_id == execution_id => connection,
            Ok(_) => {
                let _ = send_frame(&mut socket, &StreamFrame::Error {
                    message: "invalid or expired stream token".into(),
                })
                .await;
                let _ = socket.close().await;
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to consume stream token");
                let _ = socket.close().await;
                return;
            }
        };

        let status = match self.executions.get(&execution_id).await {
            Ok(Some(execution)) => execution.status,
            _ => {
                let _ = socket.close().await;
                self.connections.delete(&connection.connection_id).await.ok();
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<StreamFrame>();
        {
            let handles = self.execution_channels(&execution_id).await;
            handles.lock().await.push(ChannelHandle {
                connection_id: connection.connection_id.clone(),
                sender: tx.clone(),
            });
        }

        let _ = tx.send(StreamFrame::Hello {
            execution_id: execution_id.clone(),
            status,
        });

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let is_complete = matches!(frame, StreamFrame::ExecutionComplete { .. });
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                    if is_complete {
                        break;
                    }
                }
                incoming = socket.next() => {
                    match incoming {
                        Some(Ok(ws::Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        self.unregister(&execution_id, &connection.connection_id).await;
        self.connections.delete(&connection.connection_id).await.ok();
        let _ = socket.close().await;
    }

    async fn unregister(&self, execution_id: &str, connection_id: &str) {
        if let Some(handles) = self.channels.read().await.get(execution_id) {
            handles.lock().await.retain(|h| h.connection_id != connection_id);
        }
    }

    /// Pushes log events to every connection for `execution_id`. Delivery is
    /// per-connection independent and best-effort: a closed receiver just
    /// gets pruned (spec.md §4.2).
    #[instrument(skip(self, events))]
    pub async fn broadcast_log(&self, execution_id: &str, events: Vec<LogEvent>) {
        let handles = self.execution_channels(execution_id).await;
        let mut handles = handles.lock().await;
        handles.retain(|handle| {
            events
                .iter()
                .all(|event| handle.sender.send(StreamFrame::Log(event.clone())).is_ok())
        });
    }

    /// Broadcasts the distinguished completion frame then lets every
    /// connection's writer task close it (spec.md §4.2).
    #[instrument(skip(self))]
    pub async fn broadcast_completion(&self, execution_id: &str, status: Status, exit_code: Option<i32>) {
        let handles = self.execution_channels(execution_id).await;
        let mut handles = handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.sender.send(StreamFrame::ExecutionComplete {
                execution_id: execution_id.to_string(),
                status,
                exit_code,
            });
        }
        self.connections.delete_all_for_execution(execution_id).await.ok();
        self.channels.write().await.remove(execution_id);
    }

    /// Drops every channel's sender, so each connection's relay loop sees
    /// `rx.recv() == None` and winds itself down. Used to drain connections
    /// on graceful shutdown.
    pub async fn close_all(&self) {
        self.channels.write().await.clear();
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &StreamFrame) -> std::result::Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    tokio::time::timeout(WRITE_TIMEOUT, socket.send(ws::Message::Text(text)))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskctl_backends::fakes::{InMemoryConnections, InMemoryExecutions};
    use taskctl_common::models::execution::LogEvent;

    fn manager(base_url: Option<&str>) -> (Arc<InMemoryConnections>, PushChannelManager) {
        let connections = Arc::new(InMemoryConnections::default());
        let executions = Arc::new(InMemoryExecutions::default());
        let manager = PushChannelManager::new(connections.clone(), executions, base_url.map(String::from));
        (connections, manager)
    }

    #[tokio::test]
    async fn mint_stream_url_is_none_without_a_base_url() {
        let (_connections, manager) = manager(None);
        let url = manager.mint_stream_url("exec_1", "a@x.io", "1.1.1.1").await.unwrap();
        assert_eq!(url, None);
    }

    #[tokio::test]
    async fn mint_stream_url_composes_a_wss_url_with_a_base_url() {
        let (_connections, manager) = manager(Some("push.example.com"));
        let url = manager
            .mint_stream_url("exec_1", "a@x.io", "1.1.1.1")
            .await
            .unwrap()
            .unwrap();
        assert!(url.starts_with("wss://push.example.com/?execution_id=exec_1&token="));
    }

    /// Every minted stream token authenticates exactly one viewer connection
    /// (spec.md §8 invariant 6): the second `consume_token` on the same
    /// token must see it already gone.
    #[tokio::test]
    async fn stream_token_is_single_use() {
        let (connections, manager) = manager(Some("push.example.com"));
        let url = manager
            .mint_stream_url("exec_1", "a@x.io", "1.1.1.1")
            .await
            .unwrap()
            .unwrap();
        let token = url.rsplit("token=").next().unwrap().to_string();

        let first = connections.consume_token(&token).await.unwrap();
        assert!(first.is_some());

        let second = connections.consume_token(&token).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn broadcast_log_with_no_viewers_is_a_noop() {
        let (_connections, manager) = manager(None);
        manager
            .broadcast_log("exec_1", vec![LogEvent { timestamp_ms: 1, message: "hi".into() }])
            .await;
    }

    #[tokio::test]
    async fn broadcast_completion_with_no_viewers_clears_any_pending_channel_entry() {
        let (_connections, manager) = manager(None);
        manager.execution_channels("exec_1").await;
        assert!(manager.channels.read().await.contains_key("exec_1"));

        manager.broadcast_completion("exec_1", Status::Succeeded, Some(0)).await;

        assert!(!manager.channels.read().await.contains_key("exec_1"));
    }

    #[tokio::test]
    async fn close_all_drops_every_registered_channel() {
        let (_connections, manager) = manager(None);
        manager.execution_channels("exec_1").await;
        manager.execution_channels("exec_2").await;

        manager.close_all().await;

        assert!(manager.channels.read().await.is_empty());
    }
}
