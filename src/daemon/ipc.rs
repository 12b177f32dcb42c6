//! IPC server for the Meeting Alarm daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - Request/response handling for the CLI commands
//! - Dispatch of each command to the running daemon components

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};

use crate::credential::CredentialGate;
use crate::types::{ConfigureParams, IpcRequest, IpcResponse, ResponseData};

use super::config::SharedConfig;
use super::evaluator::AlertEvaluator;
use super::fetch::FetchCoordinator;
use super::scheduler::SchedulerManager;

// ============================================================================
// Constants
// ============================================================================

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "~/.meeting-alarm/meeting-alarm.sock";

/// Largest request the server accepts, in bytes
const MAX_REQUEST_SIZE: usize = 4096;

/// How long a client may take to send its request
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// IpcError
// ============================================================================

/// Failures while reading a request off the socket.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("リクエストを読み込めませんでした: {0}")]
    ReadError(String),

    #[error("リクエストの受信がタイムアウトしました")]
    Timeout,

    #[error("リクエストが大きすぎます (上限 {MAX_REQUEST_SIZE} バイト)")]
    RequestTooLarge,

    #[error("クライアントが何も送信せずに切断しました")]
    Empty,
}

/// Expands a leading `~/` in `path` to the home directory.
pub fn expand_socket_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ============================================================================
// IpcServer
// ============================================================================

/// Control socket of the daemon; one JSON request and one JSON response
/// per connection.
pub struct IpcServer {
    listener: UnixListener,
    /// Removed again on drop
    socket_path: PathBuf,
}

impl IpcServer {
    /// Binds the control socket, replacing a stale socket file left by a
    /// previous run.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the socket
    /// cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("ソケット用ディレクトリを作成できません: {}", dir.display()))?;
        }
        match std::fs::remove_file(socket_path) {
            Ok(()) => tracing::debug!(path = %socket_path.display(), "古いソケットを削除しました"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("古いソケットを削除できません: {}", socket_path.display())
                })
            }
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("ソケットを待ち受けできません: {}", socket_path.display()))?;

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Waits for the next client.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().await.context("接続を受け付けられません")?;
        Ok(stream)
    }

    /// Reads one request. The client signals the end by shutting down its
    /// write half; a slow client is cut off after a few seconds.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, an empty or oversized request, or JSON
    /// that is not a known command.
    pub async fn receive_request(stream: &mut UnixStream) -> Result<IpcRequest> {
        // One byte of headroom tells an exact-size request from an oversized one
        let mut buffer = vec![0u8; MAX_REQUEST_SIZE + 1];

        let n = match timeout(REQUEST_READ_TIMEOUT, stream.read(&mut buffer)).await {
            Err(_) => return Err(IpcError::Timeout.into()),
            Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string()).into()),
            Ok(Ok(0)) => return Err(IpcError::Empty.into()),
            Ok(Ok(n)) if n > MAX_REQUEST_SIZE => return Err(IpcError::RequestTooLarge.into()),
            Ok(Ok(n)) => n,
        };

        serde_json::from_slice(&buffer[..n]).context("リクエストを解釈できません")
    }

    /// Writes `response` as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has gone away.
    pub async fn send_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
        let body = serde_json::to_vec(response).context("レスポンスをシリアライズできません")?;
        stream.write_all(&body).await.context("レスポンスを送信できません")?;
        stream.flush().await.context("レスポンスを送信できません")?;
        Ok(())
    }

    /// Serves clients one at a time until the task is cancelled.
    pub async fn serve(self, handler: RequestHandler) {
        tracing::info!(path = %self.socket_path.display(), "IPCサーバーを開始しました");
        loop {
            let mut stream = match self.accept().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("接続を受け付けられませんでした: {:#}", e);
                    continue;
                }
            };

            let response = match Self::receive_request(&mut stream).await {
                Ok(request) => {
                    tracing::debug!(?request, "IPCリクエストを受信しました");
                    handler.handle(request).await
                }
                Err(e) => {
                    tracing::warn!("不正なIPCリクエスト: {:#}", e);
                    IpcResponse::error(format!("不正なリクエストです: {}", e))
                }
            };

            if let Err(e) = Self::send_response(&mut stream, &response).await {
                tracing::warn!("IPCレスポンスを送信できませんでした: {:#}", e);
            }
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

// ============================================================================
// RequestHandler
// ============================================================================

/// The running components an IPC request can act on.
#[derive(Clone)]
pub struct DaemonContext {
    pub coordinator: Arc<FetchCoordinator>,
    pub evaluator: Arc<AlertEvaluator>,
    pub gate: Arc<CredentialGate>,
    pub scheduler: Arc<SchedulerManager>,
    pub config: Arc<SharedConfig>,
}

/// Handles IPC requests by dispatching to the daemon components.
pub struct RequestHandler {
    context: DaemonContext,
}

impl RequestHandler {
    pub fn new(context: DaemonContext) -> Self {
        Self { context }
    }

    /// Handles an IPC request and returns the appropriate response.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status => self.handle_status(),
            IpcRequest::Refresh => self.handle_refresh(),
            IpcRequest::Restart => self.handle_restart().await,
            IpcRequest::SignIn { token } => self.handle_sign_in(&token),
            IpcRequest::CancelSignIn => self.handle_cancel_sign_in(),
            IpcRequest::Configure { params } => self.handle_configure(params).await,
        }
    }

    /// Current daemon state.
    pub fn status_data(&self) -> ResponseData {
        let ctx = &self.context;
        let now = chrono::Utc::now();
        let snapshot = ctx.coordinator.snapshot();
        let next_meeting = snapshot.next_upcoming(now).map(|event| {
            format!(
                "{} {}",
                event.start.with_timezone(&chrono::Local).format("%H:%M"),
                event.subject
            )
        });

        ResponseData {
            scheduler_running: Some(ctx.scheduler.is_running()),
            last_refresh: ctx.coordinator.last_refresh().map(|at| at.to_rfc3339()),
            fetch_status: Some(ctx.coordinator.status().message()),
            event_count: Some(snapshot.len()),
            next_meeting,
            alerted_count: Some(ctx.evaluator.alerted().len()),
            sign_in_pending: Some(ctx.gate.is_pending()),
        }
    }

    fn handle_status(&self) -> IpcResponse {
        IpcResponse::success("", Some(self.status_data()))
    }

    fn handle_refresh(&self) -> IpcResponse {
        if self.context.coordinator.refresh().started() {
            IpcResponse::success("予定の再取得を開始しました", Some(self.status_data()))
        } else {
            IpcResponse::success("予定の取得は既に実行中です", Some(self.status_data()))
        }
    }

    async fn handle_restart(&self) -> IpcResponse {
        match self.restart_scheduler().await {
            Ok(()) => IpcResponse::success("スケジューラを再起動しました", Some(self.status_data())),
            Err(e) => IpcResponse::error(format!("スケジューラを再起動できませんでした: {:#}", e)),
        }
    }

    fn handle_sign_in(&self, token: &str) -> IpcResponse {
        match self.context.gate.submit(token) {
            Ok(()) => IpcResponse::success("資格情報を送信しました", None),
            Err(e) => IpcResponse::error(format!("{} ({})", e, e.suggestion())),
        }
    }

    fn handle_cancel_sign_in(&self) -> IpcResponse {
        match self.context.gate.cancel(true) {
            Ok(()) => IpcResponse::success("サインインをキャンセルしました", None),
            Err(e) => IpcResponse::error(format!("{} ({})", e, e.suggestion())),
        }
    }

    async fn handle_configure(&self, params: ConfigureParams) -> IpcResponse {
        if params.is_empty() {
            return IpcResponse::error("変更する設定が指定されていません");
        }

        let interval_changed = match self.context.config.apply(&params) {
            Ok((_, changed)) => changed,
            Err(e) => return IpcResponse::error(e),
        };

        if interval_changed && self.context.scheduler.is_running() {
            if let Err(e) = self.restart_scheduler().await {
                return IpcResponse::error(format!(
                    "設定は更新しましたが、スケジューラを再起動できませんでした: {:#}",
                    e
                ));
            }
        }
        IpcResponse::success("設定を更新しました", Some(self.status_data()))
    }

    /// The scheduler blocks while tearing its runtime down, so it is
    /// restarted off the async workers.
    async fn restart_scheduler(&self) -> Result<()> {
        let scheduler = Arc::clone(&self.context.scheduler);
        tokio::task::spawn_blocking(move || scheduler.restart())
            .await
            .context("再起動タスクが異常終了しました")?
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use chrono::Utc;

    use crate::credential::GateTimings;
    use crate::daemon::config::ConfigStore;
    use crate::daemon::dispatcher::MockAlertSink;
    use crate::daemon::scheduler::{job, SchedulerTimings};
    use crate::daemon::wake::WakeClock;
    use crate::gateway::MockCalendarGateway;
    use crate::types::{AlarmConfig, CalendarEvent};
    use crate::ui::{self, RecordingSurface, UiHandle};

    // ------------------------------------------------------------------------
    // Helper functions
    // ------------------------------------------------------------------------

    fn create_temp_socket_path() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sock");
        // Keep the directory so it's not deleted
        std::mem::forget(dir);
        path
    }

    struct Fixture {
        handler: RequestHandler,
        context: DaemonContext,
        gateway: Arc<MockCalendarGateway>,
        ui: UiHandle,
        ui_join: Option<thread::JoinHandle<()>>,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.ui.shutdown();
            if let Some(join) = self.ui_join.take() {
                let _ = join.join();
            }
        }
    }

    fn upcoming_event(id: &str, minutes: i64) -> CalendarEvent {
        let start = (Utc::now() + chrono::Duration::minutes(minutes)).fixed_offset();
        CalendarEvent::new(id, "定例会議", start, start + chrono::Duration::minutes(30))
    }

    fn fixture() -> Fixture {
        let (ui, ui_loop) = ui::channel();
        let recorder = RecordingSurface::new();
        let ui_join = ui_loop.spawn(move || recorder).unwrap();

        let config = Arc::new(SharedConfig::new(AlarmConfig::default()));
        let gateway = Arc::new(MockCalendarGateway::with_events(vec![upcoming_event("a", 30)]));
        let coordinator = Arc::new(FetchCoordinator::new(gateway.clone()).with_ui(ui.clone()));
        let evaluator = Arc::new(AlertEvaluator::new(Arc::new(MockAlertSink::new()), config.clone()));
        let gate = Arc::new(
            CredentialGate::new(ui.clone(), Arc::new(WakeClock::new())).with_timings(GateTimings {
                ping_timeout: Duration::from_millis(200),
                readiness_retries: 3,
                retry_delay: Duration::from_millis(10),
                wake_stabilization: Duration::from_secs(10),
            }),
        );
        let scheduler = Arc::new(
            SchedulerManager::new(job(|| Ok(())), job(|| Ok(())), config.clone()).with_timings(
                SchedulerTimings {
                    evaluate_period: Duration::from_secs(60),
                    minute: Duration::from_secs(60),
                    shutdown_grace: Duration::from_millis(200),
                },
            ),
        );

        let context = DaemonContext {
            coordinator,
            evaluator,
            gate,
            scheduler,
            config,
        };
        Fixture {
            handler: RequestHandler::new(context.clone()),
            context,
            gateway,
            ui,
            ui_join: Some(ui_join),
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..300 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    // ------------------------------------------------------------------------
    // IpcServer Tests
    // ------------------------------------------------------------------------

    mod ipc_server_tests {
        use super::*;

        /// Sends raw bytes the way the CLI does and returns the raw reply.
        async fn exchange(socket_path: &Path, request: &[u8]) -> Vec<u8> {
            let mut stream = UnixStream::connect(socket_path).await.unwrap();
            stream.write_all(request).await.unwrap();
            stream.shutdown().await.unwrap();
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.unwrap();
            reply
        }

        async fn serving(fixture: &Fixture) -> (PathBuf, tokio::task::JoinHandle<()>) {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();
            let task = tokio::spawn(server.serve(RequestHandler::new(fixture.context.clone())));
            (socket_path, task)
        }

        #[tokio::test]
        async fn test_replaces_stale_socket_and_creates_directory() {
            let dir = tempfile::tempdir().unwrap();
            let socket_path = dir.path().join("nested").join("alarm.sock");
            std::fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
            std::fs::write(&socket_path, "stale").unwrap();

            let server = IpcServer::new(&socket_path).unwrap();
            assert_eq!(server.socket_path(), socket_path.as_path());

            drop(server);
            assert!(!socket_path.exists());
        }

        #[tokio::test]
        async fn test_serve_answers_status() {
            let fixture = fixture();
            let (socket_path, task) = serving(&fixture).await;

            let reply = exchange(&socket_path, br#"{"command":"status"}"#).await;
            let response: IpcResponse = serde_json::from_slice(&reply).unwrap();
            assert!(response.is_success());
            assert_eq!(response.data.unwrap().event_count, Some(0));

            task.abort();
        }

        #[tokio::test]
        async fn test_serve_survives_bad_requests() {
            let fixture = fixture();
            let (socket_path, task) = serving(&fixture).await;

            let reply = exchange(&socket_path, b"{\"command\":\"snooze\"}").await;
            let response: IpcResponse = serde_json::from_slice(&reply).unwrap();
            assert!(!response.is_success());
            assert!(response.message.starts_with("不正なリクエストです"));

            let reply = exchange(&socket_path, br#"{"command":"refresh"}"#).await;
            let response: IpcResponse = serde_json::from_slice(&reply).unwrap();
            assert!(response.is_success());

            task.abort();
        }

        #[tokio::test]
        async fn test_receive_request_parses_command_payloads() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                stream
                    .write_all(br#"{"command":"configure","alertThresholdMinutes":5}"#)
                    .await
                    .unwrap();
                stream.shutdown().await.unwrap();
            });

            let mut stream = server.accept().await.unwrap();
            match IpcServer::receive_request(&mut stream).await.unwrap() {
                IpcRequest::Configure { params } => {
                    assert_eq!(params.alert_threshold_minutes, Some(5));
                    assert_eq!(params.resync_interval_minutes, None);
                }
                other => panic!("Expected Configure request, got {:?}", other),
            }
            client.await.unwrap();
        }

        #[tokio::test]
        async fn test_empty_request_is_rejected() {
            let socket_path = create_temp_socket_path();
            let server = IpcServer::new(&socket_path).unwrap();

            let client_path = socket_path.clone();
            let client = tokio::spawn(async move {
                let mut stream = UnixStream::connect(&client_path).await.unwrap();
                stream.shutdown().await.unwrap();
            });

            let mut stream = server.accept().await.unwrap();
            let error = IpcServer::receive_request(&mut stream).await.unwrap_err();
            assert!(matches!(error.downcast_ref::<IpcError>(), Some(IpcError::Empty)));
            client.await.unwrap();
        }

        #[test]
        fn test_expand_socket_path() {
            let expanded = expand_socket_path(DEFAULT_SOCKET_PATH);
            assert!(!expanded.to_string_lossy().starts_with('~'));
            assert!(expanded.ends_with(".meeting-alarm/meeting-alarm.sock"));
            assert_eq!(expand_socket_path("/tmp/x.sock"), PathBuf::from("/tmp/x.sock"));
        }
    }

    // ------------------------------------------------------------------------
    // RequestHandler Tests
    // ------------------------------------------------------------------------

    mod request_handler_tests {
        use super::*;

        #[tokio::test]
        async fn test_handle_status_before_first_fetch() {
            let f = fixture();
            let response = f.handler.handle(IpcRequest::Status).await;

            assert!(response.is_success());
            let data = response.data.unwrap();
            assert_eq!(data.scheduler_running, Some(false));
            assert_eq!(data.event_count, Some(0));
            assert_eq!(data.alerted_count, Some(0));
            assert_eq!(data.sign_in_pending, Some(false));
            assert_eq!(data.fetch_status.as_deref(), Some("未取得"));
            assert!(data.last_refresh.is_none());
        }

        #[tokio::test]
        async fn test_handle_refresh_updates_snapshot() {
            let f = fixture();
            let response = f.handler.handle(IpcRequest::Refresh).await;
            assert!(response.is_success());

            let coordinator = Arc::clone(&f.context.coordinator);
            assert!(wait_until(|| coordinator.last_refresh().is_some()).await);

            let data = f.handler.status_data();
            assert_eq!(data.event_count, Some(1));
            assert!(data.next_meeting.unwrap().ends_with("定例会議"));
            assert_eq!(f.gateway.fetch_calls(), 1);
        }

        #[tokio::test]
        async fn test_handle_refresh_while_fetching() {
            let f = fixture();
            f.gateway.block();

            f.handler.handle(IpcRequest::Refresh).await;
            let gateway = Arc::clone(&f.gateway);
            assert!(wait_until(|| gateway.in_flight() == 1).await);

            let response = f.handler.handle(IpcRequest::Refresh).await;
            assert!(response.is_success());
            assert!(response.message.contains("既に実行中"));

            f.gateway.release();
            let coordinator = Arc::clone(&f.context.coordinator);
            assert!(wait_until(|| !coordinator.is_fetching()).await);
            assert_eq!(f.gateway.fetch_calls(), 1);
        }

        #[tokio::test]
        async fn test_handle_restart() {
            let f = fixture();
            let response = f.handler.handle(IpcRequest::Restart).await;

            assert!(response.is_success());
            assert!(f.context.scheduler.is_running());
            assert_eq!(f.context.scheduler.start_count(), 1);

            f.handler.handle(IpcRequest::Restart).await;
            assert_eq!(f.context.scheduler.start_count(), 2);
        }

        #[tokio::test]
        async fn test_handle_sign_in_without_prompt() {
            let f = fixture();
            let response = f
                .handler
                .handle(IpcRequest::SignIn {
                    token: "tok".to_string(),
                })
                .await;
            assert!(!response.is_success());
        }

        #[tokio::test]
        async fn test_handle_sign_in_resolves_prompt() {
            let f = fixture();
            let gate = Arc::clone(&f.context.gate);
            let waiter = thread::spawn(move || {
                gate.prompt_and_wait("https://login.example.com", Duration::from_secs(5))
            });

            let gate = Arc::clone(&f.context.gate);
            assert!(wait_until(|| gate.is_showing()).await);

            let response = f
                .handler
                .handle(IpcRequest::SignIn {
                    token: "tok-1".to_string(),
                })
                .await;
            assert!(response.is_success());

            let credential = waiter.join().unwrap().unwrap().unwrap();
            assert_eq!(credential.expose(), "tok-1");
        }

        #[tokio::test]
        async fn test_handle_cancel_sign_in() {
            let f = fixture();
            let gate = Arc::clone(&f.context.gate);
            let waiter = thread::spawn(move || {
                gate.prompt_and_wait("https://login.example.com", Duration::from_secs(5))
            });

            let gate = Arc::clone(&f.context.gate);
            assert!(wait_until(|| gate.is_showing()).await);

            let response = f.handler.handle(IpcRequest::CancelSignIn).await;
            assert!(response.is_success());
            assert_eq!(waiter.join().unwrap(), Ok(None));
            assert!(!f.context.gate.is_pending());
        }

        #[tokio::test]
        async fn test_handle_configure_threshold() {
            let f = fixture();
            let response = f
                .handler
                .handle(IpcRequest::Configure {
                    params: ConfigureParams {
                        alert_threshold_minutes: Some(5),
                        ..Default::default()
                    },
                })
                .await;

            assert!(response.is_success());
            assert_eq!(f.context.config.to_config().alert_threshold_minutes, 5);
            assert_eq!(f.context.scheduler.start_count(), 0);
        }

        #[tokio::test]
        async fn test_handle_configure_interval_restarts_running_scheduler() {
            let f = fixture();
            f.handler.handle(IpcRequest::Restart).await;
            assert_eq!(f.context.scheduler.start_count(), 1);

            let response = f
                .handler
                .handle(IpcRequest::Configure {
                    params: ConfigureParams {
                        resync_interval_minutes: Some(30),
                        ..Default::default()
                    },
                })
                .await;

            assert!(response.is_success());
            assert_eq!(f.context.scheduler.start_count(), 2);
        }

        #[tokio::test]
        async fn test_handle_configure_invalid() {
            let f = fixture();
            let before = f.context.config.to_config();
            let response = f
                .handler
                .handle(IpcRequest::Configure {
                    params: ConfigureParams {
                        alert_threshold_minutes: Some(3),
                        overlay_opacity: Some(0),
                        ..Default::default()
                    },
                })
                .await;

            assert!(!response.is_success());
            assert_eq!(f.context.config.to_config(), before);
        }

        #[tokio::test]
        async fn test_handle_configure_empty() {
            let f = fixture();
            let response = f
                .handler
                .handle(IpcRequest::Configure {
                    params: ConfigureParams::default(),
                })
                .await;
            assert!(!response.is_success());
        }
    }
}
