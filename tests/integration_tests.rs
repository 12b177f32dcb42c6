//! Integration tests for Daemon-CLI IPC communication.
//!
//! These tests run the real IPC server over a temporary socket and talk to
//! it with the CLI client:
//! - Status and refresh round trips
//! - Runtime configuration changes
//! - Answering and cancelling the sign-in prompt
//! - Connection error handling

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use meeting_alarm::cli::client::IpcClient;
use meeting_alarm::credential::{CredentialGate, GateTimings};
use meeting_alarm::daemon::config::ConfigStore;
use meeting_alarm::daemon::ipc::{DaemonContext, IpcServer, RequestHandler};
use meeting_alarm::daemon::{
    job, AlertEvaluator, FetchCoordinator, MockAlertSink, SchedulerManager, SchedulerTimings,
    SharedConfig, WakeClock,
};
use meeting_alarm::ui::{self, RecordingSurface, UiHandle};
use meeting_alarm::{AlarmConfig, CalendarEvent, ConfigureParams, Credential, MockCalendarGateway};

// ============================================================================
// Test Helpers
// ============================================================================

/// Creates a temporary socket path for testing.
fn create_temp_socket_path() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("integration_test.sock");
    // Keep the directory so it's not deleted
    std::mem::forget(dir);
    path
}

fn upcoming_event(id: &str, subject: &str, minutes: i64) -> CalendarEvent {
    let start = (Utc::now() + chrono::Duration::minutes(minutes)).fixed_offset();
    CalendarEvent::new(id, subject, start, start + chrono::Duration::minutes(30))
}

/// A daemon without timers: the IPC server, its context and a UI loop.
struct TestDaemon {
    context: DaemonContext,
    gateway: Arc<MockCalendarGateway>,
    client: IpcClient,
    server: JoinHandle<()>,
    ui: UiHandle,
    ui_join: Option<thread::JoinHandle<()>>,
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        self.server.abort();
        self.ui.shutdown();
        if let Some(join) = self.ui_join.take() {
            let _ = join.join();
        }
    }
}

async fn start_daemon() -> TestDaemon {
    let (ui, ui_loop) = ui::channel();
    let recorder = RecordingSurface::new();
    let ui_join = ui_loop.spawn(move || recorder).unwrap();

    let config = Arc::new(SharedConfig::new(AlarmConfig::default()));
    let gateway = Arc::new(MockCalendarGateway::with_events(vec![
        upcoming_event("a", "設計レビュー", 30),
        upcoming_event("b", "1on1", 90),
    ]));
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
        SchedulerManager::new(job(|| Ok(())), job(|| Ok(())), config.clone()).with_timings(SchedulerTimings {
            evaluate_period: Duration::from_secs(60),
            minute: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(200),
        }),
    );

    let context = DaemonContext {
        coordinator,
        evaluator,
        gate,
        scheduler,
        config,
    };

    let socket_path = create_temp_socket_path();
    let server = IpcServer::new(&socket_path).unwrap();
    let server = tokio::spawn(server.serve(RequestHandler::new(context.clone())));
    let client = IpcClient::with_socket_path(socket_path).with_retry_delay(Duration::from_millis(10));

    TestDaemon {
        context,
        gateway,
        client,
        server,
        ui,
        ui_join: Some(ui_join),
    }
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// Status and Refresh
// ============================================================================

#[tokio::test]
async fn test_status_before_first_fetch() {
    let daemon = start_daemon().await;

    let response = daemon.client.status().await.unwrap();
    assert!(response.is_success());

    let data = response.data.unwrap();
    assert_eq!(data.scheduler_running, Some(false));
    assert_eq!(data.event_count, Some(0));
    assert_eq!(data.fetch_status.as_deref(), Some("未取得"));
    assert!(data.last_refresh.is_none());
    assert_eq!(data.sign_in_pending, Some(false));
}

#[tokio::test]
async fn test_refresh_then_status() {
    let daemon = start_daemon().await;

    let response = daemon.client.refresh().await.unwrap();
    assert_eq!(response.message, "予定の再取得を開始しました");

    let coordinator = Arc::clone(&daemon.context.coordinator);
    assert!(wait_until(|| coordinator.last_refresh().is_some()).await);

    let data = daemon.client.status().await.unwrap().data.unwrap();
    assert_eq!(data.event_count, Some(2));
    assert!(data.last_refresh.is_some());
    assert!(data.next_meeting.unwrap().ends_with("設計レビュー"));
    assert_eq!(daemon.gateway.fetch_calls(), 1);
}

#[tokio::test]
async fn test_refresh_while_fetching_is_skipped() {
    let daemon = start_daemon().await;
    daemon.gateway.block();

    daemon.client.refresh().await.unwrap();
    let gateway = Arc::clone(&daemon.gateway);
    assert!(wait_until(|| gateway.in_flight() == 1).await);

    let response = daemon.client.refresh().await.unwrap();
    assert_eq!(response.message, "予定の取得は既に実行中です");

    daemon.gateway.release();
    let coordinator = Arc::clone(&daemon.context.coordinator);
    assert!(wait_until(|| !coordinator.is_fetching()).await);
    assert_eq!(daemon.gateway.fetch_calls(), 1);
}

#[tokio::test]
async fn test_restart_starts_scheduler() {
    let daemon = start_daemon().await;

    let response = daemon.client.restart().await.unwrap();
    assert_eq!(response.data.unwrap().scheduler_running, Some(true));
    assert_eq!(daemon.context.scheduler.start_count(), 1);
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_configure_updates_settings() {
    let daemon = start_daemon().await;

    let params = ConfigureParams {
        alert_threshold_minutes: Some(10),
        overlay_opacity: Some(60),
        ..ConfigureParams::default()
    };
    let response = daemon.client.configure(params).await.unwrap();
    assert_eq!(response.message, "設定を更新しました");

    let config = daemon.context.config.to_config();
    assert_eq!(config.alert_threshold_minutes, 10);
    assert_eq!(config.overlay_opacity, 60);
}

#[tokio::test]
async fn test_invalid_configure_is_rejected() {
    let daemon = start_daemon().await;
    let before = daemon.context.config.to_config();

    let params = ConfigureParams {
        alert_threshold_minutes: Some(90),
        ..ConfigureParams::default()
    };
    assert!(daemon.client.configure(params).await.is_err());
    assert_eq!(daemon.context.config.to_config(), before);
}

#[tokio::test]
async fn test_empty_configure_rejected_by_client() {
    let daemon = start_daemon().await;
    assert!(daemon.client.configure(ConfigureParams::default()).await.is_err());
}

// ============================================================================
// Sign-In
// ============================================================================

#[tokio::test]
async fn test_sign_in_without_prompt_fails() {
    let daemon = start_daemon().await;

    let result = daemon.client.sign_in("token").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_sign_in_answers_waiting_prompt() {
    let daemon = start_daemon().await;

    let waiter = {
        let gate = Arc::clone(&daemon.context.gate);
        thread::spawn(move || gate.prompt_and_wait("https://login.example.com", std::time::Duration::from_secs(5)))
    };
    let gate = Arc::clone(&daemon.context.gate);
    assert!(wait_until(|| gate.is_showing()).await);

    let status = daemon.client.status().await.unwrap().data.unwrap();
    assert_eq!(status.sign_in_pending, Some(true));

    daemon.client.sign_in("secret-token").await.unwrap();
    let credential = tokio::task::spawn_blocking(move || waiter.join().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential, Credential::new("secret-token"));
}

#[tokio::test]
async fn test_cancel_sign_in_releases_waiter() {
    let daemon = start_daemon().await;

    let waiter = {
        let gate = Arc::clone(&daemon.context.gate);
        thread::spawn(move || gate.prompt_and_wait("https://login.example.com", std::time::Duration::from_secs(5)))
    };
    let gate = Arc::clone(&daemon.context.gate);
    assert!(wait_until(|| gate.is_showing()).await);

    daemon.client.cancel_sign_in().await.unwrap();
    let result = tokio::task::spawn_blocking(move || waiter.join().unwrap())
        .await
        .unwrap();
    assert_eq!(result, Ok(None));
    assert!(daemon.client.cancel_sign_in().await.is_err());
}

// ============================================================================
// Connection Errors
// ============================================================================

#[tokio::test]
async fn test_client_without_daemon() {
    let client = IpcClient::with_socket_path(create_temp_socket_path()).with_retry_delay(Duration::from_millis(10));

    let error = client.status().await.unwrap_err();
    assert!(format!("{:#}", error).contains("Daemonに接続できません"));
}

#[tokio::test]
async fn test_socket_removed_when_server_dropped() {
    let socket_path = create_temp_socket_path();
    {
        let _server = IpcServer::new(&socket_path).unwrap();
        assert!(socket_path.exists());
    }
    assert!(!socket_path.exists());
}
