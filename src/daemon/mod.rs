//! Daemon module for the Meeting Alarm.
//!
//! This module contains the core daemon functionality:
//! - `config`: live settings shared by every thread
//! - `worker`: named ephemeral worker threads with panic capture
//! - `scheduler`: the refresh and evaluate jobs and their lifecycle
//! - `fetch`: single-flight calendar refresh with a watchdog
//! - `evaluator`: alert selection, de-duplication and credential checks
//! - `dispatcher`: overlay, banner, tray notice and audio sequencing
//! - `wake`: resume-from-sleep detection
//! - `ipc`: local control socket
//!
//! [`AlarmDaemon`] wires them together. Its `run` turns the calling thread
//! into the UI-owning thread.

pub mod config;
pub mod dispatcher;
pub mod evaluator;
pub mod fetch;
pub mod ipc;
pub mod scheduler;
pub mod wake;
pub mod worker;

pub use config::{ConfigStore, SharedConfig};
pub use dispatcher::{AlertDispatcher, AlertRequest, AlertSink, DispatchTimings, MockAlertSink};
pub use evaluator::{AlertEvaluator, AlertedSet, CheckOutcome, CredentialCheck, EvaluateTick};
pub use fetch::{FetchCoordinator, FetchState, FetchStatus, RefreshOutcome};
pub use ipc::{DaemonContext, IpcServer, RequestHandler, DEFAULT_SOCKET_PATH};
pub use scheduler::{job, SchedulerManager, SchedulerTimings};
pub use wake::{WakeClock, WakeMonitor};

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tokio::sync::oneshot;

use crate::credential::CredentialGate;
use crate::gateway::{CalendarGateway, JsonFileGateway, DEFAULT_CREDENTIAL_LIFETIME};
use crate::overlay::{LogOverlay, OverlayRenderer};
use crate::sound::{AudioCue, RodioAudioCue};
use crate::types::{AlarmConfig, ConfigureParams};
use crate::ui::{self, MenuAction, UiHandle, UiLoop, UiSurface};

// ============================================================================
// DaemonOptions
// ============================================================================

/// Startup options for [`AlarmDaemon::from_options`].
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Settings file (defaults to `~/.meeting-alarm/config.json`)
    pub config_path: Option<PathBuf>,
    /// Calendar events file (defaults to `~/.meeting-alarm/events.json`)
    pub events_path: Option<PathBuf>,
    /// Require a sign-in before the events file is read
    pub require_sign_in: bool,
    /// Control socket (defaults to [`DEFAULT_SOCKET_PATH`])
    pub socket_path: Option<PathBuf>,
    /// Values that override the settings file
    pub overrides: ConfigureParams,
}

/// Channel backends handed to [`AlarmDaemon::new`].
pub struct Backends {
    pub gateway: Arc<dyn CalendarGateway>,
    pub audio: Arc<dyn AudioCue>,
    pub overlay: Arc<dyn OverlayRenderer>,
}

// ============================================================================
// AlarmDaemon
// ============================================================================

/// The assembled daemon.
pub struct AlarmDaemon {
    context: DaemonContext,
    credentials: Arc<CredentialCheck>,
    wake_clock: Arc<WakeClock>,
    ui: UiHandle,
    ui_loop: UiLoop,
    socket_path: Option<PathBuf>,
}

impl AlarmDaemon {
    /// Assembles the daemon around the given backends.
    ///
    /// `make_backends` receives the credential gate so a gateway can route
    /// its sign-in through it.
    pub fn new<F>(config: Arc<SharedConfig>, make_backends: F) -> Self
    where
        F: FnOnce(&Arc<CredentialGate>, &Arc<SharedConfig>) -> Backends,
    {
        let (ui, ui_loop) = ui::channel();
        let wake_clock = Arc::new(WakeClock::new());
        let gate = Arc::new(CredentialGate::new(ui.clone(), Arc::clone(&wake_clock)));
        let backends = make_backends(&gate, &config);
        let store: Arc<dyn ConfigStore> = config.clone();

        let coordinator = Arc::new(FetchCoordinator::new(backends.gateway).with_ui(ui.clone()));
        let dispatcher = Arc::new(AlertDispatcher::new(
            backends.audio,
            backends.overlay,
            ui.clone(),
            Arc::clone(&store),
        ));
        let evaluator = Arc::new(AlertEvaluator::new(dispatcher, Arc::clone(&store)));
        let credentials = Arc::new(CredentialCheck::new(
            Arc::clone(&coordinator),
            Arc::clone(&gate),
            Arc::clone(&store),
            ui.clone(),
        ));

        let refresh_job = {
            let coordinator = Arc::clone(&coordinator);
            job(move || {
                coordinator.refresh();
                Ok(())
            })
        };
        let evaluate_job = {
            let tick = EvaluateTick {
                evaluator: Arc::clone(&evaluator),
                coordinator: Arc::clone(&coordinator),
                credentials: Arc::clone(&credentials),
                config: Arc::clone(&store),
                ui: ui.clone(),
            };
            job(move || tick.run())
        };
        let scheduler = Arc::new(SchedulerManager::new(refresh_job, evaluate_job, store));

        Self {
            context: DaemonContext {
                coordinator,
                evaluator,
                gate,
                scheduler,
                config,
            },
            credentials,
            wake_clock,
            ui,
            ui_loop,
            socket_path: None,
        }
    }

    /// Assembles the daemon with the production backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file is invalid or the overrides
    /// fail validation.
    pub fn from_options(options: &DaemonOptions) -> Result<Self> {
        let config = match options.config_path.clone().or_else(AlarmConfig::default_path) {
            Some(path) => SharedConfig::load(&path)?,
            None => SharedConfig::default(),
        };
        if !options.overrides.is_empty() {
            config.apply(&options.overrides).map_err(anyhow::Error::msg)?;
        }

        let events_path = match options.events_path.clone() {
            Some(path) => path,
            None => JsonFileGateway::default_path().context("ホームディレクトリが見つかりません")?,
        };
        tracing::info!(path = %events_path.display(), "予定ファイルを使用します");

        let require_sign_in = options.require_sign_in;
        let daemon = Self::new(Arc::new(config), move |gate, config| {
            let mut gateway = JsonFileGateway::new(events_path);
            if require_sign_in {
                let store: Arc<dyn ConfigStore> = config.clone();
                gateway = gateway
                    .require_credential(DEFAULT_CREDENTIAL_LIFETIME)
                    .with_sign_in(Arc::clone(gate), store);
            }
            Backends {
                gateway: Arc::new(gateway),
                audio: Arc::new(RodioAudioCue::with_default_beep()),
                overlay: Arc::new(LogOverlay::new()),
            }
        });

        let socket_path = options
            .socket_path
            .clone()
            .unwrap_or_else(|| ipc::expand_socket_path(DEFAULT_SOCKET_PATH));
        Ok(daemon.with_socket(socket_path))
    }

    /// Serves the control socket at `path` while running.
    pub fn with_socket(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    pub fn context(&self) -> &DaemonContext {
        &self.context
    }

    pub fn credentials(&self) -> &Arc<CredentialCheck> {
        &self.credentials
    }

    pub fn ui(&self) -> &UiHandle {
        &self.ui
    }

    /// Runs until shutdown, Quit, or Ctrl-C.
    ///
    /// The calling thread becomes the UI-owning thread and must not be
    /// needed for anything else meanwhile.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler cannot be started.
    pub fn run(self, surface: &mut dyn UiSurface) -> Result<()> {
        let Self {
            context,
            credentials,
            wake_clock,
            ui,
            ui_loop,
            socket_path,
        } = self;

        context.scheduler.start()?;

        let wake_monitor = {
            let scheduler = Arc::clone(&context.scheduler);
            let coordinator = Arc::clone(&context.coordinator);
            WakeMonitor::spawn(
                wake_clock,
                wake::DEFAULT_POLL_INTERVAL,
                wake::DEFAULT_GAP_THRESHOLD,
                move || {
                    on_resume(&scheduler, &coordinator);
                },
            )
        };

        let control = spawn_control_thread(socket_path, context.clone(), ui.clone());

        tracing::info!("Meeting Alarm を開始しました");
        ui_loop.run(surface, |action| match action {
            MenuAction::Refresh => {
                context.coordinator.refresh();
            }
            MenuAction::SignIn => {
                credentials.sign_in();
            }
            MenuAction::Quit => {}
        });

        tracing::info!("Meeting Alarm を終了します");
        // Releases anyone still blocked on the barrier
        let _ = context.gate.cancel(false);
        if let Some(monitor) = wake_monitor {
            monitor.stop();
        }
        context.scheduler.stop();
        if let Some(control) = control {
            control.stop();
        }
        Ok(())
    }
}

/// Resume handler: restarts the periodic jobs and forces one refresh.
fn on_resume(scheduler: &SchedulerManager, coordinator: &Arc<FetchCoordinator>) -> RefreshOutcome {
    if let Err(e) = scheduler.restart() {
        tracing::error!("復帰後のスケジューラ再起動に失敗しました: {:#}", e);
    }
    coordinator.refresh()
}

// ============================================================================
// Control thread
// ============================================================================

/// Thread running the IPC server and the Ctrl-C handler.
struct ControlThread {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ControlThread {
    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::error!("制御スレッドがパニックで終了しました");
        }
    }
}

fn spawn_control_thread(
    socket_path: Option<PathBuf>,
    context: DaemonContext,
    ui: UiHandle,
) -> Option<ControlThread> {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let spawned = thread::Builder::new().name("control".to_string()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("制御用ランタイムを作成できませんでした: {}", e);
                return;
            }
        };

        runtime.block_on(async move {
            let server = match socket_path.as_deref().map(IpcServer::new).transpose() {
                Ok(server) => server,
                Err(e) => {
                    tracing::error!("IPCサーバーを開始できませんでした: {:#}", e);
                    None
                }
            };
            let serve = async move {
                match server {
                    Some(server) => server.serve(RequestHandler::new(context)).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = serve => {}
                _ = stop_rx => {}
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::info!("Ctrl-Cを受信しました"),
                        Err(e) => tracing::warn!("シグナルを監視できませんでした: {}", e),
                    }
                    ui.shutdown();
                }
            }
        });
    });

    match spawned {
        Ok(handle) => Some(ControlThread { stop_tx, handle }),
        Err(e) => {
            tracing::error!("制御スレッドを起動できませんでした: {}", e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use chrono::Utc;

    use crate::gateway::MockCalendarGateway;
    use crate::overlay::MockOverlayRenderer;
    use crate::sound::MockAudioCue;
    use crate::types::CalendarEvent;
    use crate::ui::{RecordingSurface, UiCommand};

    fn mock_daemon(gateway: Arc<MockCalendarGateway>) -> AlarmDaemon {
        AlarmDaemon::new(Arc::new(SharedConfig::default()), move |_, _| Backends {
            gateway,
            audio: Arc::new(MockAudioCue::new()),
            overlay: Arc::new(MockOverlayRenderer::new()),
        })
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    mod daemon_tests {
        use super::*;

        #[test]
        fn test_run_refreshes_on_start_and_stops_on_shutdown() {
            let start = (Utc::now() + chrono::Duration::minutes(30)).fixed_offset();
            let gateway = Arc::new(MockCalendarGateway::with_events(vec![CalendarEvent::new(
                "a",
                "定例会議",
                start,
                start + chrono::Duration::minutes(30),
            )]));
            let daemon = mock_daemon(Arc::clone(&gateway));
            let context = daemon.context().clone();
            let ui = daemon.ui().clone();

            let runner = thread::spawn(move || {
                let mut surface = RecordingSurface::new();
                daemon.run(&mut surface)
            });

            let coordinator = Arc::clone(&context.coordinator);
            assert!(wait_for(|| coordinator.last_refresh().is_some()));
            assert_eq!(context.coordinator.snapshot().len(), 1);
            assert!(context.scheduler.is_running());

            ui.shutdown();
            runner.join().unwrap().unwrap();
            assert!(!context.scheduler.is_running());
        }

        #[test]
        fn test_menu_refresh_action() {
            let gateway = Arc::new(MockCalendarGateway::new());
            let daemon = mock_daemon(Arc::clone(&gateway));
            let context = daemon.context().clone();
            let ui = daemon.ui().clone();

            let surface = RecordingSurface::new();
            let clicks = surface.clone();
            let runner = thread::spawn(move || {
                let mut surface = surface;
                daemon.run(&mut surface)
            });

            let probe = Arc::clone(&gateway);
            assert!(wait_for(|| probe.fetch_calls() >= 1 && !context.coordinator.is_fetching()));
            clicks.push_action(MenuAction::Refresh);
            let probe = Arc::clone(&gateway);
            assert!(wait_for(|| probe.fetch_calls() >= 2));

            ui.shutdown();
            runner.join().unwrap().unwrap();
        }

        #[test]
        fn test_menu_quit_stops_daemon() {
            let daemon = mock_daemon(Arc::new(MockCalendarGateway::new()));
            let context = daemon.context().clone();

            let surface = RecordingSurface::new();
            surface.push_action(MenuAction::Quit);
            let runner = thread::spawn(move || {
                let mut surface = surface;
                daemon.run(&mut surface)
            });

            runner.join().unwrap().unwrap();
            assert!(!context.scheduler.is_running());
        }

        #[test]
        fn test_resume_restarts_scheduler_and_refreshes_once() {
            let gateway = Arc::new(MockCalendarGateway::new());
            let coordinator = Arc::new(FetchCoordinator::new(gateway.clone()));
            let scheduler = SchedulerManager::new(
                job(|| Ok(())),
                job(|| Ok(())),
                Arc::new(SharedConfig::default()),
            );
            scheduler.start().unwrap();
            let starts = scheduler.start_count();

            assert_eq!(on_resume(&scheduler, &coordinator), RefreshOutcome::Started);
            assert_eq!(scheduler.start_count(), starts + 1);
            assert!(scheduler.is_running());

            let probe = Arc::clone(&gateway);
            assert!(wait_for(|| probe.fetch_calls() == 1 && !coordinator.is_fetching()));
            assert_eq!(coordinator.snapshot().len(), 0);
            assert!(coordinator.last_refresh().is_some());

            scheduler.stop();
            assert!(!scheduler.is_running());
        }

        #[test]
        fn test_resume_from_stopped_scheduler_starts_it() {
            let gateway = Arc::new(MockCalendarGateway::new());
            let coordinator = Arc::new(FetchCoordinator::new(gateway.clone()));
            let scheduler = SchedulerManager::new(
                job(|| Ok(())),
                job(|| Ok(())),
                Arc::new(SharedConfig::default()),
            );

            on_resume(&scheduler, &coordinator);
            assert_eq!(scheduler.start_count(), 1);
            assert!(scheduler.is_running());
            scheduler.stop();
        }

        #[test]
        fn test_posts_after_shutdown_are_dropped() {
            let daemon = mock_daemon(Arc::new(MockCalendarGateway::new()));
            let ui = daemon.ui().clone();
            let runner = thread::spawn(move || {
                let mut surface = RecordingSurface::new();
                daemon.run(&mut surface)
            });

            ui.shutdown();
            runner.join().unwrap().unwrap();
            assert!(!ui.post(UiCommand::SetStatus("x".into())));
        }
    }
}
