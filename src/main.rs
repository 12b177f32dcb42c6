//! Meeting Alarm - alerts before calendar meetings start
//!
//! `meeting-alarm run` starts the daemon in the foreground; the other
//! subcommands talk to a running daemon over its control socket.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use meeting_alarm::cli::{Cli, Commands, Display, IpcClient, RunArgs};
use meeting_alarm::daemon::AlarmDaemon;

/// Main entry point
fn main() {
    let cli = Cli::parse();

    let is_daemon = matches!(cli.command, Some(Commands::Run(_)));
    init_tracing(is_daemon, cli.verbose);

    if let Err(e) = execute(cli) {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` wins; otherwise the daemon logs at `info`, client commands at
/// `warn`, and `--verbose` raises either to `debug`.
fn init_tracing(is_daemon: bool, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = match (verbose, is_daemon) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = fmt().with_env_filter(filter).with_target(false);
    if is_daemon {
        builder.with_thread_names(true).init();
    } else {
        builder.without_time().init();
    }
}

/// Executes the CLI command.
fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Run(args)) => run_daemon(&args, cli.socket),
        Some(Commands::Completions { shell }) => {
            generate_completions(shell);
            Ok(())
        }
        Some(command) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("ランタイムを作成できませんでした")?;
            runtime.block_on(execute_client(command, cli.socket))
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

/// Runs a client command against the daemon.
async fn execute_client(command: Commands, socket: Option<PathBuf>) -> Result<()> {
    let client = match socket {
        Some(path) => IpcClient::with_socket_path(path),
        None => IpcClient::new(),
    };

    match command {
        Commands::Status => {
            let response = client.status().await?;
            Display::show_status(&response);
        }
        Commands::Refresh => Display::show_success(&client.refresh().await?),
        Commands::Restart => Display::show_success(&client.restart().await?),
        Commands::SignIn { token } => Display::show_success(&client.sign_in(&token).await?),
        Commands::CancelSignIn => Display::show_success(&client.cancel_sign_in().await?),
        Commands::Set(args) => Display::show_success(&client.configure(args.to_params()).await?),
        Commands::Run(_) | Commands::Completions { .. } => {
            anyhow::bail!("このコマンドはDaemonに送信できません")
        }
    }
    Ok(())
}

/// Runs the daemon; the main thread becomes the UI-owning thread.
fn run_daemon(args: &RunArgs, socket: Option<PathBuf>) -> Result<()> {
    let daemon = AlarmDaemon::from_options(&args.to_options(socket))?;

    #[cfg(target_os = "macos")]
    let mut surface = meeting_alarm::ui::TraySurface::new()?;
    #[cfg(not(target_os = "macos"))]
    let mut surface = meeting_alarm::ui::LogSurface::new();

    daemon.run(&mut surface)
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_args() {
        let cli = Cli::parse_from(["meeting-alarm"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["meeting-alarm", "run", "--resync", "30"]);
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.settings.resync, Some(30)),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["meeting-alarm", "--verbose", "status"]);
        assert!(cli.verbose);
    }
}
