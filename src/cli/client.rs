//! IPC Client for communicating with the Meeting Alarm daemon.
//!
//! One connection per command: the request is written, the write half is
//! shut down, and the daemon's JSON reply is read until it closes.
//! Connection failures are retried with a growing delay.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::daemon::ipc::expand_socket_path;
use crate::daemon::DEFAULT_SOCKET_PATH;
use crate::types::{ConfigureParams, IpcRequest, IpcResponse};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed to connect and to complete each read or write
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest reply accepted from the daemon, in bytes
const MAX_RESPONSE_SIZE: u64 = 64 * 1024;

/// Attempts per command, the first included
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts; attempt `n` waits `n` times this
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

// ============================================================================
// IpcClient
// ============================================================================

/// Sends CLI commands to the daemon's control socket.
#[derive(Debug, Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    retry_delay: Duration,
}

impl IpcClient {
    /// Client for the socket under the home directory.
    pub fn new() -> Self {
        Self::with_socket_path(expand_socket_path(DEFAULT_SOCKET_PATH))
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Overrides the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Queries the daemon state.
    pub async fn status(&self) -> Result<IpcResponse> {
        self.request(&IpcRequest::Status).await
    }

    /// Asks the daemon to fetch the calendar now.
    pub async fn refresh(&self) -> Result<IpcResponse> {
        self.request(&IpcRequest::Refresh).await
    }

    /// Asks the daemon to restart its periodic jobs.
    pub async fn restart(&self) -> Result<IpcResponse> {
        self.request(&IpcRequest::Restart).await
    }

    /// Submits a credential to the pending sign-in prompt.
    pub async fn sign_in(&self, token: &str) -> Result<IpcResponse> {
        self.request(&IpcRequest::SignIn {
            token: token.to_string(),
        })
        .await
    }

    /// Cancels the pending sign-in prompt.
    pub async fn cancel_sign_in(&self) -> Result<IpcResponse> {
        self.request(&IpcRequest::CancelSignIn).await
    }

    /// Changes settings of the running daemon.
    ///
    /// # Errors
    ///
    /// Fails without contacting the daemon when `params` sets nothing.
    pub async fn configure(&self, params: ConfigureParams) -> Result<IpcResponse> {
        if params.is_empty() {
            anyhow::bail!("変更する設定を1つ以上指定してください");
        }
        self.request(&IpcRequest::Configure { params }).await
    }

    /// Sends `request`, retrying only when the daemon could not be reached
    /// or the exchange broke off. An error reply is final, so commands with
    /// side effects never run twice.
    async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut attempt = 1;
        let response = loop {
            match self.exchange(request).await {
                Ok(response) => break response,
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!("リクエスト失敗 (試行 {}/{}): {:#}", attempt, MAX_ATTEMPTS, e);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if !response.is_success() {
            anyhow::bail!("{}", response.message);
        }
        Ok(response)
    }

    /// One connection: write the request, half-close, read the reply.
    async fn exchange(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let body = serde_json::to_vec(request).context("リクエストをシリアライズできません")?;

        let mut stream = timeout(IO_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .context("接続がタイムアウトしました")?
            .context("Daemonに接続できません。'meeting-alarm run' を起動してください")?;

        timeout(IO_TIMEOUT, async {
            stream.write_all(&body).await?;
            stream.shutdown().await
        })
        .await
        .context("リクエストの送信がタイムアウトしました")?
        .context("リクエストを送信できません")?;

        let mut reply = Vec::new();
        timeout(IO_TIMEOUT, (&mut stream).take(MAX_RESPONSE_SIZE).read_to_end(&mut reply))
            .await
            .context("応答の受信がタイムアウトしました")?
            .context("応答を受信できません")?;

        if reply.is_empty() {
            anyhow::bail!("Daemonからの応答がありませんでした");
        }
        serde_json::from_slice(&reply).context("応答を解釈できません")
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
