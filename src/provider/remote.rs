//! リモートステーション上のデーモンを呼び出すアダプター
//!
//! # 責務
//!
//! - ローカルデーモンと同じチャットプロトコルを、リモート実行の協力者経由で実行
//! - 失敗を 3 段階に区別して結果に載せる
//!
//! # 仕組み
//!
//! チャット本文（JSON）を base64 化してコマンド文字列に埋め込み、リモート側で
//! 復号して `curl` でデーモンに送ります。プロンプト中の引用符や改行が
//! シェルに解釈されることはありません。
//!
//! ```text
//! printf '%s' '<base64>' | base64 -d | curl -sS --max-time <inner> -X POST \
//!   -H 'Content-Type: application/json' --data-binary @- http://127.0.0.1:<port>/api/chat
//! ```
//!
//! `curl` 自身のタイムアウト（内側）に対し、協力者の呼び出し（外側）には
//! ネットワークとスケジューリング分の余裕を上乗せします。
//!
//! # 失敗の段階
//!
//! | 状況 | 結果 |
//! |------|------|
//! | 協力者が何も返さない | 失敗（`StationUnreachable`） |
//! | リモートコマンドが非ゼロ終了 | 失敗（リモートの終了コードをそのまま） |
//! | 標準出力が想定の JSON でない | 生テキストでの劣化した成功（`Protocol`） |

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use super::ollama::{CHAT_PATH, chat_body, chat_reply};
use super::traits::AgentBackend;
use crate::config::settings::RemoteConfig;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::AgentExecutionResult;
use crate::error::AgentError;

/// `curl` のタイムアウト終了コード
const CURL_TIMED_OUT: i32 = 28;

/// ssh 自体の失敗（接続不可・認証失敗）を示す終了コード
const SSH_FAILURE: i32 = 255;

/// リモートコマンドの実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// 「ステーション X でシェルコマンドを実行する」協力者
///
/// 到達できなかった場合は `None` を返します。
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(
        &self,
        station: &str,
        command: &str,
        timeout: Duration,
    ) -> Option<RemoteCommandOutput>;
}

/// `ssh -o BatchMode=yes <station> <command>` による既定の協力者
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
}

impl SshExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(
        &self,
        station: &str,
        command: &str,
        timeout: Duration,
    ) -> Option<RemoteCommandOutput> {
        let child = Command::new(&self.program)
            .args(["-o", "BatchMode=yes", station, command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "failed to spawn remote executor");
                return None;
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(station, error = %e, "remote executor failed");
                return None;
            }
            Err(_) => {
                warn!(station, ?timeout, "remote executor timed out");
                return None;
            }
        };

        let exit_code = output.status.code().unwrap_or(1);
        if exit_code == SSH_FAILURE {
            debug!(
                station,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ssh could not reach station"
            );
            return None;
        }

        Some(RemoteCommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// リモートデーモンアダプター
#[derive(Clone)]
pub struct RemoteDaemonAdapter {
    config: RemoteConfig,
    /// リクエストでタイムアウトが指定されない場合の内側タイムアウト
    default_timeout: Duration,
    executor: Arc<dyn RemoteExecutor>,
}

impl RemoteDaemonAdapter {
    pub fn new(
        config: RemoteConfig,
        default_timeout: Duration,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            config,
            default_timeout,
            executor,
        }
    }

    /// リモートで実行するコマンド文字列を組み立てる
    pub fn build_command(&self, payload: &Value, inner_timeout: Duration) -> String {
        let encoded = STANDARD.encode(payload.to_string());
        format!(
            "printf '%s' '{encoded}' | base64 -d | curl -sS --max-time {} -X POST \
             -H 'Content-Type: application/json' --data-binary @- http://127.0.0.1:{}{CHAT_PATH}",
            inner_timeout.as_secs().max(1),
            self.config.daemon_port,
        )
    }

    /// 指定ステーションでチャットを実行する
    pub async fn execute_on(
        &self,
        station: &str,
        model: &str,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        let started = Instant::now();
        let elapsed_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let inner = request.timeout.unwrap_or(self.default_timeout);
        let outer = inner.saturating_add(self.config.overhead);
        let command = self.build_command(&chat_body(model, request), inner);

        debug!(station, model, ?inner, ?outer, "running remote daemon call");
        let Some(output) = self.executor.exec(station, &command, outer).await else {
            return AgentExecutionResult::failure(
                AgentError::StationUnreachable {
                    station: station.to_string(),
                },
                elapsed_ms(),
            );
        };

        if output.exit_code != 0 {
            let stderr = match output.stderr.trim() {
                "" => output.stdout.trim(),
                text => text,
            };
            return AgentExecutionResult::failure(
                AgentError::RemoteCommand {
                    station: station.to_string(),
                    exit_code: output.exit_code,
                    stderr: stderr.to_string(),
                    timed_out: output.exit_code == CURL_TIMED_OUT,
                },
                elapsed_ms(),
            );
        }

        match serde_json::from_str::<Value>(&output.stdout)
            .ok()
            .and_then(|value| chat_reply(&value))
        {
            Some(text) => AgentExecutionResult::success(text, elapsed_ms()),
            None => {
                warn!(station, "remote output is not a chat response; returning raw text");
                AgentExecutionResult::degraded(output.stdout.trim().to_string(), elapsed_ms())
            }
        }
    }
}

#[async_trait]
impl AgentBackend for RemoteDaemonAdapter {
    fn name(&self) -> &'static str {
        "remote-ollama"
    }

    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        let station = request.station.as_deref().map(str::trim).unwrap_or_default();
        self.execute_on(station, model.unwrap_or_default(), request)
            .await
    }
}
