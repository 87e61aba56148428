//! CLI エージェントアダプター
//!
//! # 責務
//!
//! - リクエストを CLI ヘルパー [`CliAgentRunner`] のオプションに翻訳する
//! - 正規のモデル名（`claude` / `default`）を「既定のモデル」として扱う
//! - イベントの送信先をそのままヘルパーに渡す
//!
//! プロセス起動・認証・セッション再開はすべてヘルパー側の責務です。
//!
//! # 既定のヘルパー
//!
//! [`ClaudeCodeRunner`] は Claude Code CLI (`claude` コマンド) を呼び出します。
//!
//! - **インストール**: `npm install -g @anthropic-ai/claude-code`
//! - **認証**: `claude` を起動して `/login`、または `ANTHROPIC_API_KEY`
//!
//! JSON 出力形式 (`--output-format json`):
//!
//! ```json
//! {
//!   "type": "result",
//!   "is_error": false,
//!   "result": "Done. The tests pass now.",
//!   "session_id": "4f1c..."
//! }
//! ```

use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::AgentBackend;
use crate::config::model::HostedProvider;
use crate::config::settings::ClaudeConfig;
use crate::engine::deadline::CallDeadline;
use crate::engine::observer::{AgentEvent, EventSink, LogEntry, emit};
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::{AgentExecutionResult, ErrorKind};
use crate::error::AgentError;

/// 「既定のモデルを使う」を意味するモデル名
const DEFAULT_MODEL_ALIASES: [&str; 2] = ["claude", "default"];

const BACKEND: &str = "Claude CLI";

/// CLI ヘルパーに渡すオプション
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CliRunOptions {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// `None` ならヘルパーの既定モデル
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub resume_session_id: Option<String>,
    pub timeout: Option<Duration>,
    pub api_key: Option<String>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
}

impl fmt::Debug for CliRunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliRunOptions")
            .field("prompt_len", &self.prompt.len())
            .field("system_prompt", &self.system_prompt.is_some())
            .field("model", &self.model)
            .field("max_turns", &self.max_turns)
            .field("resume_session_id", &self.resume_session_id)
            .field("timeout", &self.timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .finish()
    }
}

/// 対話型エージェント CLI を最後まで面倒見るヘルパー
#[async_trait]
pub trait CliAgentRunner: Send + Sync {
    async fn run(
        &self,
        options: CliRunOptions,
        events: Option<EventSink>,
    ) -> AgentExecutionResult;
}

/// CLI エージェントアダプター
#[derive(Clone)]
pub struct CliAdapter {
    runner: Arc<dyn CliAgentRunner>,
}

impl CliAdapter {
    pub fn new(runner: Arc<dyn CliAgentRunner>) -> Self {
        Self { runner }
    }

    /// リクエストをヘルパーのオプションに翻訳する
    pub fn options(model: Option<&str>, request: &AgentExecutionRequest) -> CliRunOptions {
        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty() && !DEFAULT_MODEL_ALIASES.contains(m))
            .map(str::to_string);

        CliRunOptions {
            prompt: request.prompt.clone(),
            system_prompt: request.system_prompt().map(str::to_string),
            model,
            max_turns: request.max_turns,
            resume_session_id: request.resume_session_id.clone(),
            timeout: request.timeout,
            api_key: request.credential.clone(),
            allowed_tools: request.allowed_tools.clone(),
            disallowed_tools: request.disallowed_tools.clone(),
        }
    }
}

#[async_trait]
impl AgentBackend for CliAdapter {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        self.runner
            .run(Self::options(model, request), request.events.clone())
            .await
    }
}

/// Claude Code CLI ヘルパー
#[derive(Debug, Clone)]
pub struct ClaudeCodeRunner {
    config: ClaudeConfig,
}

impl ClaudeCodeRunner {
    pub fn new(config: ClaudeConfig) -> Self {
        Self { config }
    }

    /// CLI 引数を組み立てる
    pub fn build_args(options: &CliRunOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            options.prompt.clone(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        if let Some(model) = &options.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        if let Some(max_turns) = options.max_turns {
            args.extend(["--max-turns".to_string(), max_turns.to_string()]);
        }
        if let Some(system) = &options.system_prompt {
            args.extend(["--append-system-prompt".to_string(), system.clone()]);
        }
        if let Some(session) = &options.resume_session_id {
            args.extend(["--resume".to_string(), session.clone()]);
        }
        if !options.allowed_tools.is_empty() {
            args.extend(["--allowedTools".to_string(), options.allowed_tools.join(",")]);
        }
        if !options.disallowed_tools.is_empty() {
            args.extend([
                "--disallowedTools".to_string(),
                options.disallowed_tools.join(","),
            ]);
        }
        args
    }
}

#[async_trait]
impl CliAgentRunner for ClaudeCodeRunner {
    async fn run(
        &self,
        options: CliRunOptions,
        events: Option<EventSink>,
    ) -> AgentExecutionResult {
        let deadline = CallDeadline::start(options.timeout.unwrap_or(self.config.default_timeout));
        let resumed = options
            .resume_session_id
            .clone()
            .filter(|id| !id.trim().is_empty());
        let args = Self::build_args(&options);
        debug!(program = %self.config.program, ?args, "spawning claude cli");

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(key) = &options.api_key {
            command.env(HostedProvider::Anthropic.env_var(), key);
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return AgentExecutionResult::failure(
                    AgentError::Spawn {
                        program: self.config.program.clone(),
                        detail: e.to_string(),
                    },
                    deadline.elapsed_ms(),
                )
                .with_session_id(resumed);
            }
        };

        // 期限切れで Future ごと破棄され、kill_on_drop によりプロセスも終了する
        let output = match deadline.run(child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return AgentExecutionResult::failure(
                    AgentError::Transport {
                        backend: BACKEND,
                        detail: e.to_string(),
                    },
                    deadline.elapsed_ms(),
                )
                .with_session_id(resumed);
            }
            Err(_) => {
                warn!(limit = ?deadline.limit(), "claude cli timed out");
                return AgentExecutionResult::failure(
                    AgentError::Timeout {
                        backend: BACKEND,
                        after: deadline.limit(),
                    },
                    deadline.elapsed_ms(),
                )
                .with_session_id(resumed);
            }
        };

        let result = interpret_output(
            output.status.code(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            resumed,
            deadline.elapsed_ms(),
        );
        if result.is_success() && !result.output.is_empty() {
            emit(
                events.as_ref(),
                AgentEvent::Log(LogEntry::assistant_text(result.output.clone())),
            );
        }
        result
    }
}

/// `claude --output-format json` の出力形式
#[derive(Debug, Deserialize)]
struct ClaudeCliResponse {
    #[serde(default)]
    result: Option<String>,

    #[serde(default)]
    session_id: Option<String>,

    #[serde(default)]
    is_error: bool,
}

/// 終了コードと出力から結果を組み立てる
///
/// JSON として読めない出力は、標準出力（空なら標準エラー）をそのまま返します。
/// CLI が新しいセッション ID を返さない場合は `resumed` を引き継ぎます。
fn interpret_output(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
    resumed: Option<String>,
    duration_ms: u64,
) -> AgentExecutionResult {
    let exited_cleanly = code == Some(0);
    let failure_code = code.filter(|c| *c != 0).unwrap_or(1);

    match serde_json::from_str::<ClaudeCliResponse>(stdout.trim()) {
        Ok(response) => {
            let failed = response.is_error || !exited_cleanly;
            AgentExecutionResult {
                output: response.result.unwrap_or_default().trim().to_string(),
                exit_code: if failed { failure_code } else { 0 },
                duration_ms,
                session_id: response.session_id.filter(|id| !id.is_empty()).or(resumed),
                timed_out: false,
                error_kind: failed.then_some(ErrorKind::Transport),
            }
        }
        Err(e) => {
            debug!(error = %e, "claude cli output is not JSON");
            let text = match stdout.trim() {
                "" => stderr.trim(),
                text => text,
            };
            let result = if exited_cleanly {
                AgentExecutionResult::degraded(text.to_string(), duration_ms)
            } else {
                AgentExecutionResult {
                    exit_code: failure_code,
                    error_kind: Some(ErrorKind::Transport),
                    ..AgentExecutionResult::success(text.to_string(), duration_ms)
                }
            };
            result.with_session_id(resumed)
        }
    }
}
