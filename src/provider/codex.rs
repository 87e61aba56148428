//! OpenAI Codex CLI ストリーミングアダプター
//!
//! # 責務
//!
//! - Codex CLI (`codex exec --json`) を子プロセスとして起動
//! - 標準出力の JSONL イベントストリームを逐次解析し、1 つのテキスト結果にまとめる
//! - スレッド ID によるセッション継続（`codex exec resume <id>`）
//! - タイムアウト時の段階的な停止（SIGTERM → 猶予 → SIGKILL）
//!
//! # CLIツール
//!
//! - **コマンド**: `codex exec [--model <model>] --json --skip-git-repo-check [resume <id>] "prompt"`
//! - **インストール**: `npm install -g @openai/codex`
//!
//! # 決着（settlement）
//!
//! 子プロセス・標準出力・タイマーはすべて 1 つの `select!` ループが所有します。
//! ループは「正常終了」「タイムアウト」「待機エラー」のいずれか 1 つで抜けるため、
//! 結果は構造上ちょうど 1 回だけ生成されます。
//! 正常終了とタイマーが同じポーリングで準備完了になった場合は正常終了を優先します。

mod stream;

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use self::stream::CodexStream;
use super::traits::AgentBackend;
use crate::config::settings::CodexConfig;
use crate::engine::deadline::CallDeadline;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::{AgentExecutionResult, ErrorKind};
use crate::error::AgentError;

/// 1 回の read で読む最大バイト数
const READ_CHUNK: usize = 8 * 1024;

/// 決着後にパイプの残りを読み切るまでの上限
///
/// 孫プロセスがパイプを握ったままの場合でも呼び出しが戻れるようにする。
const DRAIN_WINDOW: Duration = Duration::from_secs(2);

const BACKEND: &str = "Codex";

/// システム指示とユーザープロンプトを 1 つの引数にまとめる
///
/// Codex CLI はプロンプトを 1 つの位置引数でしか受け取らないため、次の形にします。
///
/// ```text
/// <system-instructions>
/// {system}
/// </system-instructions>
///
/// {prompt}
/// ```
pub fn compose_prompt(system_prompt: Option<&str>, prompt: &str) -> String {
    match system_prompt {
        Some(system) => format!(
            "<system-instructions>\n{}\n</system-instructions>\n\n{}",
            system.trim(),
            prompt
        ),
        None => prompt.to_string(),
    }
}

/// エージェントメッセージを空行区切りで結合し、無ければ stderr → stdout → 空文字の順で代替する
pub fn assemble_output(messages: &[String], stderr: &str, stdout: &str) -> String {
    if !messages.is_empty() {
        return messages.join("\n\n").trim().to_string();
    }
    [stderr.trim(), stdout.trim()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// ループの決着
#[derive(Debug)]
enum Settlement {
    Exited(ExitStatus),
    TimedOut,
    Failed(std::io::Error),
}

/// OpenAI Codex CLI アダプター
#[derive(Debug, Clone)]
pub struct CodexAdapter {
    config: CodexConfig,
}

impl CodexAdapter {
    /// 新しいアダプターを生成
    pub fn new(config: CodexConfig) -> Self {
        Self { config }
    }

    /// 引数リストを組み立てる
    ///
    /// モデル上書きはサブコマンド `exec` の直後、再開指定は合成済みプロンプトの直前に入ります。
    pub fn build_args(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> Vec<String> {
        let mut args = self.config.leading_args.clone();
        args.push("exec".to_string());

        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            args.push("--model".to_string());
            args.push(model.to_string());
        }

        args.push("--json".to_string());
        args.push("--skip-git-repo-check".to_string());

        if let Some(session_id) = resume_id(request) {
            args.push("resume".to_string());
            args.push(session_id.to_string());
        }

        args.push(compose_prompt(request.system_prompt(), &request.prompt));
        args
    }

    async fn run(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        let deadline = CallDeadline::start(request.timeout.unwrap_or(self.config.default_timeout));
        let args = self.build_args(model, request);
        debug!(
            program = %self.config.program,
            arg_count = args.len(),
            resume = resume_id(request).is_some(),
            "spawning codex"
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, program = %self.config.program, "failed to spawn codex");
                return AgentExecutionResult::failure(
                    AgentError::Spawn {
                        program: self.config.program.clone(),
                        detail: e.to_string(),
                    },
                    deadline.elapsed_ms(),
                )
                .with_session_id(resume_id(request).map(str::to_string));
            }
        };

        let (Some(mut stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            // 途中まで生成されたプロセスは必ず止める
            let _ = child.start_kill();
            let _ = child.wait().await;
            return AgentExecutionResult::failure(
                AgentError::Spawn {
                    program: self.config.program.clone(),
                    detail: "stdout/stderr pipes were not available".to_string(),
                },
                deadline.elapsed_ms(),
            )
            .with_session_id(resume_id(request).map(str::to_string));
        };

        let mut stderr_task = tokio::spawn(read_all(stderr));
        let mut stream = CodexStream::new(request.events.clone());
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut stdout_open = true;

        let settlement = loop {
            tokio::select! {
                biased;
                status = child.wait() => break match status {
                    Ok(status) => Settlement::Exited(status),
                    Err(e) => Settlement::Failed(e),
                },
                _ = deadline.expired() => break Settlement::TimedOut,
                read = stdout.read(&mut chunk), if stdout_open => match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => stream.feed(&chunk[..n]),
                    Err(e) => {
                        warn!(error = %e, "codex stdout read failed");
                        stdout_open = false;
                    }
                },
            }
        };

        let (status, timed_out) = match settlement {
            Settlement::Exited(status) => (Some(status), false),
            Settlement::TimedOut => {
                info!(limit = ?deadline.limit(), "codex timed out; terminating");
                (self.terminate(&mut child).await, true)
            }
            Settlement::Failed(e) => {
                warn!(error = %e, "waiting on codex failed");
                let _ = child.start_kill();
                let _ = child.wait().await;
                return AgentExecutionResult::failure(
                    AgentError::Transport {
                        backend: BACKEND,
                        detail: e.to_string(),
                    },
                    deadline.elapsed_ms(),
                )
                .with_session_id(resume_id(request).map(str::to_string));
            }
        };

        if stdout_open {
            drain_stdout(&mut stdout, &mut chunk, &mut stream).await;
        }
        stream.finish();

        let stderr_text = match tokio::time::timeout(DRAIN_WINDOW, &mut stderr_task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "codex stderr reader failed");
                String::new()
            }
            Err(_) => {
                stderr_task.abort();
                String::new()
            }
        };

        let session_id = stream
            .thread_id()
            .map(str::to_string)
            .or_else(|| resume_id(request).map(str::to_string));
        let output = assemble_output(stream.messages(), &stderr_text, &stream.raw_stdout());
        let duration_ms = deadline.elapsed_ms();

        if timed_out {
            let output = if output.is_empty() {
                AgentError::Timeout {
                    backend: BACKEND,
                    after: deadline.limit(),
                }
                .to_string()
            } else {
                output
            };
            return AgentExecutionResult {
                output,
                exit_code: 1,
                duration_ms,
                session_id,
                timed_out: true,
                error_kind: Some(ErrorKind::Timeout),
            };
        }

        let exit_code = status.and_then(|s| s.code()).unwrap_or(1);
        info!(exit_code, duration_ms, messages = stream.messages().len(), "codex finished");

        AgentExecutionResult {
            output,
            exit_code,
            duration_ms,
            session_id,
            timed_out: false,
            error_kind: None,
        }
    }

    /// 段階的に停止する（SIGTERM → 猶予 → SIGKILL）
    async fn terminate(&self, child: &mut Child) -> Option<ExitStatus> {
        #[cfg(unix)]
        signal_process_group(child, nix::sys::signal::Signal::SIGTERM);
        #[cfg(not(unix))]
        let _ = child.start_kill();

        match tokio::time::timeout(self.config.kill_grace, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                warn!(grace = ?self.config.kill_grace, "codex ignored SIGTERM; sending SIGKILL");
                #[cfg(unix)]
                signal_process_group(child, nix::sys::signal::Signal::SIGKILL);
                let _ = child.start_kill();
                child.wait().await.ok()
            }
        }
    }
}

#[async_trait]
impl AgentBackend for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        self.run(model, request).await
    }
}

fn resume_id(request: &AgentExecutionRequest) -> Option<&str> {
    request
        .resume_session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// 子プロセスのプロセスグループ全体にシグナルを送る
///
/// 子は `process_group(0)` で起動しているため、PGID は PID と等しい。
#[cfg(unix)]
fn signal_process_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), signal) {
        debug!(error = %e, ?signal, pid, "killpg failed");
    }
}

/// 決着後に標準出力の残りを読み切る（上限つき）
async fn drain_stdout(stdout: &mut ChildStdout, chunk: &mut [u8], stream: &mut CodexStream) {
    let drain = async {
        loop {
            match stdout.read(chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => stream.feed(&chunk[..n]),
            }
        }
    };
    if tokio::time::timeout(DRAIN_WINDOW, drain).await.is_err() {
        debug!("codex stdout still open after drain window");
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "stderr read ended with error");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
