//! エージェント実行ディスパッチャー
//!
//! # 責務
//!
//! - モデル識別子を [`ModelSpec`] に解析し、対応するアダプターを網羅的に選択
//! - 各呼び出しを `agent_call` スパンの中で実行
//! - 呼び出し間で可変状態を共有しない（並行呼び出しは呼び出し側の責務）
//!
//! # 使用例
//!
//! ```rust,no_run
//! use agent_dispatch::config::settings::{Credentials, DispatcherConfig};
//! use agent_dispatch::engine::dispatcher::Dispatcher;
//! use agent_dispatch::engine::request::AgentExecutionRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DispatcherConfig::from_file("dispatch.toml")?
//!         .with_credentials(Credentials::from_env());
//!     let dispatcher = Dispatcher::new(config);
//!
//!     let request = AgentExecutionRequest::new("openai:gpt-4o-mini", "Say hi");
//!     let result = dispatcher.execute(&request).await?;
//!
//!     println!("{}", result.to_json()?);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::{Instrument, info, info_span};

use crate::config::model::{HostedProvider, ModelSpec};
use crate::config::settings::DispatcherConfig;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::AgentExecutionResult;
use crate::error::DispatchError;
use crate::provider::anthropic::AnthropicAdapter;
use crate::provider::cli::{ClaudeCodeRunner, CliAdapter, CliAgentRunner};
use crate::provider::codex::CodexAdapter;
use crate::provider::ollama::OllamaAdapter;
use crate::provider::openai::OpenAiAdapter;
use crate::provider::remote::{RemoteDaemonAdapter, RemoteExecutor, SshExecutor};
use crate::provider::traits::AgentBackend;

/// エージェント実行ディスパッチャー
///
/// 生成時に全アダプターを組み立て、以後は読み取り専用で使います。
pub struct Dispatcher {
    config: DispatcherConfig,
    cli: CliAdapter,
    codex: CodexAdapter,
    openai: OpenAiAdapter,
    anthropic: AnthropicAdapter,
    ollama: OllamaAdapter,
    remote: RemoteDaemonAdapter,
}

impl Dispatcher {
    /// 既定の協力者（Claude Code CLI、ssh）でディスパッチャーを生成
    pub fn new(config: DispatcherConfig) -> Self {
        let cli = CliAdapter::new(Arc::new(ClaudeCodeRunner::new(config.claude.clone())));
        let remote = RemoteDaemonAdapter::new(
            config.remote.clone(),
            config.ollama.chat_timeout,
            Arc::new(SshExecutor::new(config.remote.ssh_program.clone())),
        );

        Self {
            cli,
            codex: CodexAdapter::new(config.codex.clone()),
            openai: OpenAiAdapter::new(config.openai.clone(), config.credentials.clone()),
            anthropic: AnthropicAdapter::new(config.anthropic.clone(), config.credentials.clone()),
            ollama: OllamaAdapter::new(config.ollama.clone()),
            remote,
            config,
        }
    }

    /// CLI ヘルパーを差し替える
    pub fn with_cli_runner(mut self, runner: Arc<dyn CliAgentRunner>) -> Self {
        self.cli = CliAdapter::new(runner);
        self
    }

    /// リモート実行の協力者を差し替える
    pub fn with_remote_executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = RemoteDaemonAdapter::new(
            self.config.remote.clone(),
            self.config.ollama.chat_timeout,
            executor,
        );
        self
    }

    /// 有効な設定
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// ローカルデーモン（稼働確認・モデル一覧用）
    pub fn local_daemon(&self) -> &OllamaAdapter {
        &self.ollama
    }

    /// リクエストを実行する
    ///
    /// # 戻り値
    ///
    /// - `Ok(AgentExecutionResult)`: 成功・失敗を問わず、実行結果
    /// - `Err(DispatchError)`: モデル識別子が空（呼び出し側のバグ）
    pub async fn execute(
        &self,
        request: &AgentExecutionRequest,
    ) -> Result<AgentExecutionResult, DispatchError> {
        let spec = ModelSpec::parse(&request.model)?.on_station(request.station.as_deref());
        let (backend, model) = self.route(&spec);
        let span = info_span!("agent_call", backend = backend.name(), model = %spec);

        let result = async {
            info!("agent call started");
            let result = backend.execute(model, request).await;
            info!(
                exit_code = result.exit_code,
                duration_ms = result.duration_ms,
                timed_out = result.timed_out,
                "agent call settled"
            );
            result
        }
        .instrument(span)
        .await;

        Ok(result)
    }

    /// 解析済みのモデル指定に対応するバックエンドとモデル名
    fn route<'a>(&'a self, spec: &'a ModelSpec) -> (&'a dyn AgentBackend, Option<&'a str>) {
        match spec {
            ModelSpec::CliAgent { model } => (&self.cli, Some(model.as_str())),
            ModelSpec::StreamingSubprocess { model } => (&self.codex, model.as_deref()),
            ModelSpec::HostedApi {
                provider: HostedProvider::OpenAi,
                model,
            } => (&self.openai, model.as_deref()),
            ModelSpec::HostedApi {
                provider: HostedProvider::Anthropic,
                model,
            } => (&self.anthropic, model.as_deref()),
            ModelSpec::LocalDaemon { model } => (&self.ollama, Some(model.as_str())),
            // ステーション名はリクエストから読む
            ModelSpec::RemoteDaemon { model, .. } => (&self.remote, Some(model.as_str())),
        }
    }
}
