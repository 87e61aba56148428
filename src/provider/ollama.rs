//! ローカル推論デーモン（Ollama 互換）アダプター
//!
//! # 責務
//!
//! - `POST /api/chat` による同期的なチャット呼び出し（`stream: false`）
//! - `GET /api/tags` による稼働確認とモデル一覧
//!
//! 接続先は設定の固定ホスト・ポートで、認証はありません。
//! 接続失敗と非 2xx 応答はどちらも通信エラーとして結果に包みます。
//!
//! # 応答例
//!
//! ```json
//! {"model":"llama3","message":{"role":"assistant","content":"Hello!"},"done":true}
//! ```

pub mod client;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, warn};

use self::client::DaemonClient;
use super::traits::AgentBackend;
use crate::config::settings::OllamaConfig;
use crate::engine::deadline::CallDeadline;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::{AgentExecutionResult, ErrorKind};
use crate::error::AgentError;

pub use self::client::DaemonError;

pub(crate) const CHAT_PATH: &str = "/api/chat";
const TAGS_PATH: &str = "/api/tags";
const BACKEND: &str = "Ollama";

/// チャット呼び出しの本文
pub(crate) fn chat_body(model: &str, request: &AgentExecutionRequest) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system_prompt() {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.prompt}));

    json!({
        "model": model,
        "messages": messages,
        "stream": false,
    })
}

/// `message.content` のテキスト
pub(crate) fn chat_reply(value: &Value) -> Option<String> {
    value
        .pointer("/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// ローカルデーモンアダプター
#[derive(Debug, Clone)]
pub struct OllamaAdapter {
    config: OllamaConfig,
    client: DaemonClient,
}

impl OllamaAdapter {
    pub fn new(config: OllamaConfig) -> Self {
        let client = DaemonClient::new(config.host.clone(), config.port);
        Self { config, client }
    }

    /// デーモンが応答するか確認する
    pub async fn is_available(&self) -> bool {
        match self.client.get_json(TAGS_PATH, self.config.probe_timeout).await {
            Ok(_) => true,
            Err(e) => {
                debug!(addr = %self.client.addr(), error = %e, "daemon probe failed");
                false
            }
        }
    }

    /// インストール済みのモデル名一覧
    ///
    /// # 戻り値
    ///
    /// - `Ok(Vec<String>)`: `models[].name` の一覧（名前の無い要素は除外）
    /// - `Err(DaemonError)`: 接続失敗、非 2xx 応答、タイムアウト
    pub async fn list_models(&self) -> Result<Vec<String>, DaemonError> {
        let value = self
            .client
            .get_json(TAGS_PATH, self.config.list_timeout)
            .await?;

        Ok(value
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl AgentBackend for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        let deadline = CallDeadline::start(request.timeout.unwrap_or(self.config.chat_timeout));
        let body = chat_body(model.unwrap_or_default(), request);

        match self.client.post_json(CHAT_PATH, &body, deadline.limit()).await {
            // content が無い応答も空文字列の成功として扱う
            Ok(value) => AgentExecutionResult::success(
                chat_reply(&value).unwrap_or_default(),
                deadline.elapsed_ms(),
            ),
            Err(e) => {
                warn!(addr = %self.client.addr(), error = %e, "daemon chat failed");
                let detail = e.to_string();
                // 文字列一致による判定。DaemonError::Timeout の文言に依存している
                let timed_out = detail.contains("timed out");
                let mut result = AgentExecutionResult::failure(
                    AgentError::Transport {
                        backend: BACKEND,
                        detail,
                    },
                    deadline.elapsed_ms(),
                );
                if timed_out {
                    result.timed_out = true;
                    result.error_kind = Some(ErrorKind::Timeout);
                }
                result
            }
        }
    }
}
