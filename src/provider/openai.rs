//! OpenAI 形式のホスト型 API アダプター
//!
//! # 責務
//!
//! - `POST {base_url}/v1/chat/completions` への単発リクエスト
//! - システム指示を先頭の `system` ロールのメッセージとして送る
//! - `Authorization: Bearer <key>` による認証
//!
//! セッション継続はありません（`session_id` は常に `None`）。
//!
//! # 応答例
//!
//! ```json
//! {"choices":[{"message":{"role":"assistant","content":"Hello!"}}]}
//! ```

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use super::http_api::{self, resolve_credential};
use super::traits::AgentBackend;
use crate::config::model::HostedProvider;
use crate::config::settings::{Credentials, HostedApiConfig};
use crate::engine::deadline::CallDeadline;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::AgentExecutionResult;

const PROVIDER: HostedProvider = HostedProvider::OpenAi;

/// OpenAI 形式 API アダプター
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    config: HostedApiConfig,
    credentials: Credentials,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    /// 新しいアダプターを生成
    pub fn new(config: HostedApiConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
            client: reqwest::Client::new(),
        }
    }

    /// リクエスト本文を組み立てる
    pub fn build_body(&self, model: &str, request: &AgentExecutionRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        json!({
            "model": model,
            "messages": messages,
        })
    }
}

/// `choices[0].message.content` のテキスト
fn extract_reply(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(http_api::extract_text)
}

#[async_trait]
impl AgentBackend for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        let deadline = CallDeadline::start(request.timeout.unwrap_or(self.config.default_timeout));

        let key = match resolve_credential(PROVIDER, request, &self.credentials) {
            Ok(key) => key,
            Err(e) => return AgentExecutionResult::failure(e, deadline.elapsed_ms()),
        };

        let model = model.unwrap_or(&self.config.default_model);
        let body = self.build_body(model, request);
        let builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.config.base_url))
            .bearer_auth(key)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());

        http_api::complete(PROVIDER, builder, &deadline, extract_reply).await
    }
}
