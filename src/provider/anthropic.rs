//! Anthropic 形式のホスト型 API アダプター
//!
//! # 責務
//!
//! - `POST {base_url}/v1/messages` への単発リクエスト
//! - システム指示をトップレベルの `system` フィールドで送る
//! - `x-api-key` と `anthropic-version` ヘッダーによる認証
//!
//! # 応答例
//!
//! ```json
//! {
//!   "id": "msg_01",
//!   "content": [{"type": "text", "text": "Hello!"}],
//!   "stop_reason": "end_turn"
//! }
//! ```
//!
//! `content` のうち `text` ブロックだけを改行で連結して出力にします。

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use super::http_api::{self, resolve_credential};
use super::traits::AgentBackend;
use crate::config::model::HostedProvider;
use crate::config::settings::{AnthropicConfig, Credentials};
use crate::engine::deadline::CallDeadline;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::AgentExecutionResult;

const PROVIDER: HostedProvider = HostedProvider::Anthropic;

/// Anthropic 形式 API アダプター
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    config: AnthropicConfig,
    credentials: Credentials,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(config: AnthropicConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
            client: reqwest::Client::new(),
        }
    }

    /// リクエスト本文を組み立てる
    pub fn build_body(&self, model: &str, request: &AgentExecutionRequest) -> Value {
        let mut body = json!({
            "model": model,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = request.system_prompt() {
            body["system"] = Value::String(system.to_string());
        }
        body
    }
}

fn extract_reply(value: &Value) -> Option<String> {
    value.get("content").and_then(http_api::extract_text)
}

#[async_trait]
impl AgentBackend for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult {
        let deadline =
            CallDeadline::start(request.timeout.unwrap_or(self.config.api.default_timeout));

        let key = match resolve_credential(PROVIDER, request, &self.credentials) {
            Ok(key) => key,
            Err(e) => return AgentExecutionResult::failure(e, deadline.elapsed_ms()),
        };

        let model = model.unwrap_or(&self.config.api.default_model);
        let builder = self
            .client
            .post(format!("{}/v1/messages", self.config.api.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", &self.config.api_version)
            .header(CONTENT_TYPE, "application/json")
            .body(self.build_body(model, request).to_string());

        http_api::complete(PROVIDER, builder, &deadline, extract_reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::ErrorKind;
    use mockito::{Matcher, Server};

    const PATH: &str = "/v1/messages";

    fn adapter(base_url: String, credentials: Credentials) -> AnthropicAdapter {
        let mut config = AnthropicConfig::default();
        config.api.base_url = base_url;
        AnthropicAdapter::new(config, credentials)
    }

    #[test]
    fn test_build_body_places_system_at_top_level() {
        let adapter = adapter("http://unused".to_string(), Credentials::default());
        let request =
            AgentExecutionRequest::new("anthropic", "hello").with_system_prompt("be brief");

        let body = adapter.build_body("claude-haiku-4-5", &request);

        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"], json!([{"role": "user", "content": "hello"}]));
    }

    #[test]
    fn test_build_body_without_system() {
        let adapter = adapter("http://unused".to_string(), Credentials::default());
        let body = adapter.build_body("m", &AgentExecutionRequest::new("anthropic", "hello"));

        assert!(body.get("system").is_none());
    }

    #[tokio::test]
    async fn test_success_joins_text_blocks() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("x-api-key", "sk-ant-test")
            .match_header("anthropic-version", "2023-06-01")
            .match_body(Matcher::PartialJson(json!({
                "model": "claude-haiku-4-5",
                "system": "sys"
            })))
            .with_status(200)
            .with_body(
                r#"{"content":[{"type":"text","text":"first"},{"type":"tool_use","id":"t","name":"x","input":{}},{"type":"text","text":"second"}]}"#,
            )
            .create_async()
            .await;

        let adapter = adapter(server.url(), Credentials::default().with_anthropic("sk-ant-test"));
        let request = AgentExecutionRequest::new("anthropic:claude-haiku-4-5", "hi")
            .with_system_prompt("sys");

        let result = adapter.execute(Some("claude-haiku-4-5"), &request).await;

        mock.assert_async().await;
        assert_eq!(result.output, "first\nsecond");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.session_id, None);
    }

    #[tokio::test]
    async fn test_default_model_is_used() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_body(Matcher::PartialJson(json!({"model": "claude-sonnet-4-5"})))
            .with_status(200)
            .with_body(r#"{"content":[{"type":"text","text":"ok"}]}"#)
            .create_async()
            .await;

        let adapter = adapter(server.url(), Credentials::default().with_anthropic("k"));
        let result = adapter
            .execute(None, &AgentExecutionRequest::new("anthropic", "hi"))
            .await;

        mock.assert_async().await;
        assert_eq!(result.output, "ok");
    }

    #[tokio::test]
    async fn test_error_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .with_status(529)
            .with_body(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .create_async()
            .await;

        let adapter = adapter(server.url(), Credentials::default().with_anthropic("k"));
        let result = adapter
            .execute(None, &AgentExecutionRequest::new("anthropic", "hi"))
            .await;

        assert_eq!(result.exit_code, 1);
        assert_eq!(result.output, "Anthropic API 529: Overloaded");
        assert_eq!(result.error_kind, Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_request() {
        let mut server = Server::new_async().await;
        let mock = server.mock("POST", PATH).expect(0).create_async().await;

        let adapter = adapter(server.url(), Credentials::default().with_openai("wrong-provider"));
        let result = adapter
            .execute(None, &AgentExecutionRequest::new("anthropic", "hi"))
            .await;

        mock.assert_async().await;
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        // 解放直後のポートには誰も待ち受けていない
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let adapter = adapter(base_url, Credentials::default().with_anthropic("k"));
        let result = adapter
            .execute(None, &AgentExecutionRequest::new("anthropic", "hi"))
            .await;

        assert_eq!(result.exit_code, 1);
        assert!(!result.timed_out);
        assert!(result.output.starts_with("Anthropic API request failed"));
        assert_eq!(result.error_kind, Some(ErrorKind::Transport));
    }
}
