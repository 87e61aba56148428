//! ホスト型 API アダプター共通の処理
//!
//! - 認証情報の解決（リクエスト → 設定の順、どちらも無ければ即失敗）
//! - 期限付きの送信（期限切れで Future を破棄して通信を中断）
//! - 非成功ステータスのエラーメッセージ抽出
//! - 応答本文からのテキスト抽出（文字列、または型付きブロックの配列）

use std::error::Error as StdError;

use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::model::HostedProvider;
use crate::config::settings::Credentials;
use crate::engine::deadline::CallDeadline;
use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::AgentExecutionResult;
use crate::error::AgentError;

/// ログとエラーメッセージ用のバックエンド名
pub(crate) fn api_label(provider: HostedProvider) -> &'static str {
    match provider {
        HostedProvider::OpenAi => "OpenAI API",
        HostedProvider::Anthropic => "Anthropic API",
    }
}

/// 認証情報を解決する
///
/// 呼び出し単位の認証情報が設定より優先されます。
pub(crate) fn resolve_credential<'a>(
    provider: HostedProvider,
    request: &'a AgentExecutionRequest,
    credentials: &'a Credentials,
) -> Result<&'a str, AgentError> {
    request
        .credential
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .or_else(|| credentials.key_for(provider))
        .ok_or(AgentError::MissingApiKey {
            provider: provider.label(),
            env_var: provider.env_var(),
        })
}

/// リクエストを送り、結果を統一形式に変換する
///
/// `extract` は成功時の JSON からアシスタントのテキストを取り出す関数です。
/// 取り出せない場合は本文全体を文字列化して返します（劣化した成功）。
pub(crate) async fn complete(
    provider: HostedProvider,
    builder: RequestBuilder,
    deadline: &CallDeadline,
    extract: fn(&Value) -> Option<String>,
) -> AgentExecutionResult {
    let call = async {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };

    let (status, body) = match deadline.run(call).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!(provider = provider.label(), error = %e, "hosted API request failed");
            return AgentExecutionResult::failure(
                AgentError::Transport {
                    backend: api_label(provider),
                    detail: error_chain(&e),
                },
                deadline.elapsed_ms(),
            );
        }
        Err(_) => {
            warn!(
                provider = provider.label(),
                limit = ?deadline.limit(),
                "hosted API request timed out"
            );
            return AgentExecutionResult::failure(
                AgentError::Timeout {
                    backend: api_label(provider),
                    after: deadline.limit(),
                },
                deadline.elapsed_ms(),
            );
        }
    };

    if !status.is_success() {
        return AgentExecutionResult::failure(
            AgentError::ApiStatus {
                provider: provider.label(),
                status: status.as_u16(),
                message: error_message(&body),
            },
            deadline.elapsed_ms(),
        );
    }

    match serde_json::from_str::<Value>(&body) {
        Ok(value) => match extract(&value) {
            Some(text) => {
                debug!(provider = provider.label(), chars = text.len(), "hosted API completed");
                AgentExecutionResult::success(text, deadline.elapsed_ms())
            }
            None => {
                warn!(provider = provider.label(), "unrecognized response shape; returning body");
                AgentExecutionResult::degraded(value.to_string(), deadline.elapsed_ms())
            }
        },
        Err(e) => {
            warn!(provider = provider.label(), error = %e, "response body is not JSON");
            AgentExecutionResult::degraded(body, deadline.elapsed_ms())
        }
    }
}

/// 非成功応答のメッセージ
///
/// `error.message` があればそれを、無ければ本文全体を返します。
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// 文字列、または `{type:"text", text}` ブロックの配列からテキストを取り出す
pub(crate) fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(text) => Some(text.as_str()),
                    Value::Object(fields) => {
                        let is_text = fields
                            .get("type")
                            .and_then(Value::as_str)
                            .is_none_or(|t| t == "text" || t == "output_text");
                        if is_text {
                            fields.get("text").and_then(Value::as_str)
                        } else {
                            None
                        }
                    }
                    _ => None,
                })
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

/// reqwest のエラーは原因を辿らないと「接続拒否」等が見えないため連結する
fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
