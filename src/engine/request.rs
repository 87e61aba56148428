//! エージェント実行リクエスト
//!
//! # 責務
//!
//! - 「このプロンプトをこのモデルで実行する」という汎用リクエストの表現
//! - ビルダー形式のオプション設定
//!
//! リクエストは呼び出しごとに生成され、1 つのアダプターに消費されます。
//!
//! # 使用例
//!
//! ```rust
//! use std::time::Duration;
//! use agent_dispatch::engine::request::AgentExecutionRequest;
//!
//! let request = AgentExecutionRequest::new("codex", "Fix the failing test")
//!     .with_system_prompt("You are the queen of this room.")
//!     .with_timeout(Duration::from_secs(120))
//!     .with_resume_session("thread-42");
//!
//! assert_eq!(request.resume_session_id.as_deref(), Some("thread-42"));
//! ```

use std::fmt;
use std::time::Duration;

use super::observer::EventSink;

/// エージェント実行リクエスト
#[derive(Clone, Default)]
pub struct AgentExecutionRequest {
    /// モデル識別子（例: "codex", "openai:gpt-4o-mini", "ollama:llama3"）
    pub model: String,

    /// ユーザープロンプト
    pub prompt: String,

    /// システムプロンプト
    pub system_prompt: Option<String>,

    /// 最大ターン数
    pub max_turns: Option<u32>,

    /// タイムアウト（未指定ならアダプターの既定値）
    pub timeout: Option<Duration>,

    /// 再開するセッション ID
    pub resume_session_id: Option<String>,

    /// 呼び出し単位の認証情報（設定より優先）
    pub credential: Option<String>,

    /// リモートステーション名（ローカルデーモン向けモデルをリモートで実行する）
    pub station: Option<String>,

    /// 許可するツール
    pub allowed_tools: Vec<String>,

    /// 禁止するツール
    pub disallowed_tools: Vec<String>,

    /// 実行中イベントの送信先
    pub events: Option<EventSink>,
}

impl AgentExecutionRequest {
    /// 新しいリクエストを生成
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_resume_session(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session_id = Some(session_id.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_disallowed_tools(mut self, tools: Vec<String>) -> Self {
        self.disallowed_tools = tools;
        self
    }

    /// イベントの送信先を設定
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// 空でないシステムプロンプト
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

// 認証情報をログに出さない
impl fmt::Debug for AgentExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentExecutionRequest")
            .field("model", &self.model)
            .field("prompt_len", &self.prompt.len())
            .field("system_prompt", &self.system_prompt.is_some())
            .field("max_turns", &self.max_turns)
            .field("timeout", &self.timeout)
            .field("resume_session_id", &self.resume_session_id)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("station", &self.station)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("events", &self.events.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let request = AgentExecutionRequest::new("openai", "hello")
            .with_system_prompt("be brief")
            .with_max_turns(3)
            .with_credential("sk-test")
            .with_allowed_tools(vec!["Read".to_string()]);

        assert_eq!(request.model, "openai");
        assert_eq!(request.system_prompt(), Some("be brief"));
        assert_eq!(request.max_turns, Some(3));
        assert_eq!(request.allowed_tools, vec!["Read".to_string()]);
    }

    #[test]
    fn test_blank_system_prompt_is_ignored() {
        let request = AgentExecutionRequest::new("codex", "hi").with_system_prompt("   ");
        assert_eq!(request.system_prompt(), None);
    }

    #[test]
    fn test_debug_redacts_credential() {
        let request = AgentExecutionRequest::new("anthropic", "hi").with_credential("sk-secret");
        let debug = format!("{:?}", request);

        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
