//! 実行中イベントのストリーム
//!
//! コールバックの代わりに、呼び出し側が結果の Future とは独立に
//! 受信できるイベントチャネルを提供します。
//!
//! ```rust
//! use agent_dispatch::engine::observer::{event_channel, AgentEvent, LogEntry};
//!
//! let (sink, mut events) = event_channel();
//! sink.send(AgentEvent::Log(LogEntry::assistant_text("hello"))).unwrap();
//!
//! assert!(matches!(events.try_recv(), Ok(AgentEvent::Log(_))));
//! ```

use serde::Serialize;
use tokio::sync::mpsc;

/// イベントの送信側（リクエストに添付する）
pub type EventSink = mpsc::UnboundedSender<AgentEvent>;

/// イベントの受信側（呼び出し側が保持する）
pub type EventStream = mpsc::UnboundedReceiver<AgentEvent>;

/// イベントチャネルを生成
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// 実行中に発生するイベント
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 途中経過のテキスト
    Progress(String),
    /// 構造化ログエントリ
    Log(LogEntry),
}

/// 構造化ログエントリ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub entry_type: LogEntryType,
    pub content: String,
}

/// ログエントリの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogEntryType {
    AssistantText,
    ToolCall,
    ToolResult,
}

impl LogEntry {
    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            entry_type: LogEntryType::AssistantText,
            content: content.into(),
        }
    }

    pub fn tool_call(content: impl Into<String>) -> Self {
        Self {
            entry_type: LogEntryType::ToolCall,
            content: content.into(),
        }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self {
            entry_type: LogEntryType::ToolResult,
            content: content.into(),
        }
    }
}

/// シンクがあればイベントを送る
///
/// 受信側が破棄されていても無視します。
pub(crate) fn emit(sink: Option<&EventSink>, event: AgentEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}
