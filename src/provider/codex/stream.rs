//! Codex CLI の JSONL イベントストリーム解析
//!
//! 標準出力は任意の境界で分割されたバイト列として届くため、
//! 未完成の行をチャンクをまたいで保持し、完成した行だけを解析します。
//!
//! ## 認識するイベント
//!
//! ```json
//! {"type":"thread.started","thread_id":"t1"}
//! {"type":"item.completed","item":{"type":"agent_message","text":"Hi there"}}
//! {"type":"item.completed","item":{"type":"command_execution","command":"ls","aggregated_output":"a.rs\n","exit_code":0}}
//! ```
//!
//! 解析できない行と未知のイベントタイプは無視します（前方互換）。

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::engine::observer::{AgentEvent, EventSink, LogEntry, emit};

/// 1 回の呼び出し分のストリーム状態
#[derive(Debug, Default)]
pub(super) struct CodexStream {
    /// 改行がまだ届いていない行の断片
    pending: Vec<u8>,
    /// 受信した標準出力の全体（フォールバック用）
    raw: Vec<u8>,
    /// 到着順のエージェントメッセージ
    messages: Vec<String>,
    /// バックエンドが発行したスレッド ID
    thread_id: Option<String>,
    events: Option<EventSink>,
}

impl CodexStream {
    pub(super) fn new(events: Option<EventSink>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// チャンクを追加し、完成した行をすべて処理する
    pub(super) fn feed(&mut self, chunk: &[u8]) {
        self.raw.extend_from_slice(chunk);
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&line[..pos]);
        }
    }

    /// プロセス終了時に残った断片を最後の 1 行として処理する
    pub(super) fn finish(&mut self) {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.handle_line(&line);
        }
    }

    pub(super) fn messages(&self) -> &[String] {
        &self.messages
    }

    pub(super) fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub(super) fn raw_stdout(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    fn handle_line(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let line = text.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<CodexEvent>(line) {
            Ok(event) => self.apply(event),
            Err(e) => debug!(error = %e, "dropping unparseable codex line"),
        }
    }

    fn apply(&mut self, event: CodexEvent) {
        match event.event_type.as_str() {
            "thread.started" => {
                // 再開時でも新しいスレッドが始まった場合は常に上書きする
                if let Some(id) = event.thread_id.filter(|id| !id.is_empty()) {
                    debug!(thread_id = %id, "codex thread started");
                    self.thread_id = Some(id);
                }
            }
            "item.completed" => {
                if let Some(item) = event.item {
                    self.apply_item(item);
                }
            }
            other => trace!(event_type = other, "ignoring codex event"),
        }
    }

    fn apply_item(&mut self, item: CodexItem) {
        match item.item_type.as_str() {
            "agent_message" => {
                if let Some(text) = item.text {
                    emit(self.events.as_ref(), AgentEvent::Progress(text.clone()));
                    emit(
                        self.events.as_ref(),
                        AgentEvent::Log(LogEntry::assistant_text(text.clone())),
                    );
                    self.messages.push(text);
                }
            }
            "command_execution" => {
                let command = field_text(&item.fields, "command").unwrap_or_default();
                self.log(LogEntry::tool_call(command));

                let output = field_text(&item.fields, "aggregated_output").unwrap_or_default();
                let result = match item.fields.get("exit_code").and_then(Value::as_i64) {
                    Some(code) => format!("{}\n(exit {code})", output.trim_end()),
                    None => output,
                };
                self.log(LogEntry::tool_result(result.trim().to_string()));
            }
            "mcp_tool_call" => {
                let server = field_text(&item.fields, "server").unwrap_or_default();
                let tool = field_text(&item.fields, "tool").unwrap_or_default();
                let arguments = item
                    .fields
                    .get("arguments")
                    .map(Value::to_string)
                    .unwrap_or_default();
                self.log(LogEntry::tool_call(
                    format!("{server}.{tool} {arguments}").trim().to_string(),
                ));

                if let Some(result) = field_text(&item.fields, "error")
                    .or_else(|| field_text(&item.fields, "result"))
                {
                    self.log(LogEntry::tool_result(result));
                }
            }
            "file_change" => {
                let paths: Vec<&str> = item
                    .fields
                    .get("changes")
                    .and_then(Value::as_array)
                    .map(|changes| {
                        changes
                            .iter()
                            .filter_map(|c| c.get("path").and_then(Value::as_str))
                            .collect()
                    })
                    .unwrap_or_default();
                self.log(LogEntry::tool_call(format!("file_change: {}", paths.join(", "))));
            }
            "web_search" => {
                let query = field_text(&item.fields, "query").unwrap_or_default();
                self.log(LogEntry::tool_call(format!("web_search: {query}")));
            }
            "tool_call" => {
                let content = item.text.unwrap_or_else(|| Value::Object(item.fields).to_string());
                self.log(LogEntry::tool_call(content));
            }
            "tool_result" => {
                let content = item
                    .text
                    .or_else(|| field_text(&item.fields, "output"))
                    .unwrap_or_else(|| Value::Object(item.fields).to_string());
                self.log(LogEntry::tool_result(content));
            }
            other => trace!(item_type = other, "ignoring codex item"),
        }
    }

    fn log(&self, entry: LogEntry) {
        emit(self.events.as_ref(), AgentEvent::Log(entry));
    }
}

/// 文字列フィールド、またはそれ以外の値の JSON 表現
fn field_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// JSONL イベント（全イベントタイプの共通構造）
#[derive(Debug, Deserialize)]
struct CodexEvent {
    #[serde(rename = "type")]
    event_type: String,

    #[serde(default, alias = "session_id")]
    thread_id: Option<String>,

    #[serde(default)]
    item: Option<CodexItem>,
}

/// JSONL アイテム（item.completed イベント用）
#[derive(Debug, Deserialize)]
struct CodexItem {
    #[serde(rename = "type")]
    item_type: String,

    #[serde(default)]
    text: Option<String>,

    /// ツール呼び出しのメタデータ
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::observer::{LogEntryType, event_channel};

    const STARTED: &str = r#"{"type":"thread.started","thread_id":"t1"}"#;
    const HELLO: &str = r#"{"type":"item.completed","item":{"type":"agent_message","text":"Hello"}}"#;

    #[test]
    fn test_complete_lines() {
        let mut stream = CodexStream::new(None);
        stream.feed(format!("{STARTED}\n{HELLO}\n").as_bytes());

        assert_eq!(stream.thread_id(), Some("t1"));
        assert_eq!(stream.messages(), ["Hello".to_string()]);
    }

    #[test]
    fn test_partial_line_is_buffered_across_chunks() {
        let mut stream = CodexStream::new(None);
        let (head, tail) = HELLO.split_at(25);

        stream.feed(head.as_bytes());
        assert!(stream.messages().is_empty());

        stream.feed(format!("{tail}\n").as_bytes());
        assert_eq!(stream.messages(), ["Hello".to_string()]);
    }

    #[test]
    fn test_unterminated_tail_is_flushed_on_finish() {
        let mut stream = CodexStream::new(None);
        stream.feed(HELLO.as_bytes());
        assert!(stream.messages().is_empty());

        stream.finish();
        assert_eq!(stream.messages(), ["Hello".to_string()]);

        // 2 回目の finish は何もしない
        stream.finish();
        assert_eq!(stream.messages().len(), 1);
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let line = r#"{"type":"item.completed","item":{"type":"agent_message","text":"こんにちは"}}"#;
        let bytes = format!("{line}\n").into_bytes();
        // マルチバイト文字の途中で分割
        let split = line.find('こ').unwrap() + 1;

        let mut stream = CodexStream::new(None);
        stream.feed(&bytes[..split]);
        stream.feed(&bytes[split..]);

        assert_eq!(stream.messages(), ["こんにちは".to_string()]);
    }

    #[test]
    fn test_unparseable_and_unknown_lines_are_ignored() {
        let mut stream = CodexStream::new(None);
        stream.feed(b"not json at all\n");
        stream.feed(b"{\"type\":\"turn.completed\",\"usage\":{}}\n");
        stream.feed(b"{\"no_type\":true}\n");
        stream.feed(b"\n   \n");
        stream.feed(format!("{HELLO}\n").as_bytes());

        assert_eq!(stream.messages(), ["Hello".to_string()]);
        assert_eq!(stream.thread_id(), None);
    }

    #[test]
    fn test_later_thread_started_overrides() {
        let mut stream = CodexStream::new(None);
        stream.feed(format!("{STARTED}\n").as_bytes());
        stream.feed(b"{\"type\":\"thread.started\",\"thread_id\":\"t2\"}\n");

        assert_eq!(stream.thread_id(), Some("t2"));
    }

    #[test]
    fn test_raw_stdout_is_kept() {
        let mut stream = CodexStream::new(None);
        stream.feed(b"plain ");
        stream.feed(b"text\n");

        assert_eq!(stream.raw_stdout(), "plain text\n");
    }

    #[test]
    fn test_tool_items_are_sent_to_observer_only() {
        let (sink, mut events) = event_channel();
        let mut stream = CodexStream::new(Some(sink));

        stream.feed(
            br#"{"type":"item.completed","item":{"type":"command_execution","command":"cargo test","aggregated_output":"ok\n","exit_code":0}}
{"type":"item.completed","item":{"type":"agent_message","text":"All green"}}
"#,
        );

        // ツールの出力は主出力に混ざらない
        assert_eq!(stream.messages(), ["All green".to_string()]);

        let mut logs = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::Log(entry) = event {
                logs.push(entry);
            }
        }

        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0], LogEntry::tool_call("cargo test"));
        assert_eq!(logs[1].entry_type, LogEntryType::ToolResult);
        assert_eq!(logs[1].content, "ok\n(exit 0)");
        assert_eq!(logs[2], LogEntry::assistant_text("All green"));
    }

    #[test]
    fn test_mcp_tool_call_entries() {
        let (sink, mut events) = event_channel();
        let mut stream = CodexStream::new(Some(sink));

        stream.feed(
            br#"{"type":"item.completed","item":{"type":"mcp_tool_call","server":"room","tool":"vote","arguments":{"choice":"yes"},"result":"recorded"}}
"#,
        );

        assert_eq!(
            events.try_recv().unwrap(),
            AgentEvent::Log(LogEntry::tool_call(r#"room.vote {"choice":"yes"}"#))
        );
        assert_eq!(
            events.try_recv().unwrap(),
            AgentEvent::Log(LogEntry::tool_result("recorded"))
        );
        assert!(stream.messages().is_empty());
    }

    #[test]
    fn test_agent_message_emits_progress() {
        let (sink, mut events) = event_channel();
        let mut stream = CodexStream::new(Some(sink));
        stream.feed(format!("{HELLO}\n").as_bytes());

        assert_eq!(
            events.try_recv().unwrap(),
            AgentEvent::Progress("Hello".to_string())
        );
    }
}
