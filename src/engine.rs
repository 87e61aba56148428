//! エージェント実行エンジン
//!
//! # 責務
//!
//! - 汎用リクエストを受け取り、モデル識別子に応じたアダプターで実行
//! - 全バックエンド共通の結果形式と失敗分類
//! - 実行中イベントの通知と、呼び出し単位のキャンセル制御
//!
//! # モジュール構成
//!
//! - [`dispatcher`][]: ディスパッチャー本体（モデルルーター）
//! - [`request`][]: 実行リクエスト
//! - [`result`][]: 実行結果と失敗分類
//! - [`observer`][]: 実行中イベントのストリーム
//! - [`deadline`][]: 呼び出し単位のキャンセルスコープ
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use agent_dispatch::config::settings::DispatcherConfig;
//! use agent_dispatch::engine::{AgentEvent, AgentExecutionRequest, Dispatcher, event_channel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(DispatcherConfig::default());
//!     let (sink, mut events) = event_channel();
//!
//!     // イベントは結果とは独立に読み進める
//!     let printer = tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             if let AgentEvent::Progress(text) = event {
//!                 eprintln!("… {text}");
//!             }
//!         }
//!     });
//!
//!     let request = AgentExecutionRequest::new("codex", "Fix the failing test")
//!         .with_timeout(Duration::from_secs(300))
//!         .with_events(sink);
//!     let result = dispatcher.execute(&request).await?;
//!     drop(request);
//!     printer.await?;
//!
//!     println!("exit={} session={:?}", result.exit_code, result.session_id);
//!     Ok(())
//! }
//! ```

pub mod deadline;
pub mod dispatcher;
pub mod observer;
pub mod request;
pub mod result;

// 公開APIの再エクスポート
pub use deadline::CallDeadline;
pub use dispatcher::Dispatcher;
pub use observer::{AgentEvent, EventSink, EventStream, LogEntry, LogEntryType, event_channel};
pub use request::AgentExecutionRequest;
pub use result::{AgentExecutionResult, ErrorKind};
