//! 実行バックエンドのアダプター層
//!
//! # 責務
//!
//! - 性質の異なるバックエンドを共通トレイト [`AgentBackend`] の背後に隠す
//! - すべての失敗を結果データ（[`AgentExecutionResult`](crate::engine::result::AgentExecutionResult)）に変換し、
//!   境界の外へエラーを投げない
//!
//! # モジュール構成
//!
//! - `traits` - 共通インターフェース（[`AgentBackend`]）
//! - `cli` - 対話型エージェント CLI（Claude Code CLI）へのオプション翻訳
//! - `codex` - ストリーミングサブプロセス（Codex CLI の JSONL イベント）
//! - `http_api` - ホスト型 API 共通の処理
//! - `openai` / `anthropic` - ホスト型 API アダプター
//! - `ollama` - ローカル推論デーモン（最小 HTTP クライアント付き）
//! - `remote` - リモートステーション上のデーモン
//!
//! ## 使用する外部ツール
//!
//! - **CLI エージェント**: `claude`（`npm install -g @anthropic-ai/claude-code`）
//! - **ストリーミングサブプロセス**: `codex`（`npm install -g @openai/codex`）
//! - **リモート実行**: `ssh`（リモート側に `base64` と `curl` が必要）

pub mod anthropic;
pub mod cli;
pub mod codex;
mod http_api;
pub mod ollama;
pub mod openai;
pub mod remote;
pub mod traits;

// 公開APIの再エクスポート
pub use anthropic::AnthropicAdapter;
pub use cli::{ClaudeCodeRunner, CliAdapter, CliAgentRunner, CliRunOptions};
pub use codex::CodexAdapter;
pub use ollama::{DaemonError, OllamaAdapter};
pub use openai::OpenAiAdapter;
pub use remote::{RemoteCommandOutput, RemoteDaemonAdapter, RemoteExecutor, SshExecutor};
pub use traits::AgentBackend;
