//! エージェント実行結果の型定義
//!
//! # 責務
//!
//! - 全アダプター共通の実行結果 [`AgentExecutionResult`] の型定義
//! - 失敗の分類 [`ErrorKind`] の型定義
//!
//! # 不変条件
//!
//! - 1 リクエストにつき結果はちょうど 1 つ（成功・失敗を問わない）
//! - `output` は常に文字列（失敗時もエラー文言が入る）
//! - `timed_out == true` のときは必ず失敗形（`exit_code != 0`）
//!
//! # 使用例
//!
//! ```rust
//! use agent_dispatch::engine::result::AgentExecutionResult;
//!
//! let result = AgentExecutionResult::success("Hi there".to_string(), 42)
//!     .with_session_id(Some("t1".to_string()));
//!
//! assert!(result.is_success());
//! println!("{}", result.to_json().unwrap());
//! ```

use serde::Serialize;

use crate::error::AgentError;

/// エージェント実行結果
///
/// 成功・失敗にかかわらず、すべてのアダプターはこの形の結果を返します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentExecutionResult {
    /// 出力テキスト（失敗時はエラー文言）
    pub output: String,

    /// 終了コード（0 が成功）
    pub exit_code: i32,

    /// 実行時間（ミリ秒）
    pub duration_ms: u64,

    /// バックエンドが発行したセッション ID（継続性のないバックエンドでは常に `None`）
    pub session_id: Option<String>,

    /// タイムアウトしたかどうか
    pub timed_out: bool,

    /// 失敗（または劣化した成功）の分類
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// 失敗の分類
///
/// 呼び出し側がリトライするか人に見せるかを判断するための層です。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 設定エラー（認証情報なし等）
    Configuration,
    /// 通信エラー（接続拒否、起動失敗、HTTP エラー等）
    Transport,
    /// プロトコルエラー（想定外の応答形。成功扱いのまま劣化）
    Protocol,
    /// タイムアウト
    Timeout,
    /// リモートステーションに到達できない
    StationUnreachable,
    /// リモートコマンドが非ゼロ終了
    RemoteCommand,
}

impl AgentExecutionResult {
    /// 成功結果を生成
    pub fn success(output: String, duration_ms: u64) -> Self {
        Self {
            output,
            exit_code: 0,
            duration_ms,
            session_id: None,
            timed_out: false,
            error_kind: None,
        }
    }

    /// エラーから失敗結果を生成
    ///
    /// `output` にはエラーの `Display` 文言が入ります。
    pub fn failure(error: AgentError, duration_ms: u64) -> Self {
        Self {
            output: error.to_string(),
            exit_code: error.exit_code().max(1),
            duration_ms,
            session_id: None,
            timed_out: error.is_timeout(),
            error_kind: Some(error.kind()),
        }
    }

    /// 想定外の応答形だったが、生のテキストで成功扱いにした結果
    pub fn degraded(raw_output: String, duration_ms: u64) -> Self {
        Self {
            error_kind: Some(ErrorKind::Protocol),
            ..Self::success(raw_output, duration_ms)
        }
    }

    /// セッション ID を設定
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// 成功したかどうか
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// 結果をJSON形式でシリアライズ
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
