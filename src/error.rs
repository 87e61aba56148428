//! エラー型の定義
//!
//! このモジュールは、agent-dispatch 全体で使用されるエラー型を定義します。
//!
//! - [`ConfigError`] - 設定ファイルの読み込み・検証エラー
//! - [`DispatchError`] - 呼び出し側のバグ（ルーティング不能なモデル識別子）
//! - [`AgentError`] - アダプター内部で発生する実行時エラー
//!
//! [`AgentError`] はアダプターの境界を越えて `Err` として返されることはありません。
//! 必ず [`AgentExecutionResult::failure`](crate::engine::AgentExecutionResult::failure)
//! によって通常の結果データに変換されます。そのため `Display` の文言は
//! そのまま利用者に表示される `output` になります（英語で統一）。

use std::time::Duration;

use thiserror::Error;

use crate::engine::result::ErrorKind;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// TOML のシリアライズに失敗
    #[error("TOML のシリアライズに失敗しました: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),
}

/// ディスパッチャーが呼び出し側に返す唯一のエラー
///
/// 実行時の失敗はすべて結果データとして表現されるため、
/// ここに現れるのはルーターが解釈できない識別子（呼び出し側のバグ）のみです。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// 空白のみ、または空のモデル識別子
    #[error("malformed model identifier: {0:?}")]
    MalformedModel(String),
}

/// アダプター内部の実行時エラー
///
/// 各バリアントは [`ErrorKind`] のいずれかの層に分類されます。
#[derive(Debug, Error)]
pub enum AgentError {
    /// 認証情報が見つからない（ネットワーク呼び出しは行われていない）
    #[error("{provider} API error: missing API key (set {env_var} or pass a credential)")]
    MissingApiKey {
        provider: &'static str,
        env_var: &'static str,
    },

    /// HTTP 非成功ステータス
    #[error("{provider} API {status}: {message}")]
    ApiStatus {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// 接続失敗・DNS 失敗などの通信エラー
    #[error("{backend} request failed: {detail}")]
    Transport {
        backend: &'static str,
        detail: String,
    },

    /// プロセス起動失敗・パイプ取得失敗
    #[error("Failed to spawn {program}: {detail}")]
    Spawn { program: String, detail: String },

    /// タイムアウト
    #[error("{backend} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        backend: &'static str,
        after: Duration,
    },

    /// リモートステーションに到達できない
    #[error("Station {station} is unreachable")]
    StationUnreachable { station: String },

    /// リモートコマンドが非ゼロで終了
    #[error("Remote command on {station} failed with exit code {exit_code}: {stderr}")]
    RemoteCommand {
        station: String,
        exit_code: i32,
        stderr: String,
        timed_out: bool,
    },
}

impl AgentError {
    /// エラーの分類
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::MissingApiKey { .. } => ErrorKind::Configuration,
            AgentError::ApiStatus { .. }
            | AgentError::Transport { .. }
            | AgentError::Spawn { .. } => ErrorKind::Transport,
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::StationUnreachable { .. } => ErrorKind::StationUnreachable,
            AgentError::RemoteCommand { .. } => ErrorKind::RemoteCommand,
        }
    }

    /// 結果に載せる終了コード
    ///
    /// リモートコマンドの失敗のみリモート側の終了コードをそのまま伝えます。
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::RemoteCommand { exit_code, .. } => *exit_code,
            _ => 1,
        }
    }

    /// タイムアウトとして扱うべきか
    pub fn is_timeout(&self) -> bool {
        match self {
            AgentError::Timeout { .. } => true,
            AgentError::RemoteCommand { timed_out, .. } => *timed_out,
            _ => false,
        }
    }
}
