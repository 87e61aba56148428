//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、TOML ファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//!
//! ## 設計思想
//!
//! - **単一責務**: TOML のデシリアライズのみを担当
//! - **すべて省略可能**: 省略されたフィールドは既定値で補う
//! - **バリデーション前の状態**: 不正なデータも一旦受け入れる
//! - **カプセル化**: config モジュール内部のみで使用（外部非公開）
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル
//!   ↓ (デシリアライズ)
//! DispatcherConfigDto
//!   ↓ (TryFrom でバリデーション)
//! DispatcherConfig (ドメインモデル)
//! ```

use serde::{Deserialize, Serialize};

/// ディスパッチャー設定 DTO
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct DispatcherConfigDto {
    pub(super) codex: CodexDto,
    pub(super) claude: ClaudeDto,
    pub(super) openai: OpenAiDto,
    pub(super) anthropic: AnthropicDto,
    pub(super) ollama: OllamaDto,
    pub(super) remote: RemoteDto,
}

/// `[codex]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct CodexDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) leading_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) default_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) kill_grace_secs: Option<u64>,
}

/// `[claude]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct ClaudeDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) default_timeout_secs: Option<u64>,
}

/// `[openai]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct OpenAiDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) default_timeout_secs: Option<u64>,
}

/// `[anthropic]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct AnthropicDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) default_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) max_tokens: Option<u32>,
}

/// `[ollama]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct OllamaDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) chat_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) probe_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) list_timeout_secs: Option<u64>,
}

/// `[remote]` セクション
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct RemoteDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) daemon_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) overhead_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(super) ssh_program: Option<String>,
}
