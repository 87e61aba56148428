//! モデル識別子の解析
//!
//! # 責務
//!
//! 生のモデル識別子文字列を一度だけ解析し、閉じた列挙型 [`ModelSpec`] に変換します。
//! ディスパッチャーは以後この列挙型を網羅的に `match` するため、
//! バックエンドの追加はコンパイラが検査する変更になります。
//!
//! # ルーティング規則（上から順に評価）
//!
//! | 識別子 | バックエンド |
//! |--------|-------------|
//! | `ollama:<name>` | ローカル推論デーモン |
//! | `codex`, `codex:<name>` | ストリーミングサブプロセス |
//! | `openai`, `openai:<name>` | OpenAI 形式 API |
//! | `anthropic`, `anthropic:<name>`, `claude-api:<name>` | Anthropic 形式 API |
//! | それ以外 | CLI エージェント（既定） |
//!
//! # 使用例
//!
//! ```rust
//! use agent_dispatch::config::model::{HostedProvider, ModelSpec};
//!
//! let spec = ModelSpec::parse("openai:gpt-4o-mini").unwrap();
//! assert_eq!(
//!     spec,
//!     ModelSpec::HostedApi {
//!         provider: HostedProvider::OpenAi,
//!         model: Some("gpt-4o-mini".to_string()),
//!     }
//! );
//! ```

use std::fmt;

use crate::error::DispatchError;

const OLLAMA_PREFIX: &str = "ollama:";
const CODEX: &str = "codex";
const OPENAI: &str = "openai";
const ANTHROPIC: &str = "anthropic";
const CLAUDE_API_PREFIX: &str = "claude-api:";

/// ホスト型 API のプロバイダー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostedProvider {
    /// OpenAI 形式（Bearer 認証、system ロールのメッセージ）
    OpenAi,
    /// Anthropic 形式（x-api-key 認証、トップレベルの system フィールド）
    Anthropic,
}

impl HostedProvider {
    /// 表示名（エラーメッセージに使う）
    pub fn label(&self) -> &'static str {
        match self {
            HostedProvider::OpenAi => "OpenAI",
            HostedProvider::Anthropic => "Anthropic",
        }
    }

    /// 認証情報のフォールバックに使う環境変数名
    pub fn env_var(&self) -> &'static str {
        match self {
            HostedProvider::OpenAi => "OPENAI_API_KEY",
            HostedProvider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

/// 解析済みのモデル指定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSpec {
    /// 対話型エージェント CLI（識別子はそのまま渡す）
    CliAgent { model: String },

    /// ストリーミングサブプロセス（`codex:` の後ろはモデル上書き）
    StreamingSubprocess { model: Option<String> },

    /// ホスト型 API（`None` なら設定の既定モデル）
    HostedApi {
        provider: HostedProvider,
        model: Option<String>,
    },

    /// ローカル推論デーモン
    LocalDaemon { model: String },

    /// リモートステーション上の推論デーモン
    RemoteDaemon { station: String, model: String },
}

impl ModelSpec {
    /// 識別子を解析
    ///
    /// 空白を除去した結果が空の場合のみ [`DispatchError::MalformedModel`] を返します。
    /// それ以外の文字列は必ずいずれかのバックエンドに割り当てられます。
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(DispatchError::MalformedModel(raw.to_string()));
        }

        if let Some(name) = id.strip_prefix(OLLAMA_PREFIX) {
            return Ok(ModelSpec::LocalDaemon {
                model: name.to_string(),
            });
        }

        if let Some(model) = exact_or_prefixed(id, CODEX) {
            return Ok(ModelSpec::StreamingSubprocess { model });
        }

        if let Some(model) = exact_or_prefixed(id, OPENAI) {
            return Ok(ModelSpec::HostedApi {
                provider: HostedProvider::OpenAi,
                model,
            });
        }

        if let Some(model) = exact_or_prefixed(id, ANTHROPIC) {
            return Ok(ModelSpec::HostedApi {
                provider: HostedProvider::Anthropic,
                model,
            });
        }

        if let Some(name) = id.strip_prefix(CLAUDE_API_PREFIX) {
            return Ok(ModelSpec::HostedApi {
                provider: HostedProvider::Anthropic,
                model: non_empty(name),
            });
        }

        Ok(ModelSpec::CliAgent {
            model: id.to_string(),
        })
    }

    /// リクエストのステーション指定を反映
    ///
    /// ローカルデーモン向けの指定だけがリモート実行に切り替わります。
    pub fn on_station(self, station: Option<&str>) -> Self {
        match (self, station.map(str::trim).filter(|s| !s.is_empty())) {
            (ModelSpec::LocalDaemon { model }, Some(station)) => ModelSpec::RemoteDaemon {
                station: station.to_string(),
                model,
            },
            (spec, _) => spec,
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSpec::CliAgent { model } => write!(f, "cli({model})"),
            ModelSpec::StreamingSubprocess { model } => {
                write!(f, "codex({})", model.as_deref().unwrap_or("default"))
            }
            ModelSpec::HostedApi { provider, model } => write!(
                f,
                "{}({})",
                provider.label(),
                model.as_deref().unwrap_or("default")
            ),
            ModelSpec::LocalDaemon { model } => write!(f, "ollama({model})"),
            ModelSpec::RemoteDaemon { station, model } => {
                write!(f, "ollama({model})@{station}")
            }
        }
    }
}

/// `name` と完全一致なら `Some(None)`、`name:` で始まるなら `Some(Some(suffix))`
fn exact_or_prefixed(id: &str, name: &str) -> Option<Option<String>> {
    if id == name {
        return Some(None);
    }
    id.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(non_empty)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
