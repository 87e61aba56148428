//! ディスパッチャー設定の読み込みと管理を行うモジュール
//!
//! # 責務
//!
//! - TOML ファイル／文字列からの設定読み込みとバリデーション
//! - 各バックエンド（サブプロセス、ホスト型 API、ローカル／リモートデーモン）の設定保持
//! - 認証情報 [`Credentials`] の明示的な受け渡し
//!
//! ## 認証情報について
//!
//! API キーは TOML には書きません。アダプター内部で環境変数を読むこともありません。
//! 環境変数から読む場合は、呼び出し側が [`Credentials::from_env`] を一度だけ呼び、
//! [`DispatcherConfig::with_credentials`] で渡します。
//!
//! ## 使用例
//!
//! ```toml
//! [codex]
//! program = "codex"
//! default_timeout_secs = 900
//!
//! [ollama]
//! host = "127.0.0.1"
//! port = 11434
//! ```
//!
//! ```rust
//! use agent_dispatch::config::settings::{Credentials, DispatcherConfig};
//!
//! let config = DispatcherConfig::from_toml("[ollama]\nport = 11500\n")
//!     .unwrap()
//!     .with_credentials(Credentials::default().with_openai("sk-test"));
//!
//! assert_eq!(config.ollama.port, 11500);
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::dto::{
    AnthropicDto, ClaudeDto, CodexDto, DispatcherConfigDto, OllamaDto, OpenAiDto, RemoteDto,
};
use super::model::HostedProvider;
use crate::error::ConfigError;

/// ディスパッチャー全体の設定（ドメインモデル）
///
/// バリデーション済みの状態を保証します。
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub codex: CodexConfig,
    pub claude: ClaudeConfig,
    pub openai: HostedApiConfig,
    pub anthropic: AnthropicConfig,
    pub ollama: OllamaConfig,
    pub remote: RemoteConfig,
    pub credentials: Credentials,
}

/// ストリーミングサブプロセス（Codex CLI）の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexConfig {
    /// 実行するプログラム
    pub program: String,
    /// サブコマンドより前に挿入する引数（`npx @openai/codex` 等のラッパー用）
    pub leading_args: Vec<String>,
    /// リクエストでタイムアウトが指定されない場合の既定値
    pub default_timeout: Duration,
    /// SIGTERM から SIGKILL までの猶予
    pub kill_grace: Duration,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            leading_args: Vec::new(),
            default_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_secs(5),
        }
    }
}

/// CLI エージェント（Claude Code CLI）の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudeConfig {
    pub program: String,
    pub default_timeout: Duration,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            default_timeout: Duration::from_secs(600),
        }
    }
}

/// ホスト型 API 共通の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedApiConfig {
    /// スキーム付きのベース URL（末尾スラッシュなし）
    pub base_url: String,
    /// モデル名が省略されたときに使うモデル
    pub default_model: String,
    pub default_timeout: Duration,
}

impl HostedApiConfig {
    fn openai_defaults() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            default_timeout: Duration::from_secs(120),
        }
    }

    fn anthropic_defaults() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            default_model: "claude-sonnet-4-5".to_string(),
            default_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for HostedApiConfig {
    fn default() -> Self {
        Self::openai_defaults()
    }
}

/// Anthropic 形式 API の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicConfig {
    pub api: HostedApiConfig,
    /// `anthropic-version` ヘッダー
    pub api_version: String,
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api: HostedApiConfig::anthropic_defaults(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 4096,
        }
    }
}

/// ローカル推論デーモンの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
    pub chat_timeout: Duration,
    pub probe_timeout: Duration,
    pub list_timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11434,
            chat_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(2),
            list_timeout: Duration::from_secs(5),
        }
    }
}

/// リモート実行の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// リモート側デーモンのポート
    pub daemon_port: u16,
    /// 外側のタイムアウトに上乗せする時間（ネットワーク・スケジューリング分）
    pub overhead: Duration,
    /// 既定の [`SshExecutor`](crate::provider::remote::SshExecutor) が使うプログラム
    pub ssh_program: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            daemon_port: 11434,
            overhead: Duration::from_secs(30),
            ssh_program: "ssh".to_string(),
        }
    }
}

/// ホスト型 API の認証情報
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    openai: Option<String>,
    anthropic: Option<String>,
}

impl Credentials {
    /// 環境変数 `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` から読み込む
    ///
    /// アダプターは環境を直接参照しないため、この関数は呼び出し側が明示的に使います。
    pub fn from_env() -> Self {
        Self {
            openai: read_env(HostedProvider::OpenAi.env_var()),
            anthropic: read_env(HostedProvider::Anthropic.env_var()),
        }
    }

    pub fn with_openai(mut self, key: impl Into<String>) -> Self {
        self.openai = Some(key.into());
        self
    }

    pub fn with_anthropic(mut self, key: impl Into<String>) -> Self {
        self.anthropic = Some(key.into());
        self
    }

    /// プロバイダーの API キー
    pub fn key_for(&self, provider: HostedProvider) -> Option<&str> {
        match provider {
            HostedProvider::OpenAi => self.openai.as_deref(),
            HostedProvider::Anthropic => self.anthropic.as_deref(),
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("openai", &redact(&self.openai))
            .field("anthropic", &redact(&self.anthropic))
            .finish()
    }
}

impl DispatcherConfig {
    /// TOML ファイルから設定を読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. TOML デシリアライズ → `DispatcherConfigDto`
    /// 3. バリデーション & 変換 → [`DispatcherConfig`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: DispatcherConfigDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }

    /// 設定を TOML 文字列に変換（認証情報は含まない）
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let dto = DispatcherConfigDto::from(self.clone());
        Ok(toml::to_string(&dto)?)
    }

    /// 設定を TOML ファイルに保存（認証情報は含まない）
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// 認証情報を設定
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }
}

fn required_text(
    section: &str,
    field: &str,
    value: Option<String>,
    default: String,
) -> Result<String, ConfigError> {
    let value = value.unwrap_or(default);
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "[{section}] {field} が空です"
        )));
    }
    Ok(value)
}

/// 秒数で指定できる時間の上限（1 年）
const MAX_SECS: u64 = 86_400 * 365;

fn positive_secs(
    section: &str,
    field: &str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::Validation(format!(
            "[{section}] {field} は 1 以上である必要があります"
        ))),
        Some(secs) if secs > MAX_SECS => Err(ConfigError::Validation(format!(
            "[{section}] {field} は {MAX_SECS} 以下である必要があります"
        ))),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn non_zero_port(
    section: &str,
    field: &str,
    value: Option<u16>,
    default: u16,
) -> Result<u16, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Validation(format!(
            "[{section}] {field} に 0 は指定できません"
        ))),
        Some(port) => Ok(port),
        None => Ok(default),
    }
}

fn hosted_api(
    section: &str,
    base_url: Option<String>,
    default_model: Option<String>,
    timeout_secs: Option<u64>,
    defaults: HostedApiConfig,
) -> Result<HostedApiConfig, ConfigError> {
    let base_url = required_text(section, "base_url", base_url, defaults.base_url)?;
    Ok(HostedApiConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        default_model: required_text(
            section,
            "default_model",
            default_model,
            defaults.default_model,
        )?,
        default_timeout: positive_secs(
            section,
            "default_timeout_secs",
            timeout_secs,
            defaults.default_timeout,
        )?,
    })
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// バリデーションを実施し、不正なデータの場合は [`ConfigError::Validation`] を返します。
impl TryFrom<DispatcherConfigDto> for DispatcherConfig {
    type Error = ConfigError;

    fn try_from(dto: DispatcherConfigDto) -> Result<Self, Self::Error> {
        let codex_defaults = CodexConfig::default();
        let codex = CodexConfig {
            program: required_text("codex", "program", dto.codex.program, codex_defaults.program)?,
            leading_args: dto.codex.leading_args.unwrap_or_default(),
            default_timeout: positive_secs(
                "codex",
                "default_timeout_secs",
                dto.codex.default_timeout_secs,
                codex_defaults.default_timeout,
            )?,
            kill_grace: positive_secs(
                "codex",
                "kill_grace_secs",
                dto.codex.kill_grace_secs,
                codex_defaults.kill_grace,
            )?,
        };

        let claude_defaults = ClaudeConfig::default();
        let claude = ClaudeConfig {
            program: required_text(
                "claude",
                "program",
                dto.claude.program,
                claude_defaults.program,
            )?,
            default_timeout: positive_secs(
                "claude",
                "default_timeout_secs",
                dto.claude.default_timeout_secs,
                claude_defaults.default_timeout,
            )?,
        };

        let openai = hosted_api(
            "openai",
            dto.openai.base_url,
            dto.openai.default_model,
            dto.openai.default_timeout_secs,
            HostedApiConfig::openai_defaults(),
        )?;

        let anthropic_defaults = AnthropicConfig::default();
        let max_tokens = dto.anthropic.max_tokens.unwrap_or(anthropic_defaults.max_tokens);
        if max_tokens == 0 {
            return Err(ConfigError::Validation(
                "[anthropic] max_tokens は 1 以上である必要があります".to_string(),
            ));
        }
        let anthropic = AnthropicConfig {
            api: hosted_api(
                "anthropic",
                dto.anthropic.base_url,
                dto.anthropic.default_model,
                dto.anthropic.default_timeout_secs,
                anthropic_defaults.api,
            )?,
            api_version: required_text(
                "anthropic",
                "api_version",
                dto.anthropic.api_version,
                anthropic_defaults.api_version,
            )?,
            max_tokens,
        };

        let ollama_defaults = OllamaConfig::default();
        let ollama = OllamaConfig {
            host: required_text("ollama", "host", dto.ollama.host, ollama_defaults.host)?,
            port: non_zero_port("ollama", "port", dto.ollama.port, ollama_defaults.port)?,
            chat_timeout: positive_secs(
                "ollama",
                "chat_timeout_secs",
                dto.ollama.chat_timeout_secs,
                ollama_defaults.chat_timeout,
            )?,
            probe_timeout: positive_secs(
                "ollama",
                "probe_timeout_secs",
                dto.ollama.probe_timeout_secs,
                ollama_defaults.probe_timeout,
            )?,
            list_timeout: positive_secs(
                "ollama",
                "list_timeout_secs",
                dto.ollama.list_timeout_secs,
                ollama_defaults.list_timeout,
            )?,
        };

        let remote_defaults = RemoteConfig::default();
        let remote = RemoteConfig {
            daemon_port: non_zero_port(
                "remote",
                "daemon_port",
                dto.remote.daemon_port,
                remote_defaults.daemon_port,
            )?,
            overhead: positive_secs(
                "remote",
                "overhead_secs",
                dto.remote.overhead_secs,
                remote_defaults.overhead,
            )?,
            ssh_program: required_text(
                "remote",
                "ssh_program",
                dto.remote.ssh_program,
                remote_defaults.ssh_program,
            )?,
        };

        Ok(DispatcherConfig {
            codex,
            claude,
            openai,
            anthropic,
            ollama,
            remote,
            credentials: Credentials::default(),
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<DispatcherConfig> for DispatcherConfigDto {
    fn from(config: DispatcherConfig) -> Self {
        DispatcherConfigDto {
            codex: CodexDto {
                program: Some(config.codex.program),
                leading_args: Some(config.codex.leading_args),
                default_timeout_secs: Some(config.codex.default_timeout.as_secs()),
                kill_grace_secs: Some(config.codex.kill_grace.as_secs()),
            },
            claude: ClaudeDto {
                program: Some(config.claude.program),
                default_timeout_secs: Some(config.claude.default_timeout.as_secs()),
            },
            openai: OpenAiDto {
                base_url: Some(config.openai.base_url),
                default_model: Some(config.openai.default_model),
                default_timeout_secs: Some(config.openai.default_timeout.as_secs()),
            },
            anthropic: AnthropicDto {
                base_url: Some(config.anthropic.api.base_url),
                default_model: Some(config.anthropic.api.default_model),
                default_timeout_secs: Some(config.anthropic.api.default_timeout.as_secs()),
                api_version: Some(config.anthropic.api_version),
                max_tokens: Some(config.anthropic.max_tokens),
            },
            ollama: OllamaDto {
                host: Some(config.ollama.host),
                port: Some(config.ollama.port),
                chat_timeout_secs: Some(config.ollama.chat_timeout.as_secs()),
                probe_timeout_secs: Some(config.ollama.probe_timeout.as_secs()),
                list_timeout_secs: Some(config.ollama.list_timeout.as_secs()),
            },
            remote: RemoteDto {
                daemon_port: Some(config.remote.daemon_port),
                overhead_secs: Some(config.remote.overhead.as_secs()),
                ssh_program: Some(config.remote.ssh_program),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = DispatcherConfig::from_toml("").unwrap();

        assert_eq!(config.codex, CodexConfig::default());
        assert_eq!(config.openai.base_url, "https://api.openai.com");
        assert_eq!(config.anthropic.api.default_model, "claude-sonnet-4-5");
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(config.remote.overhead, Duration::from_secs(30));
    }

    #[test]
    fn test_sections_override_defaults() {
        let toml = r#"
[codex]
program = "/opt/codex/bin/codex"
leading_args = ["--profile", "room"]
kill_grace_secs = 2

[openai]
base_url = "http://localhost:8080/"

[ollama]
port = 11500
"#;
        let config = DispatcherConfig::from_toml(toml).unwrap();

        assert_eq!(config.codex.program, "/opt/codex/bin/codex");
        assert_eq!(config.codex.leading_args, vec!["--profile", "room"]);
        assert_eq!(config.codex.kill_grace, Duration::from_secs(2));
        // 末尾のスラッシュは除去される
        assert_eq!(config.openai.base_url, "http://localhost:8080");
        assert_eq!(config.ollama.port, 11500);
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let result = DispatcherConfig::from_toml("[codex]\ndefault_timeout_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_oversized_timeout() {
        let toml = format!("[remote]\noverhead_secs = {}\n", i64::MAX);
        let result = DispatcherConfig::from_toml(&toml);
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let result = DispatcherConfig::from_toml("[codex]\ndefault_timeout_secs = 31536000\n");
        assert_eq!(result.unwrap().codex.default_timeout, Duration::from_secs(31_536_000));
    }

    #[test]
    fn test_validation_rejects_zero_port() {
        let result = DispatcherConfig::from_toml("[ollama]\nport = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_empty_program() {
        let result = DispatcherConfig::from_toml("[claude]\nprogram = \"  \"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = DispatcherConfig::from_toml("[codex]\nbinary = \"codex\"\n");
        assert!(matches!(result, Err(ConfigError::TomlDeserialize(_))));
    }

    #[test]
    fn test_toml_roundtrip() {
        let original = DispatcherConfig::from_toml("[anthropic]\nmax_tokens = 1024\n").unwrap();
        let toml = original.to_toml_string().unwrap();
        let restored = DispatcherConfig::from_toml(&toml).unwrap();

        assert_eq!(restored.anthropic, original.anthropic);
        assert_eq!(restored.codex, original.codex);
        assert_eq!(restored.ollama, original.ollama);
    }

    #[test]
    fn test_credentials_are_not_serialized() {
        let config = DispatcherConfig::default()
            .with_credentials(Credentials::default().with_openai("sk-secret"));
        let toml = config.to_toml_string().unwrap();

        assert!(!toml.contains("sk-secret"));
        assert_eq!(config.credentials.key_for(HostedProvider::OpenAi), Some("sk-secret"));
        assert_eq!(config.credentials.key_for(HostedProvider::Anthropic), None);
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = Credentials::default().with_anthropic("sk-ant-secret");
        let debug = format!("{:?}", credentials);

        assert!(!debug.contains("sk-ant-secret"));
    }
}
