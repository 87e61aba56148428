//! agent-dispatch
//!
//! 「このプロンプトをこのモデルで実行する」という汎用リクエストを、
//! 性質の異なる複数のバックエンド（CLI エージェント、ストリーミングサブプロセス、
//! ホスト型 API、ローカル／リモートの推論デーモン）のいずれかで実行し、
//! 統一された結果形式で返します。
//!
//! - [`config`]: 設定とモデル識別子
//! - [`engine`]: ディスパッチャー、リクエスト、結果、イベント
//! - [`provider`]: バックエンドアダプター
//! - [`error`]: エラー型
//! - [`logging`]: tracing の初期化

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod provider;
