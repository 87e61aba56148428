//! 設定とモデル識別子
//!
//! - [`model`][]: モデル識別子の解析（[`ModelSpec`](model::ModelSpec)）
//! - [`settings`][]: TOML 設定と認証情報
//! - `dto`: TOML との変換用 DTO（非公開）

mod dto;
pub mod model;
pub mod settings;

pub use model::{HostedProvider, ModelSpec};
pub use settings::{Credentials, DispatcherConfig};
