//! バックエンドアダプターの共通インターフェース定義
//!
//! # 責務
//!
//! - 全アダプター共通のトレイト [`AgentBackend`] を定義
//!
//! # 実装要件
//!
//! - `Send + Sync`: 複数の呼び出しから同時に使用可能
//! - 呼び出し間で共有される可変状態を持たない
//! - 失敗時もパニックせず、必ず [`AgentExecutionResult`] を返す
//! - プロセス・ソケット・タイマーはすべて戻る前に解放する

use async_trait::async_trait;

use crate::engine::request::AgentExecutionRequest;
use crate::engine::result::AgentExecutionResult;

/// 実行バックエンドの共通インターフェース
///
/// ルーターが解決したモデル名と元のリクエストを受け取り、統一された結果を返します。
/// エラーは `Err` ではなく結果データ（`exit_code != 0`）として表現します。
///
/// # 実装パターン
///
/// ```rust,ignore
/// async fn execute(&self, model: Option<&str>, request: &AgentExecutionRequest) -> AgentExecutionResult {
///     let deadline = CallDeadline::start(request.timeout.unwrap_or(DEFAULT_TIMEOUT));
///     match deadline.run(self.call(model, request)).await {
///         Ok(Ok(text)) => AgentExecutionResult::success(text, deadline.elapsed_ms()),
///         Ok(Err(e)) => AgentExecutionResult::failure(e, deadline.elapsed_ms()),
///         Err(_) => AgentExecutionResult::failure(AgentError::Timeout { .. }, deadline.elapsed_ms()),
///     }
/// }
/// ```
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// バックエンド名（ログ用）
    fn name(&self) -> &'static str;

    /// プロンプトを実行する
    ///
    /// # 引数
    ///
    /// - `model`: ルーターが識別子から取り出したモデル名（`None` なら既定）
    /// - `request`: 呼び出し側のリクエスト
    async fn execute(
        &self,
        model: Option<&str>,
        request: &AgentExecutionRequest,
    ) -> AgentExecutionResult;
}
