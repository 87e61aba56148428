//! tracing の初期化
//!
//! 出力先は標準エラー（既定）またはファイルです。ファイル出力は
//! `tracing-appender` の非同期ライターを使うため、戻り値の [`WorkerGuard`] を
//! プロセス終了まで保持してください（破棄時に未書き込みのログを吐き出します）。
//!
//! フィルターは `RUST_LOG` から読み、未設定なら `info` です。

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use clap::ValueEnum;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// ログの出力形式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// 人が読むためのテキスト
    #[default]
    Text,
    /// 1 行 1 イベントの JSON
    Json,
}

/// グローバルな subscriber を設定する
///
/// # 引数
///
/// - `format`: 出力形式
/// - `log_file`: 追記先のファイル（`None` なら標準エラー）
///
/// # 戻り値
///
/// - `Ok(Some(WorkerGuard))`: ファイル出力時。保持している間だけ書き込まれる
/// - `Ok(None)`: 標準エラー出力時
/// - `Err(io::Error)`: ログファイルを開けない
pub fn init_tracing(
    format: LogFormat,
    log_file: Option<&Path>,
) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(io::stderr), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(writer).with_ansi(log_file.is_none()))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
    };

    // 既に設定済みの場合は既存の subscriber をそのまま使う
    if let Err(e) = installed {
        debug!(error = %e, "tracing subscriber already installed");
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_output_is_flushed_when_guard_drops() {
        let path = std::env::temp_dir().join(format!(
            "agent-dispatch-logging-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let guard = init_tracing(LogFormat::Json, Some(&path)).unwrap();
        assert!(guard.is_some());

        tracing::error!(backend = "codex", "log file smoke test");
        drop(guard);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("log file smoke test"));
        assert!(content.contains(r#""backend":"codex""#));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_unwritable_log_file_is_an_error() {
        let result = init_tracing(LogFormat::Text, Some(Path::new("/nonexistent-dir/x/agent.log")));
        assert!(result.is_err());
    }
}
