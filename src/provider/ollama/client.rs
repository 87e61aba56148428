//! ローカル推論デーモン用の最小 HTTP/1.1 クライアント
//!
//! 1 リクエストにつき 1 接続（`Connection: close`）。応答本文は
//! `Content-Length`、`Transfer-Encoding: chunked`、切断までの読み取りのいずれかで確定します。
//! 認証・TLS・リダイレクトは扱いません（常にローカルの平文 HTTP）。

use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::engine::deadline::CallDeadline;

const READ_CHUNK: usize = 4096;

/// デーモン通信のエラー
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// アダプターはこの文言の "timed out" でタイムアウトを判定する
    #[error("request timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// 本文の区切り方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
}

#[derive(Debug, PartialEq, Eq)]
struct ResponseHead {
    status: u16,
    framing: Framing,
}

/// デーモンへの HTTP クライアント
#[derive(Debug, Clone)]
pub struct DaemonClient {
    host: String,
    port: u16,
}

impl DaemonClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `GET` して JSON を返す
    pub async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, DaemonError> {
        self.call("GET", path, None, timeout).await
    }

    /// JSON を `POST` して JSON を返す
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, DaemonError> {
        self.call("POST", path, Some(body.to_string()), timeout).await
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        timeout: Duration,
    ) -> Result<Value, DaemonError> {
        let deadline = CallDeadline::start(timeout);
        let (status, text) = deadline
            .run(self.exchange(method, path, body.as_deref()))
            .await
            .map_err(|_| DaemonError::Timeout(timeout))??;

        if !(200..300).contains(&status) {
            return Err(DaemonError::Status {
                status,
                body: text.trim().to_string(),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| DaemonError::Malformed(format!("body is not JSON ({e})")))
    }

    async fn exchange(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<(u16, String), DaemonError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| DaemonError::Connect {
                addr: self.addr(),
                source,
            })?;

        let request = build_request(method, path, &self.addr(), body);
        trace!(method, path, bytes = request.len(), "sending daemon request");
        stream.write_all(request.as_bytes()).await?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        let head_end = loop {
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos;
            }
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(DaemonError::Malformed(
                    "connection closed before response headers".to_string(),
                ));
            }
            buf.extend_from_slice(&chunk[..n]);
        };

        let head = parse_head(&String::from_utf8_lossy(&buf[..head_end]))?;
        let mut body = buf.split_off(head_end + 4);

        let body = match head.framing {
            Framing::Length(len) => {
                while body.len() < len {
                    let n = stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(DaemonError::Malformed(
                            "body shorter than Content-Length".to_string(),
                        ));
                    }
                    body.extend_from_slice(&chunk[..n]);
                }
                body.truncate(len);
                body
            }
            Framing::Chunked => loop {
                if let Some(decoded) = decode_chunked(&body)? {
                    break decoded;
                }
                let n = stream.read(&mut chunk).await?;
                if n == 0 {
                    return Err(DaemonError::Malformed("truncated chunked body".to_string()));
                }
                body.extend_from_slice(&chunk[..n]);
            },
            Framing::UntilClose => {
                stream.read_to_end(&mut body).await?;
                body
            }
        };

        Ok((head.status, String::from_utf8_lossy(&body).into_owned()))
    }
}

fn build_request(method: &str, path: &str, host: &str, body: Option<&str>) -> String {
    let mut request = format!(
        "{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\nAccept: application/json\r\n"
    );
    if let Some(body) = body {
        request.push_str("Content-Type: application/json\r\n");
        request.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        request.push_str(body);
    } else {
        request.push_str("\r\n");
    }
    request
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_head(head: &str) -> Result<ResponseHead, DaemonError> {
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();

    let mut parts = status_line.split_whitespace();
    let status = match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .map_err(|_| DaemonError::Malformed(format!("bad status line: {status_line:?}")))?,
        _ => {
            return Err(DaemonError::Malformed(format!(
                "bad status line: {status_line:?}"
            )));
        }
    };

    let mut framing = Framing::UntilClose;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            framing = Framing::Chunked;
        } else if name.eq_ignore_ascii_case("content-length") && framing != Framing::Chunked {
            let len = value
                .parse()
                .map_err(|_| DaemonError::Malformed(format!("bad Content-Length: {value:?}")))?;
            framing = Framing::Length(len);
        }
    }

    Ok(ResponseHead { status, framing })
}

/// chunked 本文を復号する
///
/// 終端チャンクまで揃っていなければ `Ok(None)`。
fn decode_chunked(raw: &[u8]) -> Result<Option<Vec<u8>>, DaemonError> {
    let mut decoded = Vec::new();
    let mut pos = 0;

    loop {
        let Some(line_len) = find(&raw[pos..], b"\r\n") else {
            return Ok(None);
        };
        let size_line = String::from_utf8_lossy(&raw[pos..pos + line_len]);
        let size_text = size_line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| DaemonError::Malformed(format!("bad chunk size: {size_text:?}")))?;
        pos += line_len + 2;

        if size == 0 {
            return Ok(Some(decoded));
        }
        let data_end = pos
            .checked_add(size)
            .filter(|end| end.checked_add(2).is_some())
            .ok_or_else(|| {
                DaemonError::Malformed(format!("chunk size too large: {size_text:?}"))
            })?;
        if raw.len() < data_end + 2 {
            return Ok(None);
        }
        decoded.extend_from_slice(&raw[pos..data_end]);
        pos = data_end + 2;
    }
}
