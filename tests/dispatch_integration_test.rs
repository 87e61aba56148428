use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agent_dispatch::config::settings::{CodexConfig, Credentials, DispatcherConfig, OllamaConfig};
use agent_dispatch::engine::{
    AgentEvent, AgentExecutionRequest, AgentExecutionResult, Dispatcher, ErrorKind, EventSink,
    LogEntry, event_channel,
};
use agent_dispatch::error::DispatchError;
use agent_dispatch::provider::{
    CliAgentRunner, CliRunOptions, RemoteCommandOutput, RemoteExecutor,
};

const EXAMPLE_CONFIG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/dispatch.example.toml");

/// 受け取ったオプションを JSON で返す CLI ヘルパー
struct OptionsEcho;

#[async_trait]
impl CliAgentRunner for OptionsEcho {
    async fn run(
        &self,
        options: CliRunOptions,
        events: Option<EventSink>,
    ) -> AgentExecutionResult {
        if let Some(sink) = events {
            let _ = sink.send(AgentEvent::Log(LogEntry::assistant_text("echo")));
        }
        let output = format!(
            "model={} resume={}",
            options.model.as_deref().unwrap_or("-"),
            options.resume_session_id.as_deref().unwrap_or("-")
        );
        AgentExecutionResult::success(output, 0).with_session_id(options.resume_session_id)
    }
}

/// 常に成功する遠隔実行の協力者
struct StationEcho;

#[async_trait]
impl RemoteExecutor for StationEcho {
    async fn exec(
        &self,
        _station: &str,
        _command: &str,
        _timeout: Duration,
    ) -> Option<RemoteCommandOutput> {
        Some(RemoteCommandOutput {
            exit_code: 0,
            stdout: r#"{"message":{"content":"remote ok"}}"#.to_string(),
            stderr: String::new(),
        })
    }
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn base_config() -> DispatcherConfig {
    DispatcherConfig {
        ollama: OllamaConfig {
            port: closed_port(),
            ..OllamaConfig::default()
        },
        ..DispatcherConfig::default()
    }
}

#[test]
fn test_load_example_config() {
    let config = DispatcherConfig::from_file(EXAMPLE_CONFIG).expect("Failed to load config");

    assert_eq!(config.codex.default_timeout, Duration::from_secs(900));
    assert_eq!(config.anthropic.max_tokens, 8192);
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.remote.ssh_program, "ssh");
}

#[test]
fn test_example_config_roundtrip() {
    let original = DispatcherConfig::from_file(EXAMPLE_CONFIG).expect("Failed to load config");
    let toml_string = original.to_toml_string().expect("Failed to serialize");
    let restored = DispatcherConfig::from_toml(&toml_string).expect("Failed to parse");

    assert_eq!(restored.codex, original.codex);
    assert_eq!(restored.openai, original.openai);
    assert_eq!(restored.anthropic, original.anthropic);
    assert_eq!(restored.remote, original.remote);
}

#[tokio::test]
async fn test_malformed_model_is_rejected_before_any_backend() {
    let dispatcher = Dispatcher::new(base_config());

    let err = dispatcher
        .execute(&AgentExecutionRequest::new("", "hi"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::MalformedModel(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_codex_stream_end_to_end() {
    let script = r#"printf '%s\n' '{"type":"thread.started","thread_id":"t1"}'
printf '%s\n' '{"type":"item.completed","item":{"type":"command_execution","command":"ls","aggregated_output":"a.rs\n","exit_code":0}}'
printf '%s\n' '{"type":"item.completed","item":{"type":"agent_message","text":"Hi there"}}'"#;
    let config = DispatcherConfig {
        codex: CodexConfig {
            program: "sh".to_string(),
            leading_args: vec!["-c".to_string(), script.to_string(), "codex-stub".to_string()],
            ..CodexConfig::default()
        },
        ..base_config()
    };
    let dispatcher = Dispatcher::new(config);
    let (sink, mut events) = event_channel();

    let request = AgentExecutionRequest::new("codex", "say hi").with_events(sink);
    let result = dispatcher.execute(&request).await.unwrap();
    drop(request);

    assert_eq!(result.output, "Hi there");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.session_id.as_deref(), Some("t1"));
    assert!(!result.timed_out);

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        received.push(event);
    }
    assert!(received.contains(&AgentEvent::Log(LogEntry::tool_call("ls"))));
    assert!(received.contains(&AgentEvent::Log(LogEntry::assistant_text("Hi there"))));

    let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "output": "Hi there",
            "exitCode": 0,
            "durationMs": result.duration_ms,
            "sessionId": "t1",
            "timedOut": false
        })
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_codex_timeout_end_to_end() {
    let config = DispatcherConfig {
        codex: CodexConfig {
            program: "sh".to_string(),
            leading_args: vec![
                "-c".to_string(),
                "sleep 30".to_string(),
                "codex-stub".to_string(),
            ],
            kill_grace: Duration::from_secs(1),
            ..CodexConfig::default()
        },
        ..base_config()
    };
    let dispatcher = Dispatcher::new(config);

    let request =
        AgentExecutionRequest::new("codex", "hang").with_timeout(Duration::from_millis(300));
    let result = dispatcher.execute(&request).await.unwrap();

    assert!(result.timed_out);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.duration_ms < 10_000);
}

#[tokio::test]
async fn test_openai_unauthorized_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-expired")
        .with_status(401)
        .with_body(r#"{"error":{"message":"Invalid API key"}}"#)
        .create_async()
        .await;

    let mut config =
        base_config().with_credentials(Credentials::default().with_openai("sk-expired"));
    config.openai.base_url = server.url();
    let dispatcher = Dispatcher::new(config);

    let result = dispatcher
        .execute(&AgentExecutionRequest::new("openai:gpt-4o-mini", "hi"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(result.exit_code, 1);
    assert!(result.output.contains("OpenAI API 401: Invalid API key"));
    assert_eq!(result.session_id, None);
}

#[tokio::test]
async fn test_anthropic_success_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "sk-ant-call")
        .with_status(200)
        .with_body(r#"{"content":[{"type":"text","text":"Bonjour"}]}"#)
        .create_async()
        .await;

    let mut config = base_config();
    config.anthropic.api.base_url = server.url();
    let dispatcher = Dispatcher::new(config);

    // 呼び出し単位の認証情報（環境変数は参照しない）
    let request = AgentExecutionRequest::new("anthropic", "hi").with_credential("sk-ant-call");
    let result = dispatcher.execute(&request).await.unwrap();

    assert_eq!(result.output, "Bonjour");
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
async fn test_huge_timeouts_settle_normally() {
    let dispatcher = Dispatcher::new(base_config()).with_remote_executor(Arc::new(StationEcho));

    let remote = AgentExecutionRequest::new("ollama:llama3", "hi")
        .with_station("gpu-1")
        .with_timeout(Duration::MAX);
    let result = dispatcher.execute(&remote).await.unwrap();
    assert_eq!(result.output, "remote ok");

    let hosted = AgentExecutionRequest::new("openai", "hi").with_timeout(Duration::MAX);
    let result = dispatcher.execute(&hosted).await.unwrap();
    assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_local_daemon_connection_refused_end_to_end() {
    let dispatcher = Dispatcher::new(base_config());

    let result = dispatcher
        .execute(&AgentExecutionRequest::new("ollama:llama3", "hi"))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 1);
    assert!(result.output.contains("connection to 127.0.0.1:"));
    assert_eq!(result.session_id, None);
    assert!(!dispatcher.local_daemon().is_available().await);
}

#[tokio::test]
async fn test_cli_backend_end_to_end() {
    let dispatcher = Dispatcher::new(base_config()).with_cli_runner(Arc::new(OptionsEcho));
    let (sink, mut events) = event_channel();

    let request = AgentExecutionRequest::new("claude", "continue")
        .with_resume_session("sess-1")
        .with_events(sink);
    let result = dispatcher.execute(&request).await.unwrap();

    assert_eq!(result.output, "model=- resume=sess-1");
    assert_eq!(result.session_id.as_deref(), Some("sess-1"));
    assert_eq!(
        events.try_recv().unwrap(),
        AgentEvent::Log(LogEntry::assistant_text("echo"))
    );

    let result = dispatcher
        .execute(&AgentExecutionRequest::new("claude-opus-4-1", "hi"))
        .await
        .unwrap();
    assert_eq!(result.output, "model=claude-opus-4-1 resume=-");
}

#[tokio::test]
async fn test_concurrent_calls_are_independent() {
    let dispatcher =
        Arc::new(Dispatcher::new(base_config()).with_cli_runner(Arc::new(OptionsEcho)));

    let calls: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let request = AgentExecutionRequest::new(format!("model-{i}"), "hi");
                dispatcher.execute(&request).await.unwrap()
            })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let result = call.await.unwrap();
        assert_eq!(result.output, format!("model=model-{i} resume=-"));
    }
}
