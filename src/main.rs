//! agent-dispatch - run one prompt against any configured agent backend.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{error, warn};

use agent_dispatch::config::settings::{Credentials, DispatcherConfig};
use agent_dispatch::engine::{AgentExecutionRequest, Dispatcher, event_channel};
use agent_dispatch::logging::{self, LogFormat};

/// Run prompts against CLI agents, hosted APIs and inference daemons.
#[derive(Parser)]
#[command(name = "agent-dispatch", version)]
#[command(about = "Run a prompt under a named model and print a uniform JSON result")]
struct Cli {
    /// TOML configuration file (defaults apply when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one prompt and print the result as JSON.
    Run(RunArgs),

    /// List models installed on the local daemon.
    Models,

    /// Check whether the local daemon is reachable.
    Probe,
}

#[derive(Args)]
struct RunArgs {
    /// Model identifier, e.g. `codex`, `openai:gpt-4o-mini`, `ollama:llama3`.
    #[arg(long)]
    model: String,

    /// User prompt.
    #[arg(long)]
    prompt: String,

    /// System prompt.
    #[arg(long)]
    system: Option<String>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Session id to resume.
    #[arg(long)]
    resume: Option<String>,

    /// Maximum agent turns (CLI backend).
    #[arg(long)]
    max_turns: Option<u32>,

    /// Run a daemon model on this remote station.
    #[arg(long)]
    station: Option<String>,

    /// API key for this call (overrides the environment).
    #[arg(long)]
    credential: Option<String>,

    /// Tool the agent may use (repeatable).
    #[arg(long = "allow-tool")]
    allow_tool: Vec<String>,

    /// Tool the agent must not use (repeatable).
    #[arg(long = "deny-tool")]
    deny_tool: Vec<String>,

    /// Stream progress and log events to stderr as JSON lines.
    #[arg(long)]
    events: bool,
}

impl RunArgs {
    fn into_request(self) -> AgentExecutionRequest {
        let mut request = AgentExecutionRequest::new(self.model, self.prompt)
            .with_allowed_tools(self.allow_tool)
            .with_disallowed_tools(self.deny_tool);

        if let Some(system) = self.system {
            request = request.with_system_prompt(system);
        }
        if let Some(secs) = self.timeout_secs {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        if let Some(session) = self.resume {
            request = request.with_resume_session(session);
        }
        if let Some(max_turns) = self.max_turns {
            request = request.with_max_turns(max_turns);
        }
        if let Some(station) = self.station {
            request = request.with_station(station);
        }
        if let Some(credential) = self.credential {
            request = request.with_credential(credential);
        }
        request
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match logging::init_tracing(cli.log_format, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: cannot open log file: {e}");
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "agent-dispatch failed");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config = match &cli.config {
        Some(path) => DispatcherConfig::from_file(path)?,
        None => DispatcherConfig::default(),
    };
    let dispatcher = Dispatcher::new(config.with_credentials(Credentials::from_env()));

    match cli.command {
        Commands::Run(args) => {
            let stream_events = args.events;
            let mut request = args.into_request();

            let printer = if stream_events {
                let (sink, mut events) = event_channel();
                request = request.with_events(sink);
                Some(tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        match serde_json::to_string(&event) {
                            Ok(line) => eprintln!("{line}"),
                            Err(e) => warn!(error = %e, "cannot serialize event"),
                        }
                    }
                }))
            } else {
                None
            };

            let result = dispatcher.execute(&request).await?;
            // 送信側を閉じてからイベント出力の完了を待つ
            drop(request);
            if let Some(printer) = printer {
                printer.await?;
            }

            println!("{}", result.to_json()?);
            Ok(ExitCode::from(u8::try_from(result.exit_code).unwrap_or(1)))
        }
        Commands::Models => {
            for model in dispatcher.local_daemon().list_models().await? {
                println!("{model}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe => {
            if dispatcher.local_daemon().is_available().await {
                println!("available");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("unavailable");
                Ok(ExitCode::from(1))
            }
        }
    }
}
