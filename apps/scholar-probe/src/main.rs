//! Operator CLI for the Scholar request layer.
//!
//! Loads the same configuration the application uses, then performs one
//! request or follows one analysis stream so connectivity, session handling
//! and streaming can be checked against a live backend.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scholar_http::{
    AnalysisEventHandler, Block, CancellationToken, ClientConfig, ClientError, ContentDelta, Done, ErrorEvent,
    ExpectedContentType, RequestClient, RequestOptions, ResponseBody, SessionStart, StepComplete, StepStart,
    Suggestions,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file; `SCHOLAR_API_*` variables take precedence
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override the configured base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Override the configured retry count
    #[arg(long)]
    retries: Option<u32>,

    /// Log method, URL and status of every call at debug level
    #[arg(long)]
    trace_calls: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// GET a path and print the negotiated body
    Get {
        path: String,
        /// How to parse a successful body
        #[arg(long, value_enum, default_value_t = Expect::Auto)]
        expect: Expect,
    },
    /// POST a JSON body to an analysis endpoint and print its events
    Analyze {
        path: String,
        /// JSON request payload
        #[arg(long, default_value = "{}")]
        body: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Expect {
    Auto,
    Json,
    Text,
    Blob,
}

impl From<Expect> for ExpectedContentType {
    fn from(value: Expect) -> Self {
        match value {
            Expect::Auto => ExpectedContentType::Auto,
            Expect::Json => ExpectedContentType::Json,
            Expect::Text => ExpectedContentType::Text,
            Expect::Blob => ExpectedContentType::Blob,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref()).context("loading client configuration")?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(retries) = cli.retries {
        config = config.with_retries(retries);
    }
    tracing::info!(base_url = %config.base_url, retries = config.retries, "scholar-probe starting");

    let client = RequestClient::new(config).context("building request client")?;
    client.set_logout_handler(|| tracing::warn!("session invalidated; log in again before retrying"));
    let _call_logging = cli.trace_calls.then(|| client.enable_debug_logging());

    match cli.command {
        Command::Get { path, expect } => get(&client, &path, expect.into()).await,
        Command::Analyze { path, body } => analyze(&client, &path, &body).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn get(client: &RequestClient, path: &str, expect: ExpectedContentType) -> Result<()> {
    let body = client
        .get(path, RequestOptions::new().expect(expect))
        .await
        .with_context(|| format!("GET {path}"))?;

    match body {
        ResponseBody::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        ResponseBody::Text(text) => println!("{text}"),
        ResponseBody::Binary(bytes) => println!("<{} bytes of binary data>", bytes.len()),
    }
    Ok(())
}

async fn analyze(client: &RequestClient, path: &str, body: &str) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(body).context("--body must be valid JSON")?;

    // Ctrl-C aborts the stream at any point. The configured timeout bounds
    // only the connection; reads after that run until the stream ends.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let summary = client
        .stream_analysis(path, &payload, RequestOptions::new().with_signal(cancel), &mut ConsolePrinter)
        .await
        .with_context(|| format!("analysis stream {path}"))?;

    tracing::info!(
        dispatched = summary.dispatched,
        skipped = summary.skipped,
        "analysis stream finished"
    );
    Ok(())
}

struct ConsolePrinter;

impl AnalysisEventHandler for ConsolePrinter {
    fn on_session_start(&mut self, event: SessionStart) {
        println!("session {} ({} steps)", event.session_id, event.steps.len());
    }

    fn on_step_start(&mut self, event: StepStart) {
        println!("> {}", event.label.as_deref().unwrap_or(&event.step));
    }

    fn on_step_complete(&mut self, event: StepComplete) {
        match event.summary {
            Some(summary) => println!("< {}: {summary}", event.step),
            None => println!("< {}", event.step),
        }
    }

    fn on_block(&mut self, event: Block) {
        println!("[{}] {}", event.block_type, event.content);
    }

    fn on_content_delta(&mut self, event: ContentDelta) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(event.content.as_bytes()).and_then(|()| out.flush()) {
            tracing::debug!(error = %e, "stdout write failed");
        }
    }

    fn on_suggestions(&mut self, event: Suggestions) {
        for item in event.items {
            println!("* {item}");
        }
    }

    fn on_error(&mut self, event: ErrorEvent) {
        tracing::warn!(message = %event.message, code = ?event.code, "analysis reported an error");
    }

    fn on_done(&mut self, event: Done) {
        println!();
        if let Some(usage) = event.usage {
            tracing::info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                duration_ms = ?event.duration_ms,
                "analysis done"
            );
        }
    }

    fn on_stream_error(&mut self, error: &ClientError) {
        tracing::error!(error = %error, "analysis stream failed");
    }
}
