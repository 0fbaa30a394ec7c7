//! Pagewright CLI
//!
//! Serves the task gateway, or runs a single round from a request file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pagewright_github::{GithubClient, GithubClientOptions, HostingPlatform};
use pagewright_orchestrator::{
    channel, create_router, AppState, Config, GenerationClient, HttpNotifier, OpenAiBackend,
    RepositoryPublisher, RoundRunner, TaskRequest,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP gateway.
const DEFAULT_PORT: u16 = 8000;

/// Default bind address for the HTTP gateway.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Pagewright - LLM-built static apps on GitHub Pages
///
/// Accepts task rounds over HTTP, generates the app, publishes it to a
/// GitHub repository with Pages enabled and notifies the evaluator.
#[derive(Parser, Debug)]
#[command(name = "pagewright")]
#[command(version, about, long_about = None)]
struct Args {
    /// Env file to load before reading the environment (default: .env.local)
    #[arg(long, value_name = "FILE", global = true)]
    env_file: Option<PathBuf>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Run the HTTP gateway (default)
    Serve {
        /// Address to bind
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Execute one round in the foreground and print the evaluation record
    Run {
        /// Path to a task request JSON file
        #[arg(value_name = "REQUEST")]
        request: PathBuf,
    },
}

impl Default for Command {
    fn default() -> Self {
        Self::Serve {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match args.command.clone().unwrap_or_default() {
        Command::Serve { host, port } => run_server(args.env_file.as_deref(), &host, port).await,
        Command::Run { request } => run_single_round(args.env_file.as_deref(), &request).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Serves the gateway until Ctrl+C, then drains in-flight rounds.
async fn run_server(env_file: Option<&Path>, host: &str, port: u16) -> anyhow::Result<()> {
    let config = Config::load(env_file)?;
    print_config(&config);

    let runner = build_runner(&config)?;
    let (dispatcher, worker) = channel(runner);
    let worker_handle = tokio::spawn(worker.run());

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        anyhow::anyhow!("Invalid bind address '{host}:{port}': {e}\n\nSuggestion: Use an IP address such as 0.0.0.0 for --host")
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    let router = create_router(AppState::new(&config, dispatcher));
    println!("Gateway listening on http://{addr}");
    println!("Press Ctrl+C to stop");
    tracing::info!(%addr, "Gateway started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    // The router owned the last dispatcher; the worker exits once its jobs finish.
    tracing::info!("Waiting for in-flight rounds to finish");
    worker_handle
        .await
        .map_err(|e| anyhow::anyhow!("Worker task failed: {e}"))?;
    Ok(())
}

/// Runs one round without the gateway.
async fn run_single_round(env_file: Option<&Path>, request_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(env_file)?;

    let raw = tokio::fs::read_to_string(request_path).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to read request file '{}': {e}",
            request_path.display()
        )
    })?;
    let request: TaskRequest = serde_json::from_str(&raw).map_err(|e| {
        anyhow::anyhow!(
            "Invalid request file '{}': {e}\n\nSuggestion: Use the same JSON body POST /task accepts",
            request_path.display()
        )
    })?;
    request.validate()?;
    if request.secret != config.secret_key {
        tracing::warn!("Request secret does not match SECRET_KEY; running anyway");
    }

    let runner = build_runner(&config)?;
    let record = runner.run(&request).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Wires the production collaborators from configuration.
fn build_runner(config: &Config) -> anyhow::Result<RoundRunner> {
    let retry = config.retry_policy();

    let github = GithubClient::new(
        GithubClientOptions::new(&config.github_token, &config.github_username)
            .with_base_url(&config.github_api_url)
            .with_timeout(config.github_timeout()),
    )?;
    let platform: Arc<dyn HostingPlatform> = Arc::new(github);

    let backend = OpenAiBackend::from_config(config)?;
    let generator = GenerationClient::new(Arc::new(backend), retry);
    let publisher = RepositoryPublisher::new(platform, retry);
    let notifier = HttpNotifier::new(retry, config.evaluation_timeout())?;

    Ok(RoundRunner::new(Arc::new(generator), Arc::new(publisher), Arc::new(notifier))
        .with_settle_delay(config.settle_delay()))
}

/// Resolves when the process receives Ctrl+C. Never resolves if the
/// signal handler cannot be installed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// Prints the non-secret parts of the configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  GitHub account: {}", config.github_username);
    println!("  GitHub API: {}", config.github_api_url);
    println!("  LLM endpoint: {}", config.llm_base_url);
    println!("  LLM model: {}", config.llm_model);
    println!("  Evaluation timeout: {}s", config.evaluation_timeout_secs);
    println!("  Settle delay: {}s", config.settle_delay_secs);
    println!("  Retry attempts: {}", config.retry_max_attempts);
}
