//! tgram-bridge - JSON-RPC stdio bridge for the tgram terminal client.
//!
//! This is the main entry point for the bridge process. A leading
//! subcommand selects the interactive auth flows (`login` / `logout`),
//! which bypass the framing loop entirely; the default invocation connects
//! to the session daemon and runs the session loop over stdin/stdout until
//! EOF or a termination signal.
//!
//! stdout carries nothing but frames; all logging goes to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tgram_bridge::auth::{self, SessionStore};
use tgram_bridge::backend::BackendClient;
use tgram_bridge::client::ChatClient;
use tgram_bridge::config::Config;
use tgram_bridge::dispatch::HandlerRegistry;
use tgram_bridge::session;

#[derive(Parser)]
#[command(
    name = "tgram-bridge",
    version,
    about = "JSON-RPC stdio bridge for the tgram terminal Telegram client",
    after_help = "Examples:\n  tgram-bridge login --phone +15550100\n  tgram-bridge logout\n  tgram-bridge   # run the bridge loop on stdin/stdout"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Log in to the chat session interactively")]
    Login(LoginArgs),
    #[command(about = "Log out and clear the local session marker")]
    Logout,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long, help = "Phone number to send the login code to")]
    phone: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Logging goes to stderr: stdout is the RPC channel.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tgram=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load();
    let store = SessionStore::new(config.session_path.clone());

    match cli.command {
        Some(Command::Login(args)) => {
            let client = connect_backend(&config).await?;
            auth::login(&client, &store, args.phone).await?;
            Ok(())
        }
        Some(Command::Logout) => {
            // Logout must clear local state even when the daemon is gone.
            let client = connect_backend(&config).await.ok();
            auth::logout(client.as_ref(), &store).await?;
            Ok(())
        }
        None => run_bridge(&config, &store).await,
    }
}

async fn connect_backend(config: &Config) -> Result<BackendClient> {
    let mut client =
        BackendClient::connect_with_retry(&config.socket_path, config.connect_attempts)
            .await
            .with_context(|| {
                format!(
                    "could not reach the session daemon at {}",
                    config.socket_path.display()
                )
            })?;
    client.set_timeout(config.call_timeout);
    Ok(client)
}

/// Best-effort machine-readable startup failure: one error frame with a
/// null id on stdout, so the UI sees why the bridge is gone.
async fn emit_startup_failure(message: &str) {
    use tgram_bridge::rpc::framing::write_frame;
    use tgram_bridge::rpc::message::{codes, JsonRpcResponse, RpcErrorObject};

    let frame = JsonRpcResponse::error(
        None,
        RpcErrorObject::new(codes::INTERNAL_ERROR, message.to_string()),
    )
    .into_value();
    let mut stdout = tokio::io::stdout();
    let _ = write_frame(&mut stdout, &frame).await;
}

async fn run_bridge(config: &Config, store: &SessionStore) -> Result<()> {
    info!("starting tgram-bridge v{}", env!("CARGO_PKG_VERSION"));

    if store.load().unwrap_or(None).is_none() {
        let message = "no session found. Run `tgram-bridge login` first.";
        emit_startup_failure(message).await;
        anyhow::bail!(message);
    }

    let client = match connect_backend(config).await {
        Ok(client) => Arc::new(client) as Arc<dyn ChatClient>,
        Err(err) => {
            emit_startup_failure(&format!("{err:#}")).await;
            return Err(err);
        }
    };
    let registry = Arc::new(HandlerRegistry::standard());

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    };

    session::run(
        client,
        registry,
        tokio::io::stdin(),
        tokio::io::stdout(),
        shutdown,
    )
    .await
}
