mod api;
mod claude;
mod config;
mod images;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::Request;
use clap::Parser;
use dotenvy::dotenv;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use std::io::Write;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::claude::{Bridge, ChatInput, ClaudeCommand, ProcessRegistry, StreamEvent};
use crate::config::Config;
use crate::images::ImageStaging;

const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Parser)]
#[command(name = "helm", about = "Streaming chat bridge to the Claude CLI")]
enum Cli {
    /// Start the HTTP server (default when no subcommand is given)
    #[command(alias = "run")]
    Serve,
    /// Ask a single question and print the answer
    Ask {
        /// The question
        message: String,
        /// Image files to attach
        #[arg(long = "image")]
        images: Vec<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Default to Serve when no subcommand is given, but keep --help working.
    let args: Vec<String> = std::env::args().collect();
    let cli = if args.len() <= 1 { Cli::Serve } else { Cli::parse() };

    let config = Config::from_env();
    init_tracing();

    match cli {
        Cli::Serve => run_server(config).await,
        Cli::Ask { message, images } => run_ask(config, message, images).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("helm=info,tower_http=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_tree::HierarchicalLayer::new(2).with_targets(true).with_bracketed_fields(false))
        .with(sentry::integrations::tracing::layer().event_filter(
            |metadata| match *metadata.level() {
                tracing::Level::ERROR => sentry::integrations::tracing::EventFilter::Event,
                tracing::Level::WARN | tracing::Level::INFO => {
                    sentry::integrations::tracing::EventFilter::Breadcrumb
                }
                _ => sentry::integrations::tracing::EventFilter::Ignore,
            },
        ))
        .init();
}

fn build_bridge(config: &Config) -> Bridge {
    let command = ClaudeCommand::claude(
        config.claude_bin.clone(),
        config.project_root.clone(),
        config.max_turns,
    );
    Bridge::new(
        command,
        ProcessRegistry::new(),
        ImageStaging::in_temp_dir(),
        config.request_timeout,
    )
}

async fn run_server(config: Config) -> Result<()> {
    let _guard = sentry::init((
        config.sentry_dsn.clone().unwrap_or_default(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            send_default_pii: false,
            traces_sample_rate: 0.2,
            enable_logs: true,
            ..Default::default()
        },
    ));

    let bridge = build_bridge(&config);
    tracing::info!(
        claude_bin = %config.claude_bin,
        project_root = %config.project_root.display(),
        max_turns = config.max_turns,
        timeout_secs = config.request_timeout.as_secs(),
        "assistant bridge ready"
    );

    spawn_upload_sweeper(bridge.staging().clone(), config.upload_max_age);

    let app_state = api::AppState {
        bridge,
        static_dir: config.static_dir.clone(),
    };

    let app = api::create_app(app_state)
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(NewSentryLayer::<Request<Body>>::new_from_top());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Periodically delete staged uploads nobody came back for.
fn spawn_upload_sweeper(staging: ImageStaging, max_age: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            match staging.reap_expired(max_age).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "swept expired uploads"),
                Err(e) => tracing::warn!(error = %e, dir = %staging.dir().display(), "upload sweep failed"),
            }
        }
    });
}

async fn run_ask(config: Config, message: String, image_files: Vec<std::path::PathBuf>) -> Result<()> {
    let mut data_urls = Vec::with_capacity(image_files.len());
    for path in &image_files {
        let url = images::encode_file_as_data_url(path)
            .await
            .with_context(|| format!("failed to attach {}", path.display()))?;
        data_urls.push(url);
    }

    let bridge = build_bridge(&config);
    let input = ChatInput { message, images: data_urls, history: Vec::new() };

    let reply = bridge
        .ask(input, |event| {
            if let StreamEvent::Tool { friendly_name, icon, .. } = event {
                eprintln!("{icon} {friendly_name}");
            }
        })
        .await;

    match reply {
        Ok(content) => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{content}").context("failed to write answer")?;
            Ok(())
        }
        Err(message) => anyhow::bail!(message),
    }
}
