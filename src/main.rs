use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use taskhook::cli::{Cli, Command};
use taskhook::config::TaskhookConfig;
use taskhook::server::{self, Inbox};
use taskhook::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Command::Serve {
            bind,
            max_iterations,
        } => {
            let mut config = TaskhookConfig::load(&cli.config)?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(max) = max_iterations {
                config.validation.max_iterations = max;
            }

            let engine = Arc::new(Engine::from_config(&config).context("building engine")?);
            info!(bind = %config.server.bind, "starting taskhook server");
            let app = server::router(engine, Arc::new(Inbox::new()));
            server::serve(app, config.server.bind).await?;
        }
        Command::Receive { bind } => {
            info!(%bind, "starting webhook receiver");
            let app = server::receiver::router(Arc::new(Inbox::new()))
                .layer(tower_http::trace::TraceLayer::new_for_http());
            server::serve(app, bind).await?;
        }
    }

    Ok(())
}
