//! `DevAssist` CLI - generate, stream and inspect usage through the LLM orchestrator
#![cfg_attr(
    test,
    allow(
        dead_code,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::missing_errors_doc,
        clippy::print_stdout,
        clippy::print_stderr,
        reason = "Allow for tests"
    )
)]

use std::io;

use anyhow::Result;
use clap::Parser as _;
use cli::{Cli, Commands};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

mod cli;
mod handlers;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout carries only generated text
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "devassist=info,devassist_orchestrator=info,devassist_providers=warn".into()
        }))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();

    let config = handlers::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate { request, json } => {
            handlers::handle_generate(&config, request, json).await
        }
        Commands::Stream { request } => handlers::handle_stream(&config, request).await,
        Commands::Health { json } => handlers::handle_health(&config, json).await,
        Commands::Usage {
            days,
            user,
            org,
            provider,
        } => handlers::handle_usage(&config, days, user, org, provider).await,
        Commands::Templates { task, show } => {
            handlers::handle_templates(&config, task, show.as_deref())
        }
    }
}
