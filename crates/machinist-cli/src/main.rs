mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{AgentCommand, Cli, Command, ConfigCommand, ImageCommand, ProfileCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let target = commands::resolve_target(cli.server.clone());

    match cli.command {
        Command::Agent(AgentCommand::Run { config }) => commands::agent_run(config).await,
        Command::Agent(AgentCommand::Status) => commands::status(&target).await,
        Command::Agent(AgentCommand::Reload) => commands::reload(&target).await,
        Command::List => commands::list(&target).await,
        Command::Spawn { name, all } => commands::spawn(&target, name, all).await,
        Command::Stop { name } => commands::lifecycle(&target, "stop", &name).await,
        Command::Start { name } => commands::lifecycle(&target, "start", &name).await,
        Command::Restart { name } => commands::lifecycle(&target, "restart", &name).await,
        Command::Remove { name, force } => commands::remove(&target, &name, force).await,
        Command::Exec { name, argv } => commands::exec(&target, &name, argv).await,
        Command::Shell { name } => commands::shell(&target, &name).await,
        Command::Image(ImageCommand::Pull { name }) => commands::image_pull(&target, &name).await,
        Command::Image(ImageCommand::List) => commands::list_typed(&target, "images").await,
        Command::Profile(ProfileCommand::List) => commands::list_typed(&target, "profiles").await,
        Command::Status => commands::status(&target).await,
        Command::Config(ConfigCommand::Validate) => commands::validate(&target).await,
    }
}
