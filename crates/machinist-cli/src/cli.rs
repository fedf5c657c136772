use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "machinist",
    about = "Declarative systemd-nspawn container orchestration",
    version
)]
pub struct Cli {
    /// Control-server address: a unix:// path or http(s):// base URL.
    /// Defaults to the local control socket under the state directory.
    #[arg(long, env = "MACHINIST_SERVER", global = true)]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List declared containers (and their observed status).
    List,

    /// Create and start a container (§6 client surface).
    Spawn {
        /// Container name; omit with --all to spawn every declared container.
        name: Option<String>,
        #[arg(long)]
        all: bool,
    },

    /// Stop a running container.
    Stop { name: String },

    /// Start a stopped container.
    Start { name: String },

    /// Stop then start a container.
    Restart { name: String },

    /// Remove a container.
    Remove {
        name: String,
        #[arg(long)]
        force: bool,
    },

    /// Run a command inside a container and print its output.
    Exec {
        name: String,
        /// Command and arguments, e.g. `machinist exec web -- ls -la`.
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },

    /// Open an interactive shell inside a container.
    Shell { name: String },

    #[command(subcommand)]
    Image(ImageCommand),

    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Print agent and container status.
    Status,

    #[command(subcommand)]
    Config(ConfigCommand),

    #[command(subcommand)]
    Agent(AgentCommand),
}

#[derive(Debug, Subcommand)]
pub enum ImageCommand {
    /// Pull a declared image onto the host.
    Pull { name: String },
    /// List declared images.
    List,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommand {
    /// List declared profiles.
    List,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Ask the agent to reload and validate the desired-state directory.
    Validate,
}

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Boot the agent in this process: control server, reconciler, scheduler.
    Run {
        /// Path to the top-level config.yaml.
        #[arg(long, default_value = "./config.yaml")]
        config: std::path::PathBuf,
    },
    /// Query the running agent's status.
    Status,
    /// Ask the running agent to reload its desired-state directory.
    Reload,
}
