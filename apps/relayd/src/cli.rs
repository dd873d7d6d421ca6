use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relayd")]
#[command(about = "Continuous deployment relay")]
pub struct Cli {
    /// Configuration file (defaults to ~/.relay/config.json)
    #[arg(long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Key database URL (defaults to ~/.relay/keys.db)
    #[arg(long, env = "RELAY_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "RELAY_METRICS_ADDR")]
    pub metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Team API key commands
    Keys {
        #[command(subcommand)]
        keys_cmd: KeysCommand,
    },
    /// List teams visible to the given groups
    Teams {
        /// Comma-separated authorization groups of the caller
        #[arg(long, value_delimiter = ',', required = true)]
        groups: Vec<String>,
    },
    /// Write a default configuration file
    InitConfig {
        /// Also add an agent section for this cluster
        #[arg(long)]
        cluster: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run dispatcher, agent and status watcher in one process
    Run {
        /// Cluster this agent deploys to (overrides the config file)
        #[arg(long, env = "RELAY_CLUSTER")]
        cluster: Option<String>,

        /// Kubeconfig context to use
        #[arg(long)]
        context: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Create the first key of a team
    Init {
        #[arg(long)]
        team: String,

        /// Authorization group that owns the team's keys
        #[arg(long)]
        group: String,
    },
    /// List keys visible to the given groups
    List {
        #[arg(long, value_delimiter = ',', required = true)]
        groups: Vec<String>,
    },
    /// Show a team's keys, newest first
    Show {
        #[arg(long)]
        team: String,

        #[arg(long, value_delimiter = ',', required = true)]
        groups: Vec<String>,

        /// Show at most this many keys
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Add a fresh key for a team; older keys stay valid until purged
    Rotate {
        #[arg(long)]
        team: String,

        #[arg(long, value_delimiter = ',', required = true)]
        groups: Vec<String>,
    },
    /// Remove every key of a team except the newest
    Purge {
        #[arg(long)]
        team: String,

        #[arg(long, value_delimiter = ',', required = true)]
        groups: Vec<String>,
    },
}
