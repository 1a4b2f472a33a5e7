use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docker-broker")]
#[command(version)]
#[command(about = "Service broker provisioning docker containers on registered agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Directory holding default.toml and environment overrides
    #[arg(long, global = true, default_value = "config")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the broker API (default)
    Serve,
    /// Run the agent heartbeat on a docker host
    Agent {
        /// Agent configuration file
        #[arg(short, long, default_value = "config/agent.toml")]
        config: PathBuf,
    },
    /// Apply database migrations and exit
    Migrate,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::parse_from(["docker-broker"]);
        assert!(matches!(cli.command(), Commands::Serve));
        assert_eq!(cli.config_dir, PathBuf::from("config"));
    }

    #[test]
    fn test_agent_subcommand() {
        let cli = Cli::parse_from(["docker-broker", "agent", "--config", "/etc/agent.toml"]);
        match cli.command() {
            Commands::Agent { config } => assert_eq!(config, PathBuf::from("/etc/agent.toml")),
            _ => panic!("expected agent subcommand"),
        }
    }
}
