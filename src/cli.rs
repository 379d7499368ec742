use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "liveforged")]
#[command(author, version, about = "Live stream to HLS transcoding orchestrator")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestrator with ingest callbacks and HLS delivery
    Start {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that the configured transcoder is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_overrides() {
        let cli = Cli::parse_from(["liveforged", "-v", "start", "--port", "9000"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Start { host, port } => {
                assert_eq!(host, None);
                assert_eq!(port, Some(9000));
            }
            _ => panic!("expected start"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["liveforged", "check-tools", "--config", "/etc/lf.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/lf.toml")));
        assert!(matches!(cli.command, Commands::CheckTools));
    }
}
