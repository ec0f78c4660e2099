use clap::{Parser, Subcommand};

pub mod output;

#[derive(Parser)]
#[command(name = "meetrelay")]
#[command(version)]
#[command(about = "Command relay for meeting host agents", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory
    #[arg(short, long, default_value = "config", env = "MEETRELAY_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay server with its sweeper and reconciliation loops
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the host agent
    Agent {
        /// Log input instead of driving the desktop
        #[arg(long)]
        dry_run: bool,
    },
    /// Run one reconciliation pass and print its counters
    Sync,
    /// Expire meetings whose start time has passed
    Expire,
    /// List registered agents
    Agents {
        #[arg(long)]
        json: bool,
    },
    /// List cached meetings
    Meetings {
        /// Filter by status (active, expired, deleted)
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Queue a command for an agent
    Enqueue {
        #[arg(short, long)]
        agent_id: i64,
        /// Action, e.g. open_url or recording_start
        #[arg(long)]
        action: String,
        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_arguments_parse() {
        let cli = Cli::parse_from([
            "meetrelay",
            "enqueue",
            "--agent-id",
            "4",
            "--action",
            "open_url",
            "--payload",
            r#"{"url":"https://meet.example/1"}"#,
        ]);
        match cli.command {
            Commands::Enqueue {
                agent_id, action, ..
            } => {
                assert_eq!(agent_id, 4);
                assert_eq!(action, "open_url");
            }
            _ => panic!("expected enqueue"),
        }
        assert_eq!(cli.config, "config");
    }
}
