use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `agentplane` - reconciliation and admission control for ephemeral agent runs.
#[derive(Parser, Debug)]
#[command(name = "agentplane")]
#[command(version = "0.1.0")]
#[command(
    about = "Turns declarative agent runs and schedules into isolated jobs.",
    long_about = None
)]
pub struct Cli {
    /// Config file (default: ~/.agentplane/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run both reconcilers and the admission webhook under a restart supervisor
    Daemon {
        /// Webhook host override
        #[arg(long)]
        host: Option<String>,

        /// Webhook port override
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the AgentRun and Schedule reconcilers only
    Controller,

    /// Run the admission webhook only
    Webhook {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Preview the next fire times of a cron expression
    CronNext {
        /// 5-field cron expression, e.g. "*/15 * * * *"
        expression: String,

        /// Number of fire times to print
        #[arg(short, long, default_value = "5")]
        count: usize,
    },

    /// Print the job a run would produce, without touching any store
    Render {
        /// AgentRun manifest (JSON)
        #[arg(long)]
        run: PathBuf,

        /// AgentPolicy manifest (JSON) bound to the run's instance
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Mount the instance memory artifact
        #[arg(long)]
        memory: bool,
    },
}
