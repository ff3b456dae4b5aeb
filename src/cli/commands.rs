use clap::{Parser, Subcommand};

/// `axgate` - deterministic policy gateway for UI and shell automation.
#[derive(Parser, Debug)]
#[command(name = "axgate")]
#[command(version)]
#[command(about = "Audited, replayable gate between automation intents and their effects.", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the control-plane gateway (/chat, /observe, /replay, /health)
    Serve {
        /// Port to listen on (use 0 for random available port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },

    /// Replay the audit ledger and report the first divergence
    Replay {
        /// First sequence number to replay
        #[arg(long, default_value = "1")]
        from_seq: u64,

        /// Maximum number of records to replay
        #[arg(long)]
        limit: Option<usize>,

        /// Number of segments replayed in parallel
        #[arg(long, default_value = "1")]
        segments: usize,
    },

    /// Verify the audit hash chain
    Verify,

    /// Print the 64-entry existence verdict table
    Table,

    /// Print the effective configuration
    Config,
}
