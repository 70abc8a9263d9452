use clap::{Parser, Subcommand};

/// Broome: developer licensing service
#[derive(Parser)]
#[command(name = "broome", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to BROOME_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Manage developers
    Developer {
        #[command(subcommand)]
        command: DeveloperCommands,
    },
}

#[derive(Subcommand)]
pub enum DeveloperCommands {
    /// Register a developer with a password and a trial window
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "BROOME_DEVELOPER_PASSWORD")]
        password: String,
    },
    /// List all developers
    List,
    /// Show the developer holding a token
    Show {
        token: String,
    },
    /// Run a session check (renews and charges if the license has lapsed)
    Check {
        id: String,
    },
}
