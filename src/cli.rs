use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::request::RotationStep;

/// rotator: four-phase rotation of database credentials held in a secret store
#[derive(Parser)]
#[command(name = "rotator", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single rotation phase
    Rotate {
        #[arg(long)]
        secret_id: String,
        /// Version id of the rotation cycle
        #[arg(long)]
        token: String,
        /// createSecret, setSecret, testSecret or finishSecret
        #[arg(long, value_parser = parse_step)]
        step: RotationStep,
    },

    /// Run all four phases in order
    RotateAll {
        #[arg(long)]
        secret_id: String,
        /// Defaults to a fresh UUID
        #[arg(long)]
        token: Option<String>,
    },

    /// Serve the HTTP invocation endpoint
    Serve {
        /// Port to bind (overrides ROTATOR_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or seed secrets directly
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
}

#[derive(Subcommand)]
pub enum SecretCommands {
    /// Store a credential record file as the CURRENT version
    Put {
        #[arg(long)]
        secret_id: String,
        /// JSON file with host, port, dbname, username, password
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        token: Option<String>,
    },
    /// Print every version and its stage labels
    Stages {
        #[arg(long)]
        secret_id: String,
    },
}

fn parse_step(s: &str) -> Result<RotationStep, String> {
    s.parse().map_err(|e: crate::errors::RotationError| e.to_string())
}
