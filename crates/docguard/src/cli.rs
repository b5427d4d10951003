use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "docguard",
    about = "Moderate uploaded documents before they are published",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue files for moderation and process them until the queue is empty
    Moderate {
        /// Files to moderate
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Declared file type (extension or MIME); defaults to each file's extension
        #[arg(long = "type")]
        file_type: Option<String>,
    },
    /// Run the worker pool until interrupted
    Serve,
    /// Analyze a single file without queueing it and print the result
    Check {
        /// File to analyze
        path: PathBuf,
        /// Declared file type (extension or MIME); defaults to the file's extension
        #[arg(long = "type")]
        file_type: Option<String>,
    },
    /// Show job counts per state
    Stats,
    /// List jobs that exhausted their retries
    Dead,
    /// Requeue the dead job for a document
    Revive {
        /// Document ID
        document_id: String,
    },
    /// Drop a job that has not started yet
    Cancel {
        /// Document ID
        document_id: String,
    },
}
