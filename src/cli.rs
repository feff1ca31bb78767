use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the catalog
    List {
        /// Print only the number of entities
        #[clap(short, long, default_value = "false")]
        count: bool,

        /// Include embeddings in the output
        #[clap(long, default_value = "false")]
        with_embeddings: bool,
    },

    /// Show one entity
    Get {
        id: u64,
    },

    /// Rank the catalog against the synthesized embedding of a text
    Match {
        seed_text: String,

        /// Number of matches, 1 to 10
        #[clap(short, long, default_value = "5")]
        top: usize,
    },

    /// Upsert every record of a seed file into the catalog
    Ingest {
        file: PathBuf,
    },

    /// Back-fill synthesized embeddings for entities that have none
    Embed {
        /// Stop after this many entities
        #[clap(short, long)]
        limit: Option<usize>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::List { .. } => "list",
            Command::Get { .. } => "get",
            Command::Match { .. } => "match",
            Command::Ingest { .. } => "ingest",
            Command::Embed { .. } => "embed",
        }
    }
}
