//! Medley CLI — Command-line interface for generation trees and composition.
//!
//! Usage:
//!   medley init <NAME>           Create a new generation tree
//!   medley generate [OPTIONS]    Run a template and persist the node
//!   medley upload [OPTIONS]      Register a local file as an upload node
//!   medley show <TREE_ID>        Print the full tree snapshot as JSON
//!   medley delete <NODE_ID>      Delete a node and all its descendants
//!   medley export <SEGMENTS>     Compose a timeline into a single video
//!   medley check                 Check toolchain and engine reachability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use medley_common::EngineConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "medley",
    about = "Node-based generative media authoring",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new generation tree with a placeholder root node
    Init {
        /// Tree name
        name: String,

        /// Template id recorded on the placeholder root node
        #[arg(long, default_value = "TextGenerateImage")]
        root_template: String,
    },

    /// Run a template through the render engine and persist the result
    Generate {
        /// Tree the node belongs to
        tree_id: i64,

        /// Template id to run
        template: String,

        /// Node title
        #[arg(short, long)]
        title: Option<String>,

        /// Re-run an existing node in place
        #[arg(long)]
        node_id: Option<String>,

        /// Parent node id (repeatable, order matters)
        #[arg(short, long = "parent")]
        parents: Vec<String>,

        /// Template parameter as key=value (value parsed as JSON when possible)
        #[arg(long = "param")]
        params: Vec<String>,

        /// Run this many independent cycles with mutated seeds
        #[arg(long)]
        batch: Option<u32>,
    },

    /// Register a local media file as an upload node
    Upload {
        /// Tree the node belongs to
        tree_id: i64,

        /// File to stage into the engine input area
        file: PathBuf,

        /// Node title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Parent node id (repeatable)
        #[arg(short, long = "parent")]
        parents: Vec<String>,
    },

    /// Print the full tree snapshot as JSON
    Show {
        /// Tree id
        tree_id: i64,
    },

    /// Delete a node and every node reachable through child edges
    Delete {
        /// Node id
        node_id: String,
    },

    /// Compose a segments file into a single video
    Export {
        /// Path to a JSON composition job (primary/audio segments)
        segments: PathBuf,

        /// Override the output file path from the segments file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check toolchain and render engine reachability
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = EngineConfig::load();
    if cli.verbose {
        cfg.logging.level = "debug".to_string();
    }
    medley_common::logging::init_logging(&cfg.logging);

    match cli.command {
        Commands::Init {
            name,
            root_template,
        } => commands::init::run(&cfg, name, root_template),
        Commands::Generate {
            tree_id,
            template,
            title,
            node_id,
            parents,
            params,
            batch,
        } => commands::generate::run(&cfg, tree_id, template, title, node_id, parents, params, batch),
        Commands::Upload {
            tree_id,
            file,
            title,
            parents,
        } => commands::upload::run(&cfg, tree_id, file, title, parents),
        Commands::Show { tree_id } => commands::show::run(&cfg, tree_id),
        Commands::Delete { node_id } => commands::delete::run(&cfg, node_id),
        Commands::Export { segments, output } => commands::export::run(&cfg, segments, output),
        Commands::Check => commands::check::run(&cfg),
    }
}
