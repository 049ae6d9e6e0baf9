mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{catalog::CatalogSubcommand, memory::MemorySubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stitch",
    about = "Manifest-driven repository composer — validate manifests, materialize systems, run the control plane",
    version,
    propagate_version = true
)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose an output repository from a manifest
    Compose {
        /// Path to the system manifest JSON
        #[arg(long)]
        manifest: PathBuf,

        /// Output directory
        #[arg(long, default_value = "composed")]
        output: PathBuf,

        /// Validate and show the plan without writing files
        #[arg(long)]
        dry_run: bool,

        /// Template library root
        #[arg(long, env = "TEMPLATE_ROOT")]
        template_root: Option<PathBuf>,

        /// Replace an existing output tree
        #[arg(long)]
        overwrite: bool,

        /// Composition wall-clock ceiling in seconds
        #[arg(long, env = "MAX_COMPOSE_SECONDS", default_value_t = 120)]
        max_seconds: u64,
    },

    /// Inspect the template library
    Catalog {
        /// Template library root
        #[arg(long, env = "TEMPLATE_ROOT")]
        template_root: Option<PathBuf>,

        #[command(subcommand)]
        subcommand: CatalogSubcommand,
    },

    /// Read and write the shared memory store
    Memory {
        /// State directory holding the four memory files
        #[arg(long, env = "STATE_DIR", default_value = stitch_core::paths::DEFAULT_STATE_DIR)]
        state_dir: PathBuf,

        #[command(subcommand)]
        subcommand: MemorySubcommand,
    },

    /// Run the control plane API
    Serve {
        /// Port to listen on (0 = OS-assigned)
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Template library root
        #[arg(long, env = "TEMPLATE_ROOT")]
        template_root: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Compose {
            manifest,
            output,
            dry_run,
            template_root,
            overwrite,
            max_seconds,
        } => {
            let args = cmd::compose::ComposeArgs {
                manifest,
                output,
                template_root: cmd::compose::resolve_template_root(template_root.as_deref()),
                dry_run,
                overwrite,
                max_seconds,
            };
            if let Err(e) = cmd::compose::run(args, cli.json) {
                eprintln!("error: {e}");
                eprintln!("  next: {}", e.suggestion());
                std::process::exit(e.exit_code());
            }
        }

        Commands::Catalog {
            template_root,
            subcommand,
        } => {
            let root = cmd::compose::resolve_template_root(template_root.as_deref());
            exit_on_error(cmd::catalog::run(&root, subcommand, cli.json));
        }

        Commands::Memory {
            state_dir,
            subcommand,
        } => {
            exit_on_error(cmd::memory::run(state_dir, subcommand, cli.json));
        }

        Commands::Serve {
            port,
            template_root,
        } => {
            exit_on_error(cmd::serve::run(template_root.as_deref(), port));
        }
    }
}

fn exit_on_error(result: anyhow::Result<()>) {
    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
