use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "phasekeep")]
#[command(version, about = "Work-item orchestrator with phased pipelines")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .phasekeep store in a project
    Init,
    /// Create a new work item
    Add {
        title: String,
        /// ID of an item this one depends on (repeatable)
        #[arg(long = "dep")]
        deps: Vec<String>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Pipeline to run the item through (defaults to the configured one)
        #[arg(long)]
        pipeline: Option<String>,
        /// Short description of the work
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = "0")]
        priority: i64,
    },
    /// List active items and their state
    Status,
    /// Show what the scheduler would do next
    Next {
        /// Item currently executing its phase (repeatable)
        #[arg(long = "running")]
        running: Vec<String>,
        /// Override the configured WIP limit
        #[arg(long)]
        max_wip: Option<usize>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a new item into scoping or a ready item into its first phase
    Promote { id: String },
    /// Record that the item's current phase has started
    Start {
        id: String,
        /// Revision the phase starts from (defaults to HEAD)
        #[arg(long)]
        revision: Option<String>,
    },
    /// Report the result of a phase
    Complete {
        id: String,
        phase: String,
        /// File produced by the phase, staged with the result (repeatable)
        #[arg(long = "artifact")]
        artifacts: Vec<PathBuf>,
        /// The phase needs an answer before it can continue
        #[arg(long, conflicts_with = "failed")]
        blocked: Option<String>,
        /// Kind of block: clarification or decision
        #[arg(long, default_value = "clarification", requires = "blocked")]
        block_type: String,
        /// The phase failed
        #[arg(long)]
        failed: Option<String>,
        /// Whether the phase ran exclusively (defaults to the pipeline setting)
        #[arg(long)]
        exclusive: Option<bool>,
    },
    /// Commit all batched changes
    Flush,
    /// Move a done item to the archive
    Archive { id: String },
    /// Block an item with a reason
    Block {
        id: String,
        reason: String,
        /// Kind of block: clarification or decision
        #[arg(long = "type")]
        block_type: Option<String>,
    },
    /// Restore a blocked item to the status it was blocked from
    Unblock {
        id: String,
        /// Answer to the question that blocked the item
        #[arg(long)]
        context: Option<String>,
    },
    /// Fold one item into another
    Merge { source: String, target: String },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default phasekeep.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    phasekeep::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Add {
            title,
            deps,
            tags,
            pipeline,
            description,
            priority,
        } => {
            let args = cmd::AddArgs {
                title: title.clone(),
                deps: deps.clone(),
                tags: tags.clone(),
                pipeline: pipeline.clone(),
                description: description.clone(),
                priority: *priority,
            };
            cmd::cmd_add(&cli, &project_dir, args).await?
        }
        Commands::Status => cmd::cmd_status(&cli, &project_dir).await?,
        Commands::Next {
            running,
            max_wip,
            json,
        } => cmd::cmd_next(&cli, &project_dir, running, *max_wip, *json).await?,
        Commands::Promote { id } => cmd::cmd_promote(&cli, &project_dir, id).await?,
        Commands::Start { id, revision } => {
            cmd::cmd_start(&cli, &project_dir, id, revision.clone()).await?
        }
        Commands::Complete {
            id,
            phase,
            artifacts,
            blocked,
            block_type,
            failed,
            exclusive,
        } => {
            let outcome = cmd::phase_outcome(blocked.as_deref(), block_type, failed.as_deref())?;
            cmd::cmd_complete(
                &cli,
                &project_dir,
                id,
                phase,
                outcome,
                artifacts.clone(),
                *exclusive,
            )
            .await?
        }
        Commands::Flush => cmd::cmd_flush(&cli, &project_dir).await?,
        Commands::Archive { id } => cmd::cmd_archive(&cli, &project_dir, id).await?,
        Commands::Block {
            id,
            reason,
            block_type,
        } => cmd::cmd_block(&cli, &project_dir, id, reason, block_type.as_deref()).await?,
        Commands::Unblock { id, context } => {
            cmd::cmd_unblock(&cli, &project_dir, id, context.clone()).await?
        }
        Commands::Merge { source, target } => {
            cmd::cmd_merge(&cli, &project_dir, source, target).await?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
