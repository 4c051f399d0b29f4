mod agent;
mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::exit_code_for;

/// ticks -- a local-first, Git-native issue tracker with an agent run
/// engine. Issues live under .tick/ as one JSON file each, so branching
/// and merging reuse normal Git workflows.
#[derive(Parser)]
#[command(name = "ticks", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize .tick/ in this repository and wire the merge driver.
    Init {
        /// Short id length for new ticks (3 or 4).
        #[arg(long, default_value_t = 3)]
        id_length: u8,
    },

    /// Create a new tick.
    Create {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Tick type (bug, feature, task, epic, chore).
        #[arg(short = 't', long = "type", default_value = "task")]
        tick_type: String,
        /// Priority 0-4 (0 highest).
        #[arg(short, long, default_value_t = 2)]
        priority: u8,
        /// Parent epic id.
        #[arg(long)]
        parent: Option<String>,
        /// Close gate (approval, review, content).
        #[arg(long)]
        requires: Option<String>,
        #[arg(long = "label")]
        labels: Vec<String>,
        #[arg(long = "blocked-by")]
        blocked_by: Vec<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show one tick.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },

    /// Update fields on a tick.
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<u8>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        status: Option<String>,
        /// RFC 3339 timestamp; the tick is deferred until then.
        #[arg(long)]
        defer_until: Option<String>,
        #[arg(long)]
        requires: Option<String>,
    },

    /// Close a tick (routed through its gate unless --force).
    Close {
        id: String,
        reason: Option<String>,
        #[arg(long)]
        force: bool,
    },

    /// Reopen a closed tick.
    Reopen { id: String },

    /// Add a blocker: ID becomes blocked by BLOCKER.
    Block { id: String, blocker: String },

    /// Remove a blocker.
    Unblock { id: String, blocker: String },

    /// Append a note (opens $EDITOR when no text is given).
    Note { id: String, text: Option<String> },

    /// Print a tick's notes.
    Notes { id: String },

    /// List ticks.
    List {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        priority: Option<u8>,
        #[arg(short = 't', long = "type")]
        tick_type: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        parent: Option<String>,
        /// Awaiting filter: a kind, a comma list, "any", or "" for
        /// not-awaiting.
        #[arg(long)]
        awaiting: Option<String>,
        /// Include closed ticks.
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },

    /// List blocked ticks with their open blockers.
    Blocked {
        #[arg(long)]
        json: bool,
    },

    /// Show the next agent-ready tick.
    Next {
        #[arg(long)]
        json: bool,
    },

    /// Counts by status, type, and priority.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Dependency graph and wave schedule for an epic (or everything).
    Graph {
        epic: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Approve a tick that is awaiting a verdict.
    Approve { id: String },

    /// Reject a tick that is awaiting a verdict.
    Reject {
        id: String,
        /// Feedback recorded as a human note before the verdict lands.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List checkpoints recorded for an epic.
    Checkpoints {
        epic: String,
        #[arg(long)]
        json: bool,
    },

    /// Drive the agent over an epic's tasks.
    Run {
        epic: String,
        #[arg(long, default_value_t = 50)]
        max_iterations: u32,
        #[arg(long)]
        max_cost: Option<f64>,
        #[arg(long, default_value_t = 5)]
        checkpoint_interval: u32,
        #[arg(long, default_value_t = 2)]
        max_retries: u32,
        /// Per-invocation agent timeout in seconds.
        #[arg(long, default_value_t = 1200)]
        agent_timeout: u64,
        #[arg(long)]
        skip_verify: bool,
        /// Run inside an isolated git worktree and merge back on success.
        #[arg(long)]
        worktree: bool,
        /// Keep polling for newly-ready tasks instead of exiting.
        #[arg(long)]
        watch: bool,
        #[arg(long, default_value_t = 30)]
        watch_poll: u64,
        /// Predict file conflicts first and insert blockers.
        #[arg(long)]
        predict: bool,
    },

    /// Prune old run records and logs.
    Gc {
        /// Remove records finalized more than this many days ago.
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Three-way merge driver entry point, invoked by Git.
    #[command(name = "merge-file", hide = true)]
    MergeFile {
        base: String,
        ours: String,
        theirs: String,
        path: String,
    },

    /// Print the detected identity and project.
    Whoami,

    /// Synchronize with the remote service until interrupted.
    Sync,

    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Init { id_length } => commands::init::run(id_length).await,
        Commands::Create {
            title,
            description,
            tick_type,
            priority,
            parent,
            requires,
            labels,
            blocked_by,
            json,
        } => {
            commands::tick::create(
                title,
                description,
                tick_type,
                priority,
                parent,
                requires,
                labels,
                blocked_by,
                json,
            )
            .await
        }
        Commands::Show { id, json } => commands::tick::show(&id, json),
        Commands::Update {
            id,
            title,
            description,
            priority,
            owner,
            status,
            defer_until,
            requires,
        } => commands::tick::update(
            &id,
            title,
            description,
            priority,
            owner,
            status,
            defer_until,
            requires,
        ),
        Commands::Close { id, reason, force } => {
            commands::tick::close(&id, reason.as_deref(), force).await
        }
        Commands::Reopen { id } => commands::tick::reopen(&id),
        Commands::Block { id, blocker } => commands::tick::block(&id, &blocker, true),
        Commands::Unblock { id, blocker } => commands::tick::block(&id, &blocker, false),
        Commands::Note { id, text } => commands::tick::note(&id, text),
        Commands::Notes { id } => commands::tick::notes(&id),
        Commands::List {
            owner,
            status,
            priority,
            tick_type,
            label,
            parent,
            awaiting,
            all,
            json,
        } => {
            commands::list::list(
                owner, status, priority, tick_type, label, parent, awaiting, all, json,
            )
            .await
        }
        Commands::Blocked { json } => commands::list::blocked(json).await,
        Commands::Next { json } => commands::list::next(json).await,
        Commands::Stats { json } => commands::list::stats(json).await,
        Commands::Graph { epic, json } => commands::list::graph(epic.as_deref(), json).await,
        Commands::Approve { id } => commands::review::approve(&id),
        Commands::Reject { id, message } => commands::review::reject(&id, message.as_deref()),
        Commands::Checkpoints { epic, json } => commands::review::checkpoints(&epic, json),
        Commands::Run {
            epic,
            max_iterations,
            max_cost,
            checkpoint_interval,
            max_retries,
            agent_timeout,
            skip_verify,
            worktree,
            watch,
            watch_poll,
            predict,
        } => {
            commands::run::run(commands::run::RunArgs {
                epic,
                max_iterations,
                max_cost,
                checkpoint_interval,
                max_retries,
                agent_timeout,
                skip_verify,
                worktree,
                watch,
                watch_poll,
                predict,
            })
            .await
        }
        Commands::Gc { days } => commands::gc::run(days),
        Commands::MergeFile {
            base,
            ours,
            theirs,
            path,
        } => commands::merge_file::run(&base, &ours, &theirs, &path),
        Commands::Whoami => commands::init::whoami(),
        Commands::Sync => commands::sync::run().await,
        Commands::Version => {
            println!("ticks {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}
