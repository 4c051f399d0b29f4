use std::sync::Arc;
use std::time::Duration;

use tk_core::config::TickConfig;
use tk_core::types::TickType;
use tk_engine::predictor::{predict_and_link, DEFAULT_PREDICT_TIMEOUT};
use tk_engine::{RunEngine, RunOptions, ShellVerifier, Signal, Verifier};

use crate::agent::ShellAgent;

use super::open_store;

pub struct RunArgs {
    pub epic: String,
    pub max_iterations: u32,
    pub max_cost: Option<f64>,
    pub checkpoint_interval: u32,
    pub max_retries: u32,
    pub agent_timeout: u64,
    pub skip_verify: bool,
    pub worktree: bool,
    pub watch: bool,
    pub watch_poll: u64,
    pub predict: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let store = open_store()?;
    let config = TickConfig::load(store.repo_root())?;
    let agent = Arc::new(ShellAgent::from_env());

    if args.predict {
        let epic = store.read(&args.epic)?;
        if epic.tick_type == TickType::Epic {
            let universe = store.list().await?;
            let tasks: Vec<_> = universe
                .iter()
                .filter(|t| t.parent.as_deref() == Some(args.epic.as_str()) && !t.is_closed())
                .cloned()
                .collect();
            let conflicts =
                predict_and_link(&store, agent.as_ref(), &epic, &tasks, DEFAULT_PREDICT_TIMEOUT)
                    .await?;
            for c in &conflicts {
                println!(
                    "predicted conflict on {}: {} now blocks {}",
                    c.files.join(", "),
                    c.earlier,
                    c.later
                );
            }
        }
    }

    let mut engine = RunEngine::new(store, agent);
    if let Some(verification) = &config.verification {
        let verifier: Arc<dyn Verifier> = Arc::new(ShellVerifier::from_config(verification));
        engine = engine.with_verifier(verifier);
    }

    // Stream agent output to the terminal as it arrives.
    let (tx, rx) = flume::unbounded::<String>();
    engine = engine.with_output_sink(tx);
    let printer = tokio::spawn(async move {
        while let Ok(chunk) = rx.recv_async().await {
            println!("{chunk}");
        }
    });

    // SIGINT fires the engine's token; the in-flight iteration drains.
    let token = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; finishing the current iteration");
            token.cancel();
        }
    });

    let mut opts = RunOptions::new(&args.epic);
    opts.max_iterations = args.max_iterations;
    opts.max_cost = args.max_cost;
    opts.checkpoint_interval = args.checkpoint_interval;
    opts.max_task_retries = args.max_retries;
    opts.agent_timeout = Duration::from_secs(args.agent_timeout);
    opts.skip_verify = args.skip_verify;
    opts.use_worktree = args.worktree;
    opts.watch = args.watch;
    opts.watch_poll_interval = Duration::from_secs(args.watch_poll);

    let outcome = engine.run(opts).await?;
    printer.abort();

    println!();
    println!(
        "run finished: {} ({} iterations, {} tasks done, {} tokens, ${:.4}, {:.1}s)",
        outcome.exit_reason,
        outcome.iterations,
        outcome.completed_tasks.len(),
        outcome.total_tokens,
        outcome.total_cost,
        outcome.duration.as_secs_f64()
    );
    if !outcome.completed_tasks.is_empty() {
        println!("completed: {}", outcome.completed_tasks.join(", "));
    }

    Ok(match outcome.signal {
        Signal::Completed | Signal::NoReadyTask | Signal::None | Signal::Cancelled => 0,
        Signal::Budget | Signal::Timeout | Signal::MaxRetries => 6,
    })
}
