mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cli::{Cli, Command, RunArgs};
use task_scheduler::{LibSqlBackend, NewTask, SchedulerConfig, SchedulerLoop, StopSignal, TaskStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let result = match Cli::parse().into_command() {
        Command::Run(args) => run(args).await,
        Command::Submit {
            db,
            command,
            priority,
        } => submit(&db, command, priority).await,
        Command::Status { db, id } => status(&db, id).await,
        Command::Cancel { db, id } => cancel(&db, id).await,
        Command::List { db, limit } => list(&db, limit).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn open_store(db: &Path) -> anyhow::Result<Arc<LibSqlBackend>> {
    let store = LibSqlBackend::new_local(db)
        .await
        .with_context(|| format!("Failed to open database at {}", db.display()))?;
    Ok(Arc::new(store))
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = SchedulerConfig::from_env();
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    // Store-open failure is fatal before any scheduling begins.
    let store = open_store(&config.db_path).await?;

    let scheduler = SchedulerLoop::new(store, &config);
    tracing::info!(
        workers = scheduler.workers(),
        db = %config.db_path.display(),
        "Starting scheduler"
    );

    let stop = StopSignal::new();
    let on_signal = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received, stopping scheduler");
        on_signal.stop();
    });

    scheduler.run(stop).await;
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

async fn submit(db: &Path, command: String, priority: i64) -> anyhow::Result<()> {
    let store = open_store(db).await?;
    let task_id = store
        .insert_task(&NewTask::new(command).with_priority(priority))
        .await?;
    println!(
        "{}",
        serde_json::json!({ "task_id": task_id, "status": "pending" })
    );
    Ok(())
}

async fn status(db: &Path, id: i64) -> anyhow::Result<()> {
    let store = open_store(db).await?;
    let task = store
        .get_task(id)
        .await?
        .with_context(|| format!("Task {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

async fn cancel(db: &Path, id: i64) -> anyhow::Result<()> {
    let store = open_store(db).await?;

    if store.request_cancel(id).await? {
        println!(
            "{}",
            serde_json::json!({ "task_id": id, "cancel_requested": true })
        );
        return Ok(());
    }

    // Either unknown, or already past `pending`.
    let task = store
        .get_task(id)
        .await?
        .with_context(|| format!("Task {id} not found"))?;
    println!(
        "{}",
        serde_json::json!({ "task_id": id, "cancel_requested": false, "status": task.status })
    );
    Ok(())
}

async fn list(db: &Path, limit: usize) -> anyhow::Result<()> {
    let store = open_store(db).await?;
    let tasks = store.list_tasks(limit).await?;
    println!("{}", serde_json::to_string_pretty(&tasks)?);
    Ok(())
}
