//! awaitkit CLI - drive sequential workflows over asynchronous tasks.

use anyhow::{Context, Result};
use awaitkit_core::{AsyncError, ErasedTask, Task};
use awaitkit_execution::{Dispatcher, DispatcherConfig};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "awaitkit")]
#[command(about = "Run callback-driven work as sequential workflows", long_about = None)]
struct Cli {
    /// Dispatcher configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log operation lifecycle events
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add 1, 2, 3 and 4 to a number, one delayed task at a time
    Chain {
        /// Starting number
        #[arg(long, default_value = "10")]
        start: i64,
        /// Delay of each task in milliseconds
        #[arg(long, default_value = "100")]
        delay_ms: u64,
    },
    /// Await several delayed tasks at once
    Batch {
        /// Per-task delays in milliseconds
        #[arg(long, value_delimiter = ',', default_value = "400,100,250")]
        delays: Vec<u64>,
    },
    /// Hop from a workflow onto the main context
    Main,
}

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum Report {
    Chain {
        operation: String,
        value: i64,
        invocations: usize,
    },
    Batch {
        operation: String,
        /// Task index and delay, in input order
        results: Vec<(usize, u64)>,
        /// Task indices in the order they finished
        completion_order: Vec<usize>,
    },
    Main {
        operation: String,
        hopped: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => DispatcherConfig::default(),
    };
    let dispatcher = Dispatcher::new(config)?;
    let handle = Handle::current();

    let report = match cli.command {
        Commands::Chain { start, delay_ms } => chain(&dispatcher, handle, start, delay_ms).await?,
        Commands::Batch { delays } => batch(&dispatcher, handle, delays).await?,
        Commands::Main => main_hop(&dispatcher).await?,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<DispatcherConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

fn add_task(
    handle: &Handle,
    calls: &Arc<AtomicUsize>,
    number: i64,
    step: i64,
    delay_ms: u64,
) -> Task<i64, AsyncError> {
    let calls = Arc::clone(calls);
    Task::spawn(handle, async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(number + step)
    })
}

async fn chain(dispatcher: &Dispatcher, handle: Handle, start: i64, delay_ms: u64) -> Result<Report> {
    let invocations = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel();

    let calls = Arc::clone(&invocations);
    let operation = dispatcher.launch(move |operation| {
        let mut number = start;
        for step in 1..=4 {
            let task = add_task(&handle, &calls, number, step, delay_ms);
            match operation.await_task(&task) {
                Some(Ok(next)) => {
                    info!(step, value = *next, "step resolved");
                    number = *next;
                }
                Some(Err(err)) => {
                    let _ = tx.send(Err(AsyncError::clone(&err)));
                    return;
                }
                None => {
                    let _ = tx.send(Err(AsyncError::Unresolved(task.id())));
                    return;
                }
            }
        }
        let _ = tx.send(Ok(number));
    })?;

    let value = rx.await.context("Workflow ended without reporting")??;
    Ok(Report::Chain {
        operation: operation.name().to_string(),
        value,
        invocations: invocations.load(Ordering::SeqCst),
    })
}

async fn batch(dispatcher: &Dispatcher, handle: Handle, delays: Vec<u64>) -> Result<Report> {
    let finished = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = oneshot::channel();

    let order = Arc::clone(&finished);
    let operation = dispatcher.launch(move |operation| {
        let tasks: Vec<Task<(usize, u64), AsyncError>> = delays
            .iter()
            .enumerate()
            .map(|(index, &delay_ms)| {
                let order = Arc::clone(&order);
                Task::spawn(&handle, async move {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    order.lock().push(index);
                    Ok((index, delay_ms))
                })
            })
            .collect();

        let erased: Vec<&dyn ErasedTask> = tasks.iter().map(|task| task as &dyn ErasedTask).collect();
        let results: Result<Vec<(usize, u64)>, AsyncError> = operation
            .await_all(&erased)
            .into_iter()
            .zip(&tasks)
            .map(|(entry, task)| {
                entry
                    .ok()
                    .and_then(|payload| payload.downcast::<(usize, u64)>().ok())
                    .ok_or(AsyncError::Unresolved(task.id()))
            })
            .collect();
        let _ = tx.send(results);
    })?;

    let results = rx.await.context("Workflow ended without reporting")??;
    let completion_order = finished.lock().clone();
    Ok(Report::Batch {
        operation: operation.name().to_string(),
        results,
        completion_order,
    })
}

async fn main_hop(dispatcher: &Dispatcher) -> Result<Report> {
    let (tx, rx) = oneshot::channel();

    let operation = dispatcher.launch(move |operation| {
        let hopped = operation.main(|| {
            let thread = std::thread::current();
            info!(thread = thread.name().unwrap_or("unnamed"), "running on main context");
        });
        let _ = tx.send(hopped);
    })?;

    let hopped = rx.await.context("Workflow ended without reporting")?;
    Ok(Report::Main {
        operation: operation.name().to_string(),
        hopped,
    })
}

fn print_report(report: &Report) {
    match report {
        Report::Chain {
            operation,
            value,
            invocations,
        } => {
            println!("Operation: {}", operation);
            println!("  Final value: {}", value);
            println!("  Tasks run: {}", invocations);
        }
        Report::Batch {
            operation,
            results,
            completion_order,
        } => {
            println!("Operation: {}", operation);
            for (index, delay_ms) in results {
                println!("  task {} | {}ms", index, delay_ms);
            }
            println!("  Finished in order: {:?}", completion_order);
        }
        Report::Main { operation, hopped } => {
            println!("Operation: {}", operation);
            println!("  Main context hop: {}", if *hopped { "OK" } else { "FAILED" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_chain_counts_task_runs() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();
        let report = chain(&dispatcher, Handle::current(), 10, 5).await.unwrap();

        match report {
            Report::Chain {
                value, invocations, ..
            } => {
                assert_eq!(value, 20);
                assert_eq!(invocations, 4);
            }
            other => panic!("unexpected report {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_task_counts_one_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = add_task(&Handle::current(), &calls, 1, 1, 5);
        let (tx, rx) = oneshot::channel();
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).unwrap();

        dispatcher
            .launch(move |operation| {
                operation.await_task(&task);
                let again = operation.await_task(&task).and_then(Result::ok);
                let _ = tx.send(again.map(|value| *value));
            })
            .unwrap();

        assert_eq!(rx.await.unwrap(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
