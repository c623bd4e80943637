use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kickoff::client::TaskClient;
use kickoff::config::{
    parse_resource_tags, ServerAddress, ServerConfig, WorkerConfig, DEFAULT_PORT,
};
use kickoff::db::{TaskCreateInfo, TaskId, TaskSchedule, TaskState, TaskStatus};
use kickoff::error::{KickoffError, Result};
use kickoff::server::TaskServer;
use kickoff::shutdown::{install_interrupt_handler, install_shutdown_handler};
use kickoff::worker::TaskWorker;

#[derive(Parser, Debug)]
#[command(name = "kickoff")]
#[command(about = "A minimalistic task scheduler for heterogeneous compute clusters")]
struct Cli {
    /// Task server address as HOST[:PORT]
    #[arg(long, global = true, default_value = "127.0.0.1")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a task from a command line and print its hex ID
    New {
        /// Resource tags a worker must have to be eligible (separated by
        /// space, comma, or semicolon)
        #[arg(long, default_value = "")]
        require: String,

        /// Resource tags that raise a worker's match score without gating
        /// eligibility
        #[arg(long, default_value = "")]
        want: String,

        /// Command line the worker will execute via the host shell
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Mark a task for cancellation
    Cancel {
        /// Hexadecimal task ID
        id: String,
    },

    /// Block until each task has left the database
    Wait {
        /// Hexadecimal task IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Print a task's state and schedule
    Info {
        /// Hexadecimal task ID
        id: String,
    },

    /// List all pending, running, and canceling tasks. A debugging tool for
    /// small deployments; refuses once the server tracks too many tasks
    List,

    /// Print the server's task counters
    Stats,

    /// Run the worker loop, executing matching tasks until interrupted
    Worker {
        /// Resource tags this worker offers (separated by space, comma, or
        /// semicolon)
        #[arg(long, default_value = "")]
        have: String,
    },

    /// Run the task server
    Server {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(-1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let addr = ServerAddress::parse(&cli.server, DEFAULT_PORT)?;

    match cli.command {
        Command::New {
            require,
            want,
            command,
        } => {
            let info = TaskCreateInfo {
                command: command.join(" "),
                schedule: TaskSchedule {
                    required_resources: parse_resource_tags(&require),
                    optional_resources: parse_resource_tags(&want),
                },
            };
            let id = TaskClient::new(addr).create_task(&info).await?;
            println!("{id}");
        }

        Command::Cancel { id } => {
            let id = parse_task_id(&id)?;
            if !TaskClient::new(addr).mark_task_should_cancel(id).await? {
                return Err(KickoffError::TaskNotFound);
            }
            println!("canceled task {id}");
        }

        Command::Wait { ids } => {
            let ids = ids
                .iter()
                .map(|id| parse_task_id(id))
                .collect::<Result<Vec<_>>>()?;
            let client = TaskClient::new(addr);
            for id in ids {
                wait_for_task(&client, id).await?;
                println!("task {id} has finished");
            }
        }

        Command::Info { id } => {
            let id = parse_task_id(&id)?;
            let client = TaskClient::new(addr);
            let status = client
                .get_task_status(id)
                .await?
                .ok_or(KickoffError::TaskNotFound)?;
            let schedule = client
                .get_task_schedule(id)
                .await?
                .ok_or(KickoffError::TaskNotFound)?;
            println!("{id}: {}", describe_status(&status));
            println!("{schedule}");
        }

        Command::List => {
            let states = [TaskState::Pending, TaskState::Running, TaskState::Canceling];
            let tasks = TaskClient::new(addr)
                .get_tasks_by_states(&states)
                .await?
                .ok_or(KickoffError::TooManyTasks)?;
            if tasks.is_empty() {
                println!("no tasks");
            }
            for task in tasks {
                println!("{}: {}", task.id, describe_status(&task.status));
            }
        }

        Command::Stats => {
            let stats = TaskClient::new(addr).get_stats().await?;
            println!("{} tasks pending", stats.num_pending);
            println!("{} tasks running", stats.num_running);
            println!("{} tasks canceling", stats.num_canceling);
            println!("{} tasks finished", stats.num_finished);
        }

        Command::Worker { have } => {
            let shutdown = install_interrupt_handler();
            let worker = TaskWorker::new(
                TaskClient::new(addr),
                parse_resource_tags(&have),
                WorkerConfig::default(),
                shutdown,
            );
            worker.run().await;
            println!("worker was gracefully shut down");
        }

        Command::Server { port } => {
            let shutdown = install_shutdown_handler();
            let config = ServerConfig {
                port,
                ..ServerConfig::default()
            };
            let server = TaskServer::bind(config, shutdown).await?;
            server.run().await;
            println!("server was gracefully shut down");
        }
    }

    Ok(())
}

fn parse_task_id(hex: &str) -> Result<TaskId> {
    TaskId::from_hex(hex).ok_or_else(|| KickoffError::InvalidTaskId(hex.to_string()))
}

/// Poll until the task is no longer in the database, backing off slowly.
async fn wait_for_task(client: &TaskClient, id: TaskId) -> Result<()> {
    let mut poll_interval = Duration::from_millis(500);
    while client.get_task_status(id).await?.is_some() {
        tokio::time::sleep(poll_interval).await;
        poll_interval = (poll_interval * 5 / 4).min(Duration::from_secs(5));
    }
    Ok(())
}

/// Render ages like `1d2h3m4s`, always ending in seconds.
fn format_interval(total_seconds: i64) -> String {
    let mut remaining = total_seconds.max(0);
    let seconds = remaining % 60;
    remaining /= 60;
    let minutes = remaining % 60;
    remaining /= 60;
    let hours = remaining % 24;
    let days = remaining / 24;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{seconds}s"));
    out
}

fn describe_status(status: &TaskStatus) -> String {
    let now = chrono::Utc::now().timestamp();
    match status.run_status {
        None => format!(
            "pending (so far waited {})",
            format_interval(now - status.create_time)
        ),
        Some(run_status) => {
            let state = if run_status.was_canceled {
                "canceling"
            } else {
                "running"
            };
            format!(
                "{state} (runtime {}; last heartbeat {} ago)",
                format_interval(now - run_status.start_time),
                format_interval(now - run_status.heartbeat_time)
            )
        }
    }
}
