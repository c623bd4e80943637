//! The task server: owns the database, listens on a TCP port, and serves
//! framed requests. All database mutations are serialized behind a single
//! write lock, so every request observes the effects of every earlier one.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blob::BlobWriter;
use crate::config::ServerConfig;
use crate::db::TaskDatabase;
use crate::error::{KickoffError, Result};
use crate::protocol::{
    put_option, put_seq, read_frame, write_frame, ReplyStatus, Request, TaskBriefInfo,
    TaskRunInfo, WireEncode,
};

/// Request-outcome counters, shared across connection handlers.
#[derive(Debug, Default)]
struct ServerStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    bad: AtomicU64,
}

impl ServerStats {
    fn record(&self, status_byte: u8) {
        match ReplyStatus::from_byte(status_byte) {
            Some(ReplyStatus::Ok) => self.succeeded.fetch_add(1, Ordering::Relaxed),
            Some(ReplyStatus::Failed) => self.failed.fetch_add(1, Ordering::Relaxed),
            _ => self.bad.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.succeeded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.bad.load(Ordering::Relaxed),
        )
    }
}

pub struct TaskServer {
    listener: TcpListener,
    db: Arc<RwLock<TaskDatabase>>,
    stats: Arc<ServerStats>,
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl TaskServer {
    /// Bind the listening socket. Split from [`run`](Self::run) so bind
    /// failures surface immediately and tests can bind port 0 and read the
    /// ephemeral address.
    pub async fn bind(config: ServerConfig, shutdown: CancellationToken) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|source| KickoffError::Bind {
                port: config.port,
                source,
            })?;
        Ok(Self {
            listener,
            db: Arc::new(RwLock::new(TaskDatabase::new())),
            stats: Arc::new(ServerStats::default()),
            config,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown token fires. The zombie reaper
    /// runs alongside on its own interval.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!(addr = %addr, "task server listening"),
            Err(_) => info!("task server listening"),
        }

        let reaper_db = self.db.clone();
        let reaper_stats = self.stats.clone();
        let reaper_config = self.config.clone();
        let reaper_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            reap_loop(reaper_db, reaper_stats, reaper_config, reaper_shutdown).await;
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("task server shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let db = self.db.clone();
                        let stats = self.stats.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, db, stats).await;
                        });
                    }
                    Err(err) => error!(error = %err, "accept error"),
                },
            }
        }
    }
}

/// Reap zombie tasks on a timer and log request totals when they move.
async fn reap_loop(
    db: Arc<RwLock<TaskDatabase>>,
    stats: Arc<ServerStats>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.cleanup_interval);
    let mut last_totals = (0, 0, 0);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let reaped = db
            .write()
            .await
            .cleanup_zombie_tasks(config.heartbeat_timeout_secs);
        if reaped > 0 {
            info!(reaped, "reaped zombie tasks with lapsed heartbeats");
        }

        let totals = stats.snapshot();
        if totals != last_totals {
            info!(
                succeeded = totals.0,
                failed = totals.1,
                bad = totals.2,
                "request totals"
            );
            last_totals = totals;
        }
    }
}

/// Serve one connection: read frame, dispatch, write frame, until EOF.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    db: Arc<RwLock<TaskDatabase>>,
    stats: Arc<ServerStats>,
) {
    debug!(peer = %peer, "client connected");
    loop {
        let payload = match read_frame(&mut stream).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(err) => {
                warn!(peer = %peer, error = %err, "read error; closing connection");
                break;
            }
        };

        let reply = dispatch(&db, &payload).await;
        if let Some(&status_byte) = reply.first() {
            stats.record(status_byte);
        }

        if let Err(err) = write_frame(&mut stream, &reply).await {
            warn!(peer = %peer, error = %err, "write error; closing connection");
            break;
        }
    }
    debug!(peer = %peer, "client disconnected");
}

fn bad_request() -> Vec<u8> {
    vec![ReplyStatus::BadRequest as u8]
}

fn failed() -> Vec<u8> {
    vec![ReplyStatus::Failed as u8]
}

async fn dispatch(db: &RwLock<TaskDatabase>, payload: &[u8]) -> Vec<u8> {
    let request = match Request::decode(payload) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "rejecting malformed request");
            return bad_request();
        }
    };

    let mut reply = BlobWriter::new();
    reply.put_u8(ReplyStatus::Ok as u8);
    let mut db = db.write().await;

    match request {
        Request::CreateTask(info) => {
            if info.command.trim().is_empty() {
                return failed();
            }
            let task = db.create_task(info);
            info!(task_id = %task.id(), "task created");
            task.id().encode(&mut reply);
        }
        Request::GetTaskStatus(id) => {
            put_option(&mut reply, &db.get_task(id).map(|task| *task.status()));
        }
        Request::GetTaskSchedule(id) => {
            put_option(&mut reply, &db.get_task(id).map(|task| task.schedule().clone()));
        }
        Request::MarkShouldCancel(id) => {
            let marked = db.mark_task_should_cancel(id);
            if marked {
                info!(task_id = %id, "task marked for cancellation");
            }
            reply.put_bool(marked);
        }
        Request::GetTasksByStates(states) => {
            let states: HashSet<_> = states.into_iter().collect();
            match db.tasks_by_states(&states) {
                Ok(tasks) => {
                    let briefs: Vec<TaskBriefInfo> = tasks
                        .iter()
                        .map(|task| TaskBriefInfo {
                            id: task.id(),
                            status: *task.status(),
                        })
                        .collect();
                    reply.put_bool(true);
                    put_seq(&mut reply, &briefs);
                }
                // The dedicated capacity-refusal signal: an absent list.
                Err(_) => reply.put_bool(false),
            }
        }
        Request::GetStats => {
            db.stats().encode(&mut reply);
        }
        Request::TakeTaskToRun { have_resources } => {
            let have: HashSet<String> = have_resources.into_iter().collect();
            let run_info = db.take_task_to_run(&have).map(|task| TaskRunInfo {
                id: task.id(),
                command: task.command().to_string(),
            });
            if let Some(run_info) = &run_info {
                info!(task_id = %run_info.id, "task dispatched to worker");
            }
            put_option(&mut reply, &run_info);
        }
        Request::Heartbeat(id) => match db.heartbeat_task(id) {
            Some(was_canceled) => reply.put_bool(was_canceled),
            None => return failed(),
        },
        Request::MarkFinished(id) => {
            if !db.mark_task_finished(id) {
                return failed();
            }
            info!(task_id = %id, "task finished");
        }
    }

    reply.into_bytes()
}
