use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Owns the job queue and the thread draining it. Closing the queue stops the
/// thread once queued jobs have run.
struct Worker {
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn submit(&self, job: Job) -> Result<()> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = jobs
            .as_ref()
            .ok_or_else(|| anyhow!("database worker already stopped"))?;
        sender
            .send(job)
            .map_err(|_| anyhow!("database worker is not accepting jobs"))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Dropping the sender ends the worker's receive loop.
        drop(self.jobs.lock().unwrap_or_else(PoisonError::into_inner).take());

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(join_err) = handle.join() {
                error!("Database worker panicked: {join_err:?}");
            }
        }
    }
}

/// Handle to the key/value database. All SQLite work runs on one dedicated
/// thread, so async callers never block the runtime and every closure passed to
/// [`Database::execute`] runs serialized with respect to the others.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    db_path: Arc<Option<PathBuf>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let target = db_path.clone();
        let database = Self::start(move || Connection::open(&target), Some(db_path))?;
        if let Some(path) = database.path() {
            info!("Database initialized at {}", path.display());
        }
        Ok(database)
    }

    /// Private in-memory database; used by tests and ephemeral deployments.
    pub fn in_memory() -> Result<Self> {
        Self::start(Connection::open_in_memory, None)
    }

    fn start<F>(open: F, db_path: Option<PathBuf>) -> Result<Self>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("lefocus-db".into())
            .spawn(move || match prepare(open) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        drain(conn, jobs_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited during startup")??;

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Mutex::new(Some(jobs_tx)),
                thread: Mutex::new(Some(thread)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    /// Closes the job queue; every later call fails as if the worker had died.
    #[cfg(test)]
    pub(crate) fn stop(&self) {
        drop(self.worker.jobs.lock().unwrap_or_else(PoisonError::into_inner).take());
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Runs `task` on the database thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.worker.submit(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                debug!("Database caller went away before the result was ready");
            }
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the job"))?
    }
}

/// Opens the connection, switches to WAL and brings the schema up to date.
fn prepare<F>(open: F) -> Result<Connection>
where
    F: FnOnce() -> rusqlite::Result<Connection>,
{
    let mut conn = open().context("failed to open SQLite database")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("Could not enable WAL journal mode: {err}");
    }
    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn drain(mut conn: Connection, jobs: mpsc::Receiver<Job>) {
    for job in jobs {
        job(&mut conn);
    }
    debug!("Database worker stopped");
}
