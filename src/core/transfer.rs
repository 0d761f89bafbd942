use crate::models::error::SError;
use crate::models::transfer::{
    unix_millis, Transfer, TransferContext, TransferEvent, TransferEventKind, TransferState,
};
use crate::utils::file::FileUtils;
use camino::{Utf8Path, Utf8PathBuf};
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{LOCATION, RANGE};
use reqwest::{redirect, Client, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

const MAX_REDIRECTS: usize = 10;
const SAMPLE_WINDOW: Duration = Duration::from_millis(500);
const EVENT_CAPACITY: usize = 64;

struct Entry {
    transfer: Transfer,
    /// Bumped on every start/resume; a task only acts while it owns the
    /// current run.
    run: u64,
    stop: Option<watch::Sender<bool>>,
    /// Held by the running task for its whole lifetime so a resumed run
    /// never touches the file before the previous one let go of it.
    file_lock: Arc<tokio::sync::Mutex<()>>,
}

struct Inner {
    client: Client,
    runtime: Handle,
    table: Mutex<Vec<Entry>>,
    events: broadcast::Sender<TransferEvent>,
    snapshots: watch::Sender<Vec<Transfer>>,
}

/// What a run needs once it owns the file.
struct Job {
    url: String,
    save_path: Utf8PathBuf,
    offset: u64,
}

enum Outcome {
    Finished,
    Stopped,
}

/// Concurrent, resumable HTTP downloads.
///
/// Every transfer runs as its own task. Callers observe progress through
/// `list`/`get`, the snapshot channel, and the completion event channel.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<Inner>,
}

impl TransferEngine {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self, SError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("KamisamaLoader/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(client)
    }

    /// The client must not follow redirects itself.
    pub fn with_client(client: Client) -> Result<Self, SError> {
        let runtime = Handle::try_current()
            .map_err(|e| SError::Unexpected(Some(format!("no tokio runtime: {e}"))))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshots, _) = watch::channel(Vec::new());

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                runtime,
                table: Mutex::new(Vec::new()),
                events,
                snapshots,
            }),
        })
    }

    /// Registers a queued transfer and spawns its task. Returns at once.
    #[instrument(skip(self, context))]
    pub fn start(
        &self,
        url: &str,
        destination_folder: &Utf8Path,
        filename: &str,
        context: Option<TransferContext>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let transfer = Transfer::new(
            id.clone(),
            url.to_string(),
            filename.to_string(),
            destination_folder.join(filename),
            context,
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let file_lock = Arc::new(tokio::sync::Mutex::new(()));
        self.inner.table.lock().push(Entry {
            transfer,
            run: 1,
            stop: Some(stop_tx),
            file_lock: file_lock.clone(),
        });
        self.inner.publish();

        info!("Transfer {id} queued");
        self.spawn_run(id.clone(), 1, stop_rx, file_lock);
        id
    }

    /// Only acts on a progressing transfer.
    pub fn pause(&self, id: &str) -> bool {
        let paused = self.inner.mutate(id, |entry| {
            if entry.transfer.state != TransferState::Progressing {
                return false;
            }
            entry.transfer.state = TransferState::Paused;
            entry.transfer.speed = 0.0;
            if let Some(stop) = entry.stop.take() {
                let _ = stop.send(true);
            }
            true
        });

        if paused == Some(true) {
            info!("Transfer {id} paused");
        }
        paused.unwrap_or(false)
    }

    /// Restarts a paused or failed transfer from the bytes already on disk.
    pub fn resume(&self, id: &str) -> bool {
        let started = self.inner.mutate(id, |entry| {
            if !entry.transfer.state.can_resume() {
                return None;
            }
            entry.run += 1;
            entry.transfer.state = TransferState::Progressing;
            entry.transfer.error = None;
            entry.transfer.speed = 0.0;
            entry.transfer.started_at = unix_millis();

            let (stop_tx, stop_rx) = watch::channel(false);
            entry.stop = Some(stop_tx);
            Some((entry.run, stop_rx, entry.file_lock.clone()))
        });

        match started.flatten() {
            Some((run, stop_rx, file_lock)) => {
                info!("Transfer {id} resumed");
                self.spawn_run(id.to_string(), run, stop_rx, file_lock);
                true
            }
            None => false,
        }
    }

    /// Stops the transfer and deletes its partial file. Completed and
    /// already cancelled transfers are left alone.
    pub fn cancel(&self, id: &str) -> bool {
        let cancelled = self.inner.mutate(id, |entry| {
            if entry.transfer.state.is_terminal() {
                return None;
            }
            entry.transfer.state = TransferState::Cancelled;
            entry.transfer.speed = 0.0;

            match entry.stop.take() {
                // The running task removes the file once it has closed it.
                Some(stop) => {
                    let _ = stop.send(true);
                    Some(None)
                }
                None => Some(Some(entry.transfer.save_path.clone())),
            }
        });

        match cancelled.flatten() {
            Some(idle_file) => {
                if let Some(path) = idle_file {
                    remove_partial(&path);
                }
                info!("Transfer {id} cancelled");
                true
            }
            None => false,
        }
    }

    /// Drops completed, cancelled and failed records.
    pub fn clear_finished(&self) {
        self.inner
            .table
            .lock()
            .retain(|e| !e.transfer.state.is_finished());
        self.inner.publish();
    }

    pub fn list(&self) -> Vec<Transfer> {
        self.inner.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Transfer> {
        self.inner
            .table
            .lock()
            .iter()
            .find(|e| e.transfer.id == id)
            .map(|e| e.transfer.clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Vec<Transfer>> {
        self.inner.snapshots.subscribe()
    }

    fn spawn_run(
        &self,
        id: String,
        run: u64,
        stop: watch::Receiver<bool>,
        file_lock: Arc<tokio::sync::Mutex<()>>,
    ) {
        let inner = self.inner.clone();
        self.inner
            .runtime
            .spawn(drive(inner, id, run, stop, file_lock));
    }
}

async fn drive(
    inner: Arc<Inner>,
    id: String,
    run: u64,
    mut stop: watch::Receiver<bool>,
    file_lock: Arc<tokio::sync::Mutex<()>>,
) {
    let _held = file_lock.lock().await;

    if let Some(job) = inner.begin(&id, run) {
        match execute(&inner, &id, run, job, &mut stop).await {
            Ok(Outcome::Finished) => inner.complete(&id, run),
            Ok(Outcome::Stopped) => debug!("Transfer {id} stopped"),
            Err(e) => inner.fail(&id, run, e.to_string()),
        }
    }

    if let Some(path) = inner.finish(&id, run) {
        remove_partial(&path);
    }
}

async fn execute(
    inner: &Inner,
    id: &str,
    run: u64,
    job: Job,
    stop: &mut watch::Receiver<bool>,
) -> Result<Outcome, SError> {
    let Job {
        mut url,
        save_path,
        offset,
    } = job;

    let mut redirects = 0;
    let response = loop {
        let mut request = inner.client.get(&url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = tokio::select! {
            r = request.send() => r?,
            _ = stopped(stop) => return Ok(Outcome::Stopped),
        };

        let status = response.status();
        if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
            if let Some(next) = redirect_target(&response) {
                redirects += 1;
                if redirects > MAX_REDIRECTS {
                    return Err(SError::Network("Too many redirects".into()));
                }
                debug!("Transfer {id} redirected to {next}");
                inner.set_url(id, run, &next);
                url = next;
                continue;
            }
        }

        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(SError::HttpStatus(status.as_u16()));
        }
        break response;
    };

    let append = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
    if offset > 0 && !append {
        warn!("Transfer {id}: server ignored the range request, restarting");
    }
    inner.prepare(id, run, append, response.content_length());

    if let Some(parent) = save_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(&save_path)
        .await?;

    let mut stream = response.bytes_stream();
    let mut sampler = RateSampler::new();

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = stopped(stop) => {
                file.flush().await?;
                return Ok(Outcome::Stopped);
            }
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;

        if !inner.is_current(id, run) {
            file.flush().await?;
            return Ok(Outcome::Stopped);
        }

        file.write_all(&chunk).await?;
        let len = chunk.len() as u64;
        inner.record(id, len);

        if let Some(speed) = sampler.add(len) {
            inner.set_speed(id, run, speed);
        }
    }

    file.flush().await?;
    Ok(Outcome::Finished)
}

/// Resolves once a stop was requested or the control side went away.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|s| *s).await;
}

fn redirect_target(response: &Response) -> Option<String> {
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    response
        .url()
        .join(location)
        .ok()
        .map(|u| u.to_string())
}

fn remove_partial(path: &Utf8Path) {
    match FileUtils::remove_file_if_exists(path) {
        Ok(()) => debug!("Removed partial file {path}"),
        Err(e) => warn!("Could not remove partial file {path}: {e}"),
    }
}

struct RateSampler {
    window_start: Instant,
    bytes: u64,
}

impl RateSampler {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            bytes: 0,
        }
    }

    /// Returns bytes/sec whenever a full window has elapsed.
    fn add(&mut self, len: u64) -> Option<f64> {
        self.bytes += len;
        let elapsed = self.window_start.elapsed();
        if elapsed < SAMPLE_WINDOW {
            return None;
        }

        let speed = self.bytes as f64 / elapsed.as_secs_f64();
        self.window_start = Instant::now();
        self.bytes = 0;
        Some(speed)
    }
}

impl Inner {
    fn snapshot(&self) -> Vec<Transfer> {
        self.table.lock().iter().map(|e| e.transfer.clone()).collect()
    }

    fn publish(&self) {
        let list = self.snapshot();
        self.snapshots.send_replace(list);
    }

    /// Applies `f` to one entry and publishes a snapshot afterwards.
    fn mutate<R>(&self, id: &str, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        let out = {
            let mut table = self.table.lock();
            let entry = table.iter_mut().find(|e| e.transfer.id == id)?;
            f(entry)
        };
        self.publish();
        Some(out)
    }

    /// Same as `mutate` but only while `run` is the live run.
    fn mutate_run<R>(&self, id: &str, run: u64, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        let out = {
            let mut table = self.table.lock();
            let entry = table
                .iter_mut()
                .find(|e| e.transfer.id == id && e.run == run)?;
            f(entry)
        };
        self.publish();
        Some(out)
    }

    fn is_current(&self, id: &str, run: u64) -> bool {
        self.table.lock().iter().any(|e| {
            e.transfer.id == id && e.run == run && e.transfer.state == TransferState::Progressing
        })
    }

    fn begin(&self, id: &str, run: u64) -> Option<Job> {
        self.mutate_run(id, run, |entry| {
            let t = &mut entry.transfer;
            if t.state == TransferState::Queued {
                t.state = TransferState::Progressing;
            }
            (t.state == TransferState::Progressing).then(|| Job {
                url: t.url.clone(),
                save_path: t.save_path.clone(),
                offset: t.received_bytes,
            })
        })
        .flatten()
    }

    fn set_url(&self, id: &str, run: u64, url: &str) {
        self.mutate_run(id, run, |entry| entry.transfer.url = url.to_string());
    }

    fn prepare(&self, id: &str, run: u64, append: bool, content_length: Option<u64>) {
        self.mutate_run(id, run, |entry| {
            let t = &mut entry.transfer;
            if !append {
                t.received_bytes = 0;
                t.total_bytes = content_length.unwrap_or(0);
            }
            t.refresh_progress();
        });
    }

    /// Counts bytes that reached the disk. Runs even if the transfer was
    /// paused meanwhile so the count always matches the file.
    fn record(&self, id: &str, len: u64) {
        if let Some(entry) = self.table.lock().iter_mut().find(|e| e.transfer.id == id) {
            entry.transfer.record_chunk(len);
        }
    }

    fn set_speed(&self, id: &str, run: u64, speed: f64) {
        self.mutate_run(id, run, |entry| {
            if entry.transfer.state == TransferState::Progressing {
                entry.transfer.speed = speed;
            }
        });
    }

    fn complete(&self, id: &str, run: u64) {
        let done = self.mutate_run(id, run, |entry| {
            if entry.transfer.state != TransferState::Progressing {
                return false;
            }
            entry.transfer.complete();
            true
        });

        if done == Some(true) {
            info!("Transfer {id} completed");
            let _ = self.events.send(TransferEvent {
                id: id.to_string(),
                kind: TransferEventKind::Completed,
            });
        }
    }

    fn fail(&self, id: &str, run: u64, error: String) {
        let failed = self.mutate_run(id, run, |entry| {
            if entry.transfer.state != TransferState::Progressing {
                return false;
            }
            entry.transfer.fail(error.clone());
            true
        });

        if failed == Some(true) {
            warn!("Transfer {id} failed: {error}");
            let _ = self.events.send(TransferEvent {
                id: id.to_string(),
                kind: TransferEventKind::Failed { error },
            });
        }
    }

    /// Releases the run. Returns the file to delete when the transfer was
    /// cancelled while this run held it.
    fn finish(&self, id: &str, run: u64) -> Option<Utf8PathBuf> {
        self.mutate_run(id, run, |entry| {
            entry.stop = None;
            entry.transfer.speed = 0.0;
            (entry.transfer.state == TransferState::Cancelled).then(|| entry.transfer.save_path.clone())
        })
        .flatten()
    }
}
