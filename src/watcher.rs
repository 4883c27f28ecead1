//! Watch mode: re-run the backup whenever the source changes.
//!
//! Raw change events are filtered and fed to a [`Debouncer`]; once no event
//! has arrived for a full quiet period the runner is invoked once. Runs happen
//! on the blocking pool, one at a time per watcher. A trigger that fires while
//! a run is in flight queues a single follow-up run, and further triggers
//! coalesce into it.

use crate::error::{BackupError, Result};
use crate::pipeline::BackupPipeline;
use crate::request::{BackupRequest, Subject};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

/// A raw file system change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            path: path.into(),
            is_dir,
        }
    }
}

/// Whether a run is counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Idle,
    Pending { deadline: Instant },
}

/// Debounce state machine with at most one pending trigger.
///
/// Every recorded event restarts the full quiet period, so a continuous
/// stream of events postpones the run indefinitely.
#[derive(Debug)]
pub struct Debouncer {
    quiet_period: Duration,
    state: TriggerState,
}

impl Debouncer {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            state: TriggerState::Idle,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, TriggerState::Pending { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TriggerState::Idle => None,
            TriggerState::Pending { deadline } => Some(deadline),
        }
    }

    /// Records an event seen at `now`. Returns `true` if it replaced a pending trigger.
    pub fn record(&mut self, now: Instant) -> bool {
        let replaced = self.is_pending();
        self.state = TriggerState::Pending {
            deadline: now + self.quiet_period,
        };
        replaced
    }

    /// Returns `true` and goes idle if the pending trigger is due at `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.state {
            TriggerState::Pending { deadline } if now >= deadline => {
                self.state = TriggerState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Drops the pending trigger, if any. Returns `true` if one was dropped.
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.is_pending();
        self.state = TriggerState::Idle;
        cancelled
    }
}

/// Decides which change events concern a backup subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Only events on this exact file.
    File(PathBuf),
    /// Events anywhere under `root`, except under `exclude`.
    Directory {
        root: PathBuf,
        exclude: Option<PathBuf>,
    },
}

impl EventFilter {
    /// Filter for the subject of `request`; `None` if the request has no subject.
    ///
    /// The destination is excluded so a backup written inside the watched
    /// directory does not trigger the next one.
    pub fn for_request(request: &BackupRequest) -> Option<Self> {
        let filter = match request.subject()? {
            Subject::File(file) => EventFilter::File(resolve(&file)),
            Subject::Directory(root) => EventFilter::Directory {
                root: resolve(&root),
                exclude: request.destination().map(resolve),
            },
        };
        Some(filter)
    }

    /// The directory an event source has to watch for this filter.
    pub fn watch_root(&self) -> &Path {
        match self {
            EventFilter::File(file) => file.parent().unwrap_or_else(|| Path::new(".")),
            EventFilter::Directory { root, .. } => root,
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            EventFilter::File(file) => event.path == *file,
            EventFilter::Directory { root, exclude } => {
                event.path.starts_with(root)
                    && !exclude
                        .as_ref()
                        .is_some_and(|dest| event.path.starts_with(dest))
            }
        }
    }
}

/// Absolute, and canonical where the path (or its parent) exists, so it
/// compares equal to the paths the OS reports.
fn resolve(path: &Path) -> PathBuf {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    if let Ok(canonical) = abs.canonicalize() {
        return canonical;
    }
    match (abs.parent(), abs.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or(abs),
        _ => abs,
    }
}

/// The job a watcher triggers. Returns the artifact path of the run.
pub type Runner = Arc<dyn Fn() -> Result<PathBuf> + Send + Sync>;

/// Counters of a watcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Quiet periods that elapsed, including those coalesced into a queued run.
    pub triggered: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl WatchSummary {
    pub fn runs(&self) -> usize {
        self.succeeded + self.failed
    }
}

#[derive(Debug, Default)]
struct WatchStats {
    triggered: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl WatchStats {
    fn snapshot(&self) -> WatchSummary {
        WatchSummary {
            triggered: self.triggered.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Default)]
struct RunSlot {
    running: bool,
    queued: bool,
    stopping: bool,
}

#[derive(Debug)]
struct Shared {
    debouncer: Mutex<Debouncer>,
    slot: Mutex<RunSlot>,
    stats: WatchStats,
}

/// Debounced trigger around a [`Runner`].
pub struct ChangeWatcher {
    quiet_period: Duration,
    filter: Option<EventFilter>,
    runner: Runner,
}

impl ChangeWatcher {
    pub fn new(
        quiet_period: Duration,
        runner: impl Fn() -> Result<PathBuf> + Send + Sync + 'static,
    ) -> Self {
        Self {
            quiet_period,
            filter: None,
            runner: Arc::new(runner),
        }
    }

    /// A watcher that runs `pipeline` for `request` and only reacts to
    /// changes of the request's subject.
    pub fn for_pipeline(
        pipeline: BackupPipeline,
        request: BackupRequest,
        quiet_period: Duration,
    ) -> Self {
        let filter = EventFilter::for_request(&request);
        let watcher = Self::new(quiet_period, move || {
            pipeline.run(&request).map(|report| report.artifact)
        });
        match filter {
            Some(filter) => watcher.with_filter(filter),
            None => watcher,
        }
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter(&self) -> Option<&EventFilter> {
        self.filter.as_ref()
    }

    /// Starts the watcher on the current tokio runtime, consuming `events`.
    pub fn spawn(self, events: mpsc::UnboundedReceiver<ChangeEvent>) -> WatchHandle {
        let shared = Arc::new(Shared {
            debouncer: Mutex::new(Debouncer::new(self.quiet_period)),
            slot: Mutex::new(RunSlot::default()),
            stats: WatchStats::default(),
        });
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.drive(events, stop_rx, shared.clone()));
        WatchHandle {
            stop_tx,
            task,
            shared,
        }
    }

    async fn drive(
        self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        mut stop_rx: oneshot::Receiver<()>,
        shared: Arc<Shared>,
    ) -> WatchSummary {
        info!(quiet_period = ?self.quiet_period, "Watcher started");
        let mut in_flight: Option<JoinHandle<()>> = None;
        let mut events_open = true;

        loop {
            let deadline = shared.debouncer.lock().deadline();
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                event = events.recv(), if events_open => match event {
                    Some(event) => self.on_event(&shared, event),
                    None => {
                        debug!("Change event source closed");
                        events_open = false;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let due = shared.debouncer.lock().fire(Instant::now());
                    if due && let Some(handle) = self.trigger(&shared) {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        if shared.debouncer.lock().cancel() {
            debug!("Pending backup cancelled");
        }
        {
            let mut slot = shared.slot.lock();
            slot.stopping = true;
            slot.queued = false;
        }
        if let Some(handle) = in_flight
            && let Err(e) = handle.await
        {
            error!(error = %e, "Backup task ended abnormally");
        }

        let summary = shared.stats.snapshot();
        info!(
            triggered = summary.triggered,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Watcher stopped"
        );
        summary
    }

    fn on_event(&self, shared: &Shared, event: ChangeEvent) {
        if let Some(filter) = &self.filter
            && !filter.matches(&event)
        {
            trace!(path = ?event.path, "Ignoring unrelated change");
            return;
        }
        let rescheduled = shared.debouncer.lock().record(Instant::now());
        debug!(path = ?event.path, is_dir = event.is_dir, rescheduled, "Change detected");
    }

    /// Starts a run, or queues one if a run is in flight.
    fn trigger(&self, shared: &Arc<Shared>) -> Option<JoinHandle<()>> {
        let trigger = shared.stats.triggered.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut slot = shared.slot.lock();
            if slot.running {
                slot.queued = true;
                warn!(trigger, "Previous backup still running, follow-up run queued");
                return None;
            }
            slot.running = true;
        }

        info!(trigger, "Quiet period elapsed, starting backup");
        let runner = self.runner.clone();
        let shared = shared.clone();
        Some(tokio::task::spawn_blocking(move || {
            run_loop(&runner, &shared)
        }))
    }
}

/// Runs until no follow-up run is queued.
fn run_loop(runner: &Runner, shared: &Shared) {
    loop {
        match panic::catch_unwind(AssertUnwindSafe(|| runner())) {
            Ok(Ok(artifact)) => {
                shared.stats.succeeded.fetch_add(1, Ordering::SeqCst);
                info!(artifact = ?artifact, "Triggered backup finished");
            }
            Ok(Err(e)) => {
                shared.stats.failed.fetch_add(1, Ordering::SeqCst);
                error!(stage = e.stage(), error = %e, "Triggered backup failed");
            }
            Err(_) => {
                shared.stats.failed.fetch_add(1, Ordering::SeqCst);
                error!("Triggered backup panicked");
            }
        }

        let mut slot = shared.slot.lock();
        if slot.queued && !slot.stopping {
            slot.queued = false;
            continue;
        }
        slot.running = false;
        slot.queued = false;
        return;
    }
}

/// Handle to a running [`ChangeWatcher`]. Dropping it stops the watcher
/// without waiting for an in-flight run.
pub struct WatchHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<WatchSummary>,
    shared: Arc<Shared>,
}

impl WatchHandle {
    pub fn is_pending(&self) -> bool {
        self.shared.debouncer.lock().is_pending()
    }

    pub fn stats(&self) -> WatchSummary {
        self.shared.stats.snapshot()
    }

    /// Cancels the pending trigger, drops any queued run and waits for the
    /// in-flight run to finish.
    pub async fn stop(self) -> WatchSummary {
        let WatchHandle {
            stop_tx,
            task,
            shared,
        } = self;
        let _ = stop_tx.send(());
        match task.await {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "Watcher task ended abnormally");
                shared.stats.snapshot()
            }
        }
    }
}

/// Native file system notifications for one directory tree.
pub struct FsEventSource {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FsEventSource {
    /// Watches `root` recursively and forwards every non-access event to `tx`.
    pub fn start(root: &Path, tx: mpsc::UnboundedSender<ChangeEvent>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
                Ok(event) => {
                    trace!(kind = ?event.kind, paths = ?event.paths, "File system event");
                    for path in event.paths {
                        let is_dir = path.is_dir();
                        // The receiver is gone once the watcher stops.
                        let _ = tx.send(ChangeEvent { path, is_dir });
                    }
                }
                Err(e) => warn!(error = %e, "Watch error"),
            }
        })
        .map_err(|e| notify_error(root, e))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| notify_error(root, e))?;
        info!(root = ?root, "Watching for changes");

        Ok(Self {
            watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops the notifications and joins the notification thread.
    pub fn stop(mut self) {
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!(root = ?self.root, error = %e, "Unwatch failed");
        }
    }
}

fn notify_error(root: &Path, e: notify::Error) -> BackupError {
    BackupError::Io {
        path: root.to_path_buf(),
        source: io::Error::other(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_debouncer_restarts_quiet_period() {
        let quiet = Duration::from_secs(2);
        let mut debouncer = Debouncer::new(quiet);
        let start = Instant::now();
        assert_eq!(debouncer.state(), TriggerState::Idle);

        assert!(!debouncer.record(start));
        assert_eq!(debouncer.deadline(), Some(start + quiet));

        let later = start + Duration::from_millis(1500);
        assert!(debouncer.record(later));
        assert_eq!(debouncer.deadline(), Some(later + quiet));

        // The first deadline has passed, but it was replaced.
        assert!(!debouncer.fire(start + quiet));
        assert!(debouncer.is_pending());

        assert!(debouncer.fire(later + quiet));
        assert_eq!(debouncer.state(), TriggerState::Idle);
        assert!(!debouncer.fire(later + quiet * 2));
    }

    #[test]
    fn test_debouncer_cancel() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        assert!(!debouncer.cancel());

        let now = Instant::now();
        debouncer.record(now);
        assert!(debouncer.cancel());
        assert!(!debouncer.is_pending());
        assert!(!debouncer.fire(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_file_filter() {
        let filter = EventFilter::File(PathBuf::from("/data/a/x.txt"));
        assert_eq!(filter.watch_root(), Path::new("/data/a"));
        assert!(filter.matches(&ChangeEvent::new("/data/a/x.txt", false)));
        assert!(!filter.matches(&ChangeEvent::new("/data/a/y.txt", false)));
        assert!(!filter.matches(&ChangeEvent::new("/data/a", true)));
    }

    #[test]
    fn test_directory_filter_excludes_destination() {
        let filter = EventFilter::Directory {
            root: PathBuf::from("/data/site"),
            exclude: Some(PathBuf::from("/data/site/backups")),
        };
        assert!(filter.matches(&ChangeEvent::new("/data/site/index.html", false)));
        assert!(filter.matches(&ChangeEvent::new("/data/site/assets", true)));
        assert!(!filter.matches(&ChangeEvent::new("/data/site/backups/site-BACKUP", true)));
        assert!(!filter.matches(&ChangeEvent::new("/data/other/index.html", false)));
    }

    #[test]
    fn test_filter_for_request() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("a");
        fs::create_dir(&source)?;
        fs::write(source.join("x.txt"), "x")?;
        let dest = source.join("out");
        let canonical = source.canonicalize()?;

        let request = BackupRequest::new(source.to_string_lossy(), dest.to_string_lossy());
        assert_eq!(
            EventFilter::for_request(&request),
            Some(EventFilter::Directory {
                root: canonical.clone(),
                exclude: Some(canonical.join("out")),
            })
        );

        let request = request.target_file("x.txt");
        assert_eq!(
            EventFilter::for_request(&request),
            Some(EventFilter::File(canonical.join("x.txt")))
        );

        assert_eq!(EventFilter::for_request(&BackupRequest::default()), None);
        Ok(())
    }
}
