//! Log source resolution
//!
//! Decides per instance whether task logs come live from the supervisor or
//! from archived storage, and renders one stable URL per task. Also drives the
//! live forwarding of a single terminal while the instance is running.

use crate::archive::{ArchiveKey, ArchivedLogStore};
use crate::config::LogServiceConfig;
use crate::error::{ResolveError, SupervisorError};
use crate::instance_store::InstanceStore;
use crate::model::{SupervisorEndpoint, TaskState, TaskStatus, WorkspaceInstance};
use crate::protocol::{HeadlessLogUrls, LogStreamEndpoint};
use crate::retry::{ContinueWhileRunning, RetryError, RetryHarness};
use crate::supervisor::SupervisorApi;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Path prefix of the live forwarding endpoint
pub const HEADLESS_LOGS_PATH_PREFIX: &str = "/headless-logs";

/// Path prefix of the archived download endpoint
pub const HEADLESS_LOG_DOWNLOAD_PATH_PREFIX: &str = "/headless-log-download";

/// Result of forwarding one terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveStreamSummary {
    /// false if the watch was abandoned because the instance stopped or the watch was cancelled
    pub completed: bool,
    pub bytes_forwarded: u64,
}

/// A running live watch; `done` resolves once its upstream listen is gone
struct LiveWatch {
    id: u64,
    cancel: CancellationToken,
    done: oneshot::Receiver<()>,
}

pub struct HeadlessLogResolver {
    host_url: String,
    resolve_timeout: Duration,
    retired_ttl: Duration,
    harness: RetryHarness,
    instances: Arc<dyn InstanceStore>,
    supervisor: Arc<dyn SupervisorApi>,
    archive: Arc<dyn ArchivedLogStore>,
    /// Instances observed as no longer eligible for live logs
    retired: DashMap<String, Instant>,
    /// Running live watches per instance/terminal
    live_watches: DashMap<String, LiveWatch>,
    next_watch_id: AtomicU64,
}

impl HeadlessLogResolver {
    pub fn new(
        config: &LogServiceConfig,
        instances: Arc<dyn InstanceStore>,
        supervisor: Arc<dyn SupervisorApi>,
        archive: Arc<dyn ArchivedLogStore>,
    ) -> Self {
        Self {
            host_url: config.host_url().to_string(),
            resolve_timeout: config.resolve_timeout(),
            retired_ttl: config.retired_ttl(),
            harness: RetryHarness::new(config.retry_interval()),
            instances,
            supervisor,
            archive,
            retired: DashMap::new(),
            live_watches: DashMap::new(),
            next_watch_id: AtomicU64::new(1),
        }
    }

    pub fn instances(&self) -> &Arc<dyn InstanceStore> {
        &self.instances
    }

    pub fn continue_while_running(&self, instance_id: &str) -> ContinueWhileRunning {
        ContinueWhileRunning::new(self.instances.clone(), instance_id)
    }

    /// Look up an instance in the durable store
    pub async fn find_instance(&self, instance_id: &str) -> Result<WorkspaceInstance, ResolveError> {
        self.instances
            .find_instance_by_id(instance_id)
            .await?
            .ok_or_else(|| ResolveError::InstanceNotFound(instance_id.to_string()))
    }

    /// Resolve the log endpoint of every task of an instance
    pub async fn resolve_urls(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<HeadlessLogUrls, ResolveError> {
        if self.prefers_live(instance) {
            if let Some(urls) = self.resolve_live(instance).await {
                return Ok(urls);
            }
        }

        // unable to get a response from the supervisor, try the archive next
        self.resolve_archived(instance).await
    }

    /// Resolve the log endpoint of one task
    pub async fn resolve(
        &self,
        instance: &WorkspaceInstance,
        task_id: &str,
    ) -> Result<LogStreamEndpoint, ResolveError> {
        let urls = self.resolve_urls(instance).await?;
        urls.get(task_id)
            .cloned()
            .ok_or_else(|| ResolveError::TaskNotFound {
                instance_id: instance.id.clone(),
                task_id: task_id.to_string(),
            })
    }

    pub fn is_retired(&self, instance_id: &str) -> bool {
        let expired = match self.retired.get(instance_id) {
            Some(since) => since.elapsed() > self.retired_ttl,
            None => return false,
        };
        if expired {
            self.retired.remove(instance_id);
            return false;
        }
        true
    }

    fn retire(&self, instance_id: &str) {
        if self.retired.insert(instance_id.to_string(), Instant::now()).is_none() {
            info!("Instance {} no longer serves live logs, using archive", instance_id);
        }
        let ttl = self.retired_ttl;
        self.retired.retain(|_, since| since.elapsed() <= ttl);
    }

    fn prefers_live(&self, instance: &WorkspaceInstance) -> bool {
        if self.is_retired(&instance.id) {
            return false;
        }
        if !instance.phase.is_supervisor_available_soon() {
            self.retire(&instance.id);
            return false;
        }
        true
    }

    async fn resolve_live(&self, instance: &WorkspaceInstance) -> Option<HeadlessLogUrls> {
        let cancel = CancellationToken::new();
        let predicate = self.continue_while_running(&instance.id);
        let endpoint = SupervisorEndpoint::for_instance(instance);
        let listing = self.harness.run(
            "list headless log streams",
            &cancel,
            &predicate,
            |_| self.list_live_streams(instance, &endpoint),
        );

        match tokio::time::timeout(self.resolve_timeout, listing).await {
            Ok(Ok(Some(urls))) => Some(urls),
            Ok(Ok(None)) => {
                self.retire(&instance.id);
                None
            }
            Ok(Err(e)) => {
                warn!("Listing live logs of instance {} failed: {}", instance.id, e);
                None
            }
            Err(_) => {
                debug!(
                    "Listing live logs of instance {} timed out after {:?}",
                    instance.id, self.resolve_timeout
                );
                None
            }
        }
    }

    async fn list_live_streams(
        &self,
        instance: &WorkspaceInstance,
        endpoint: &SupervisorEndpoint,
    ) -> Result<HeadlessLogUrls, RetryError<SupervisorError>> {
        if endpoint.url.is_empty() {
            // too early, the instance has no URL yet: retry later
            return Err(RetryError::Retry(SupervisorError::NotReady(format!(
                "instance {} has no ide url yet",
                instance.id
            ))));
        }
        let tasks = self
            .supervisor
            .tasks_status(endpoint)
            .await
            .map_err(RetryError::Retry)?;
        self.render_live_urls(&instance.id, &tasks)
            .map_err(RetryError::Retry)
    }

    fn render_live_urls(
        &self,
        instance_id: &str,
        tasks: &[TaskStatus],
    ) -> Result<HeadlessLogUrls, SupervisorError> {
        let mut urls = HeadlessLogUrls::default();
        for task in tasks {
            match task.state {
                TaskState::Opening => {
                    // no terminal yet; retry to be sure to get hold of all terminals
                    return Err(SupervisorError::NotReady(format!(
                        "instance {} task {} has no terminal yet",
                        instance_id, task.id
                    )));
                }
                TaskState::Closed => continue,
                TaskState::Running => urls.insert(LogStreamEndpoint {
                    task_id: task.id.clone(),
                    url: format!(
                        "{}{}/{}/{}",
                        self.host_url, HEADLESS_LOGS_PATH_PREFIX, instance_id, task.terminal
                    ),
                    online: true,
                }),
            }
        }
        Ok(urls)
    }

    async fn resolve_archived(
        &self,
        instance: &WorkspaceInstance,
    ) -> Result<HeadlessLogUrls, ResolveError> {
        let key = ArchiveKey::new(&instance.owner_id, &instance.workspace_id, &instance.id);
        let task_ids = self.archive.list_logs(&key).await?;

        let mut urls = HeadlessLogUrls::default();
        for task_id in task_ids {
            urls.insert(LogStreamEndpoint {
                url: format!(
                    "{}{}/{}/{}",
                    self.host_url, HEADLESS_LOG_DOWNLOAD_PATH_PREFIX, instance.id, task_id
                ),
                task_id,
                online: false,
            });
        }
        Ok(urls)
    }

    /// Signed download URL of an archived task log; errors are logged and yield `None`
    pub async fn archived_download_url(
        &self,
        instance: &WorkspaceInstance,
        task_id: &str,
    ) -> Option<String> {
        let key = ArchiveKey::new(&instance.owner_id, &instance.workspace_id, &instance.id);
        match self.archive.download_url(&key, task_id).await {
            Ok(url) => url,
            Err(e) => {
                debug!(
                    "Failed to get download URL for instance {} task {}: {}",
                    instance.id, task_id, e
                );
                None
            }
        }
    }

    /// Number of live terminal watches currently running
    pub fn active_live_watches(&self) -> usize {
        self.live_watches.len()
    }

    /// Forward a terminal's output to `sink` for as long as the instance runs.
    ///
    /// A newer watch of the same terminal cancels this one. The watch ends
    /// when the terminal closes, the instance stops, `cancel` fires, or `sink`
    /// is dropped.
    pub async fn stream_task_log_while_running(
        &self,
        instance: &WorkspaceInstance,
        terminal_id: &str,
        sink: mpsc::Sender<Vec<u8>>,
        cancel: CancellationToken,
    ) -> Result<LiveStreamSummary, SupervisorError> {
        // dropped only after the upstream listen of this watch is closed
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let watch_key = format!("{}/{}", instance.id, terminal_id);
        let watch_id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.live_watches.insert(
            watch_key.clone(),
            LiveWatch {
                id: watch_id,
                cancel: cancel.clone(),
                done: done_rx,
            },
        );
        if let Some(previous) = previous {
            debug!("Replacing live watch of {}", watch_key);
            previous.cancel.cancel();
            // at most one listen per terminal: wait for the old one to close
            let _ = previous.done.await;
        }

        let endpoint = SupervisorEndpoint::for_instance(instance);
        let predicate = self.continue_while_running(&instance.id);
        let received_data = AtomicBool::new(false);
        let forwarded = AtomicU64::new(0);

        let result = self
            .harness
            .run("stream workspace logs", &cancel, &predicate, |_| {
                self.forward_terminal(&endpoint, terminal_id, &sink, &received_data, &forwarded)
            })
            .await;

        self.live_watches.remove_if(&watch_key, |_, watch| watch.id == watch_id);
        drop(done_tx);

        let bytes_forwarded = forwarded.load(Ordering::Relaxed);
        match result {
            Ok(Some(())) => Ok(LiveStreamSummary {
                completed: true,
                bytes_forwarded,
            }),
            Ok(None) => Ok(LiveStreamSummary {
                completed: false,
                bytes_forwarded,
            }),
            Err(e) => Err(e),
        }
    }

    async fn forward_terminal(
        &self,
        endpoint: &SupervisorEndpoint,
        terminal_id: &str,
        sink: &mpsc::Sender<Vec<u8>>,
        received_data: &AtomicBool,
        forwarded: &AtomicU64,
    ) -> Result<(), RetryError<SupervisorError>> {
        let classify = |e: SupervisorError| {
            if received_data.load(Ordering::Relaxed) {
                // listening again would replay output the client already has
                return RetryError::Fatal(e);
            }
            match e {
                SupervisorError::NotReady(_) | SupervisorError::Http(_) => RetryError::Retry(e),
                e if e.is_unavailable() => RetryError::Retry(e),
                e => RetryError::Fatal(e),
            }
        };

        let mut stream = self
            .supervisor
            .listen_terminal(endpoint, terminal_id)
            .await
            .map_err(classify)?;

        while let Some(item) = stream.next().await {
            let chunk = item.map_err(classify)?;
            received_data.store(true, Ordering::Relaxed);
            forwarded.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            if sink.send(chunk).await.is_err() {
                debug!("Log sink for terminal {} closed, stopping", terminal_id);
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::error::GRPC_UNAVAILABLE;
    use crate::instance_store::MemoryInstanceStore;
    use crate::model::InstancePhase;
    use crate::supervisor::TerminalStream;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Scripted supervisor: pops one response per call
    #[derive(Default)]
    struct ScriptedSupervisor {
        statuses: Mutex<VecDeque<Result<Vec<TaskStatus>, SupervisorError>>>,
        listens: Mutex<VecDeque<Result<Vec<Result<Vec<u8>, SupervisorError>>, SupervisorError>>>,
        status_calls: AtomicU64,
        listen_calls: AtomicU64,
    }

    #[async_trait]
    impl SupervisorApi for ScriptedSupervisor {
        async fn tasks_status(
            &self,
            _endpoint: &SupervisorEndpoint,
        ) -> Result<Vec<TaskStatus>, SupervisorError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.statuses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SupervisorError::NotReady("script exhausted".into())))
        }

        async fn listen_terminal(
            &self,
            _endpoint: &SupervisorEndpoint,
            _alias: &str,
        ) -> Result<TerminalStream, SupervisorError> {
            self.listen_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.listens.lock().pop_front().unwrap_or_else(|| {
                Err(SupervisorError::Status {
                    code: GRPC_UNAVAILABLE,
                    message: "script exhausted".into(),
                })
            });
            next.map(|items| futures::stream::iter(items).boxed())
        }
    }

    fn unavailable() -> SupervisorError {
        SupervisorError::Status {
            code: GRPC_UNAVAILABLE,
            message: "unavailable".into(),
        }
    }

    fn task(id: &str, terminal: &str, state: TaskState) -> TaskStatus {
        TaskStatus {
            id: id.into(),
            label: format!("task {}", id),
            terminal: terminal.into(),
            state,
        }
    }

    fn running_instance() -> WorkspaceInstance {
        WorkspaceInstance::new("inst-1", "ws-1", "owner-1", InstancePhase::Running)
            .with_ide_url("https://ws-1.example.com", Some("token"))
    }

    struct Fixture {
        store: Arc<MemoryInstanceStore>,
        archive: Arc<MemoryArchive>,
        supervisor: Arc<ScriptedSupervisor>,
        resolver: HeadlessLogResolver,
    }

    fn fixture(timeout_secs: u64) -> Fixture {
        let config = LogServiceConfig {
            host_url: "https://gitpod.example/".into(),
            resolve_timeout_secs: timeout_secs,
            retry_interval_ms: 2000,
            ..Default::default()
        };
        let store = Arc::new(MemoryInstanceStore::new());
        store.insert(running_instance());
        let archive = Arc::new(MemoryArchive::new());
        archive.insert(
            ArchiveKey::new("owner-1", "ws-1", "inst-1"),
            "0",
            "https://storage/signed/0",
        );
        let supervisor = Arc::new(ScriptedSupervisor::default());
        let resolver = HeadlessLogResolver::new(
            &config,
            store.clone(),
            supervisor.clone(),
            archive.clone(),
        );
        Fixture {
            store,
            archive,
            supervisor,
            resolver,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_urls_keyed_by_terminal() {
        let f = fixture(30);
        f.supervisor.statuses.lock().push_back(Ok(vec![
            task("0", "term-a", TaskState::Running),
            task("1", "term-b", TaskState::Closed),
        ]));

        let urls = f.resolver.resolve_urls(&running_instance()).await.unwrap();
        assert_eq!(urls.streams.len(), 1);
        let endpoint = urls.get("0").unwrap();
        assert!(endpoint.online);
        assert_eq!(endpoint.url, "https://gitpod.example/headless-logs/inst-1/term-a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_opening_task_is_retried_not_failed() {
        let f = fixture(30);
        {
            let mut statuses = f.supervisor.statuses.lock();
            statuses.push_back(Ok(vec![task("0", "", TaskState::Opening)]));
            statuses.push_back(Err(unavailable()));
            statuses.push_back(Ok(vec![task("0", "term-a", TaskState::Running)]));
        }

        let endpoint = f.resolver.resolve(&running_instance(), "0").await.unwrap();
        assert!(endpoint.online);
        assert_eq!(f.supervisor.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back_to_archive() {
        let f = fixture(5);

        let endpoint = f.resolver.resolve(&running_instance(), "0").await.unwrap();
        assert!(!endpoint.online);
        assert_eq!(endpoint.url, "https://gitpod.example/headless-log-download/inst-1/0");
        // still eligible: a timeout does not retire the instance
        assert!(!f.resolver.is_retired("inst-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ide_url_retries_until_timeout() {
        let f = fixture(5);
        let instance = WorkspaceInstance::new("inst-1", "ws-1", "owner-1", InstancePhase::Pending);

        let urls = f.resolver.resolve_urls(&instance).await.unwrap();
        assert!(!urls.is_online());
        assert_eq!(f.supervisor.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_instance_is_retired_permanently() {
        let f = fixture(30);
        f.store.set_phase("inst-1", InstancePhase::Stopped);

        // the caller's snapshot is stale, the predicate sees the stop
        let urls = f.resolver.resolve_urls(&running_instance()).await.unwrap();
        assert!(!urls.is_online());
        assert!(f.resolver.is_retired("inst-1"));

        // even with a live supervisor the archived path wins from now on
        f.supervisor
            .statuses
            .lock()
            .push_back(Ok(vec![task("0", "term-a", TaskState::Running)]));
        let urls = f.resolver.resolve_urls(&running_instance()).await.unwrap();
        assert!(!urls.is_online());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let f = fixture(30);
        let instance = WorkspaceInstance::new("inst-1", "ws-1", "owner-1", InstancePhase::Stopped);
        let err = f.resolver.resolve(&instance, "7").await.unwrap_err();
        assert!(matches!(err, ResolveError::TaskNotFound { .. }));
        assert!(f.resolver.archived_download_url(&instance, "7").await.is_none());
        assert_eq!(
            f.resolver.archived_download_url(&instance, "0").await.as_deref(),
            Some("https://storage/signed/0")
        );
        drop(f.archive);
    }

    #[tokio::test]
    async fn test_find_instance() {
        let f = fixture(30);
        assert_eq!(f.resolver.find_instance("inst-1").await.unwrap().id, "inst-1");
        assert!(matches!(
            f.resolver.find_instance("nope").await,
            Err(ResolveError::InstanceNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_retries_unavailable_before_data() {
        let f = fixture(30);
        {
            let mut listens = f.supervisor.listens.lock();
            listens.push_back(Err(unavailable()));
            listens.push_back(Ok(vec![Ok(b"step 1\n".to_vec()), Ok(b"step 2\n".to_vec())]));
        }
        let (tx, mut rx) = mpsc::channel(16);

        let summary = f
            .resolver
            .stream_task_log_while_running(&running_instance(), "term-a", tx, CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.completed);
        assert_eq!(summary.bytes_forwarded, 14);
        assert_eq!(rx.recv().await.unwrap(), b"step 1\n");
        assert_eq!(rx.recv().await.unwrap(), b"step 2\n");
        assert!(rx.recv().await.is_none());
        assert_eq!(f.resolver.active_live_watches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_after_data_is_fatal() {
        let f = fixture(30);
        f.supervisor
            .listens
            .lock()
            .push_back(Ok(vec![Ok(b"partial".to_vec()), Err(unavailable())]));
        let (tx, _rx) = mpsc::channel(16);

        let err = f
            .resolver
            .stream_task_log_while_running(&running_instance(), "term-a", tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(f.supervisor.listen_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_stops_when_instance_stops() {
        let f = fixture(30);
        f.store.set_phase("inst-1", InstancePhase::Stopping);
        let (tx, _rx) = mpsc::channel(16);

        let summary = f
            .resolver
            .stream_task_log_while_running(&running_instance(), "term-a", tx, CancellationToken::new())
            .await
            .unwrap();
        assert!(!summary.completed);
        assert_eq!(summary.bytes_forwarded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_watch_cancels_previous() {
        let f = Arc::new(fixture(30));
        let (tx1, _rx1) = mpsc::channel(16);
        let first_cancel = CancellationToken::new();

        let first = {
            let f = f.clone();
            let cancel = first_cancel.clone();
            tokio::spawn(async move {
                f.resolver
                    .stream_task_log_while_running(&running_instance(), "term-a", tx1, cancel)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(f.resolver.active_live_watches(), 1);

        f.supervisor
            .listens
            .lock()
            .push_back(Ok(vec![Ok(b"fresh".to_vec())]));
        let (tx2, _rx2) = mpsc::channel(16);
        let second = f
            .resolver
            .stream_task_log_while_running(&running_instance(), "term-a", tx2, CancellationToken::new())
            .await
            .unwrap();

        assert!(first_cancel.is_cancelled());
        let first = first.await.unwrap().unwrap();
        assert!(!first.completed);
        assert!(second.completed);
        assert_eq!(f.resolver.active_live_watches(), 0);
    }

    /// Supervisor whose terminals never produce output and count open listens
    #[derive(Default)]
    struct PendingSupervisor {
        open: Arc<AtomicU64>,
        max_open: Arc<AtomicU64>,
        listen_calls: AtomicU64,
    }

    struct ListenGuard(Arc<AtomicU64>);

    impl Drop for ListenGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SupervisorApi for PendingSupervisor {
        async fn tasks_status(
            &self,
            _endpoint: &SupervisorEndpoint,
        ) -> Result<Vec<TaskStatus>, SupervisorError> {
            Ok(Vec::new())
        }

        async fn listen_terminal(
            &self,
            _endpoint: &SupervisorEndpoint,
            _alias: &str,
        ) -> Result<TerminalStream, SupervisorError> {
            self.listen_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(now, Ordering::SeqCst);
            let guard = ListenGuard(self.open.clone());
            Ok(futures::stream::pending()
                .map(move |item| {
                    let _ = &guard;
                    item
                })
                .boxed())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replaced_watch_closes_its_listen_first() {
        let store = Arc::new(MemoryInstanceStore::new());
        store.insert(running_instance());
        let supervisor = Arc::new(PendingSupervisor::default());
        let resolver = Arc::new(HeadlessLogResolver::new(
            &LogServiceConfig::default(),
            store,
            supervisor.clone(),
            Arc::new(MemoryArchive::new()),
        ));

        let mut watches = Vec::new();
        for round in 1..=3u64 {
            let (tx, rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            let task = {
                let resolver = resolver.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    resolver
                        .stream_task_log_while_running(&running_instance(), "term-a", tx, cancel)
                        .await
                })
            };
            for _ in 0..200 {
                if supervisor.listen_calls.load(Ordering::SeqCst) == round {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            assert_eq!(supervisor.listen_calls.load(Ordering::SeqCst), round);
            watches.push((task, cancel, rx));
        }

        assert_eq!(supervisor.max_open.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.open.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.active_live_watches(), 1);

        let (last, last_cancel, _rx) = watches.pop().unwrap();
        for (task, cancel, _rx) in watches {
            assert!(cancel.is_cancelled());
            assert!(!task.await.unwrap().unwrap().completed);
        }
        last_cancel.cancel();
        assert!(!last.await.unwrap().unwrap().completed);
        assert_eq!(supervisor.open.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.active_live_watches(), 0);
    }
}
