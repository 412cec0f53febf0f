use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qce_bridge::{Bridge, MediaDownloadRequest};
use qce_core::config::{
    CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_RECOVERY_MS, DOWNLOAD_TIMEOUT_MS, MAX_CONCURRENT_DOWNLOADS,
    MAX_DOWNLOAD_RETRIES,
};
use qce_core::message::ParsedMessage;
use qce_core::resource::{ResourceInfo, ResourceStatus, ResourceType};
use qce_core::ChatRef;
use qce_store::TaskStore;

use crate::breaker::CircuitBreaker;
use crate::error::ResourceError;
use crate::queue::{DownloadQueue, DownloadTask};
use crate::store::ResourceStore;

/// Per-export resource pipeline: discovers referenced media, downloads it
/// with bounded concurrency behind a circuit breaker, and guarantees every
/// referenced resource ends `downloaded` (integrity-checked on disk) or
/// `failed` with a classified error.
pub struct ResourceHandler {
    bridge: Arc<dyn Bridge>,
    store: Arc<ResourceStore>,
    db: Arc<TaskStore>,
    chat: ChatRef,
    breaker: CircuitBreaker,
    queue: Mutex<DownloadQueue>,
    /// identity -> latest known state.
    registry: Mutex<HashMap<String, ResourceInfo>>,
    /// identity -> message ids referencing it.
    owners: Mutex<HashMap<String, Vec<String>>>,
    max_concurrent: usize,
    download_timeout_ms: u64,
    max_retries: u32,
}

impl ResourceHandler {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        store: Arc<ResourceStore>,
        db: Arc<TaskStore>,
        chat: ChatRef,
    ) -> Self {
        Self {
            bridge,
            store,
            db,
            chat,
            breaker: CircuitBreaker::new(
                CIRCUIT_FAILURE_THRESHOLD,
                Duration::from_millis(CIRCUIT_RECOVERY_MS),
            ),
            queue: Mutex::new(DownloadQueue::new()),
            registry: Mutex::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
            max_concurrent: MAX_CONCURRENT_DOWNLOADS,
            download_timeout_ms: DOWNLOAD_TIMEOUT_MS,
            max_retries: MAX_DOWNLOAD_RETRIES,
        }
    }

    pub fn with_limits(mut self, max_concurrent: usize, timeout_ms: u64, max_retries: u32) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self.download_timeout_ms = timeout_ms;
        self.max_retries = max_retries;
        self
    }

    pub fn with_breaker(mut self, threshold: u32, recovery: Duration) -> Self {
        self.breaker = CircuitBreaker::new(threshold, recovery);
        self
    }

    /// Register a parsed batch: dedupe resources by identity, enqueue the
    /// ones not already healthy on disk. Returns the current per-message
    /// snapshot (mostly `pending` at this point).
    pub fn process(&self, batch: &[ParsedMessage]) -> HashMap<String, Vec<ResourceInfo>> {
        for msg in batch {
            for resource in &msg.content.resources {
                let identity = resource.identity();
                self.owners
                    .lock()
                    .unwrap()
                    .entry(identity.clone())
                    .or_default()
                    .push(msg.message_id.clone());

                let mut registry = self.registry.lock().unwrap();
                if registry.contains_key(&identity) {
                    continue;
                }

                let mut entry = resource.clone();
                if self.store.check_health(&entry, false) {
                    // Already content-addressed on disk from an earlier run.
                    entry.status = ResourceStatus::Downloaded;
                    entry.accessible = true;
                    entry.local_path =
                        Some(self.store.target_path(&entry).display().to_string());
                    entry.checked_at = Some(Utc::now());
                    let _ = self.db.upsert_resource(&entry);
                } else {
                    entry.status = ResourceStatus::Pending;
                    self.queue.lock().unwrap().push(DownloadTask {
                        resource: entry.clone(),
                        msg_id: msg.message_id.clone(),
                        chat: self.chat.clone(),
                        attempts: 0,
                    });
                }
                registry.insert(identity, entry);
            }
        }
        self.collect_results()
    }

    pub fn pending_count(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Drain the queue with at most `max_concurrent` downloads in flight.
    ///
    /// `stall` is the watchdog: when no download finishes within it, the
    /// remaining work is abandoned and every unresolved resource is marked
    /// failed. Returns the final per-message resource map.
    pub async fn wait_for_all_downloads(
        self: &Arc<Self>,
        stall: Duration,
    ) -> HashMap<String, Vec<ResourceInfo>> {
        let mut join: JoinSet<(DownloadTask, Result<ResourceInfo, ResourceError>)> =
            JoinSet::new();

        loop {
            while join.len() < self.max_concurrent {
                let next = self.queue.lock().unwrap().pop();
                let Some(task) = next else { break };
                let handler = Arc::clone(self);
                join.spawn(async move {
                    let outcome = handler.attempt_download(&task).await;
                    (task, outcome)
                });
            }
            if join.is_empty() {
                break;
            }

            match tokio::time::timeout(stall, join.join_next()).await {
                Ok(Some(Ok((task, outcome)))) => self.handle_outcome(task, outcome),
                Ok(Some(Err(e))) => warn!(error = %e, "download worker panicked"),
                Ok(None) => {}
                Err(_) => {
                    warn!(stall_secs = stall.as_secs(), "download stall watchdog fired");
                    join.abort_all();
                    while join.join_next().await.is_some() {}
                    self.fail_outstanding("timeout: download stalled");
                    break;
                }
            }
        }

        self.collect_results()
    }

    /// Final per-message resource states.
    pub fn collect_results(&self) -> HashMap<String, Vec<ResourceInfo>> {
        let registry = self.registry.lock().unwrap();
        let owners = self.owners.lock().unwrap();
        let mut out: HashMap<String, Vec<ResourceInfo>> = HashMap::new();
        for (identity, msg_ids) in owners.iter() {
            let Some(info) = registry.get(identity) else {
                continue;
            };
            for msg_id in msg_ids {
                out.entry(msg_id.clone()).or_default().push(info.clone());
            }
        }
        out
    }

    // --- download mechanics ------------------------------------------------

    async fn attempt_download(
        &self,
        task: &DownloadTask,
    ) -> Result<ResourceInfo, ResourceError> {
        self.breaker.check()?;

        let mut resource = task.resource.clone();
        resource.download_attempts = task.attempts + 1;
        resource.status = ResourceStatus::Downloading;
        let target = self.store.target_path(&resource);

        debug!(
            file = %resource.file_name,
            attempt = resource.download_attempts,
            "downloading resource"
        );

        let api_path = self.call_bridge_download(task, &target).await;

        // Fallback chain: API-reported path, the pre-computed target, an
        // element-local source file, then (audio only) the PTT URL.
        let mut empty_file_seen = false;
        let mut missing_path_seen = false;

        if let Ok(Some(path)) = &api_path {
            if !path.is_empty() {
                let reported = PathBuf::from(path);
                match tokio::fs::metadata(&reported).await {
                    Ok(meta) if meta.len() > 0 => {
                        if reported != target {
                            tokio::fs::copy(&reported, &target).await?;
                        }
                        return self.finalize_success(resource, &target).await;
                    }
                    Ok(_) => empty_file_seen = true,
                    Err(_) => missing_path_seen = true,
                }
            }
        }

        if let Ok(meta) = tokio::fs::metadata(&target).await {
            if meta.len() > 0 {
                return self.finalize_success(resource, &target).await;
            }
            empty_file_seen = true;
        }

        if let Some(src) = resource.source_path.clone() {
            let src = PathBuf::from(src);
            if let Ok(meta) = tokio::fs::metadata(&src).await {
                if meta.len() > 0 {
                    tokio::fs::copy(&src, &target).await?;
                    return self.finalize_success(resource, &target).await;
                }
            }
        }

        if resource.resource_type == ResourceType::Audio {
            if let Some(uuid) = resource.file_uuid.clone() {
                if let Ok(()) = self.fetch_ptt(&uuid, &target).await {
                    return self.finalize_success(resource, &target).await;
                }
            }
        }

        // Nothing produced a usable file — classify the failure.
        match api_path {
            Err(e) => Err(e),
            Ok(None) => Err(ResourceError::EmptyPath),
            Ok(Some(_)) if empty_file_seen => Err(ResourceError::EmptyFile),
            Ok(Some(_)) if missing_path_seen => Err(ResourceError::NotAtExpectedLocation),
            Ok(Some(_)) => Err(ResourceError::EmptyPath),
        }
    }

    async fn call_bridge_download(
        &self,
        task: &DownloadTask,
        target: &PathBuf,
    ) -> Result<Option<String>, ResourceError> {
        let Some(element_id) = task.resource.element_id.clone() else {
            // No element reference — the fallback chain may still find the
            // file locally.
            return Ok(None);
        };
        let req = MediaDownloadRequest {
            msg_id: task.msg_id.clone(),
            chat_type: task.chat.chat_type,
            peer_uid: task.chat.peer_uid.clone(),
            element_id,
            dest_path: target.display().to_string(),
            timeout_ms: self.download_timeout_ms,
        };
        match tokio::time::timeout(
            Duration::from_millis(self.download_timeout_ms),
            self.bridge.download_media(&req),
        )
        .await
        {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(e)) => Err(ResourceError::Bridge(e)),
            Err(_) => Err(ResourceError::Timeout {
                ms: self.download_timeout_ms,
            }),
        }
    }

    /// Voice fallback: resolve the PTT URL and fetch it over HTTP.
    async fn fetch_ptt(&self, file_uuid: &str, target: &PathBuf) -> Result<(), ResourceError> {
        let url = self
            .bridge
            .resolve_ptt_url(&self.chat.peer_uid, file_uuid, self.download_timeout_ms)
            .await?;
        let resp = reqwest::get(&url)
            .await
            .map_err(|e| ResourceError::Bridge(e.into()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ResourceError::Bridge(e.into()))?;
        if bytes.is_empty() {
            return Err(ResourceError::EmptyFile);
        }
        tokio::fs::write(target, &bytes).await?;
        Ok(())
    }

    /// Verify the final file and build the success record.
    async fn finalize_success(
        &self,
        mut resource: ResourceInfo,
        target: &PathBuf,
    ) -> Result<ResourceInfo, ResourceError> {
        let meta = tokio::fs::metadata(target).await?;
        if meta.len() == 0 {
            return Err(ResourceError::EmptyFile);
        }
        if !resource.md5.is_empty() {
            let path = target.clone();
            let actual = tokio::task::spawn_blocking(move || ResourceStore::hash_file(&path))
                .await
                .map_err(|e| ResourceError::Io(std::io::Error::other(e)))??;
            if actual != resource.md5 {
                return Err(ResourceError::HashMismatch {
                    expected: resource.md5.clone(),
                });
            }
        }

        resource.status = ResourceStatus::Downloaded;
        resource.accessible = true;
        resource.local_path = Some(target.display().to_string());
        resource.checked_at = Some(Utc::now());
        if resource.file_size == 0 {
            resource.file_size = meta.len() as i64;
        }
        resource.last_error = None;
        Ok(resource)
    }

    fn handle_outcome(
        &self,
        task: DownloadTask,
        outcome: Result<ResourceInfo, ResourceError>,
    ) {
        let identity = task.resource.identity();
        match outcome {
            Ok(info) => {
                self.breaker.record_success();
                let _ = self.db.upsert_resource(&info);
                self.registry.lock().unwrap().insert(identity, info);
            }
            Err(ResourceError::CircuitOpen) => {
                // Fast-fail: not a bridge failure, no retry, no breaker hit.
                self.finalize_failure(&task, "circuit-open".to_string());
            }
            Err(e) => {
                self.breaker.record_failure();
                let next_attempts = task.attempts + 1;
                if next_attempts < self.max_retries {
                    debug!(
                        file = %task.resource.file_name,
                        attempts = next_attempts,
                        error = %e,
                        "download failed, requeueing at head"
                    );
                    let mut retry = task;
                    retry.attempts = next_attempts;
                    self.queue.lock().unwrap().push_front(retry);
                } else {
                    self.finalize_failure(&task, e.classify());
                }
            }
        }
    }

    fn finalize_failure(&self, task: &DownloadTask, classified: String) {
        let identity = task.resource.identity();
        let mut info = task.resource.clone();
        info.status = ResourceStatus::Failed;
        info.accessible = false;
        info.download_attempts = task.attempts + 1;
        info.last_error = Some(classified);
        info.checked_at = Some(Utc::now());
        let _ = self.db.upsert_resource(&info);
        self.registry.lock().unwrap().insert(identity, info);
    }

    /// Mark everything not yet terminal as failed (stall watchdog path).
    fn fail_outstanding(&self, reason: &str) {
        let drained = self.queue.lock().unwrap().drain();
        for task in drained {
            self.finalize_failure(&task, reason.to_string());
        }
        let mut registry = self.registry.lock().unwrap();
        for info in registry.values_mut() {
            if !matches!(
                info.status,
                ResourceStatus::Downloaded | ResourceStatus::Failed
            ) {
                info.status = ResourceStatus::Failed;
                info.accessible = false;
                info.last_error = Some(reason.to_string());
                info.checked_at = Some(Utc::now());
                let _ = self.db.upsert_resource(info);
            }
        }
    }

}

// --- maintenance -----------------------------------------------------------

/// Re-verify everything the store believes is downloaded; silently demote
/// broken files. Runs on the periodic scan, never user-facing.
pub fn scan_downloaded(store: &ResourceStore, db: &TaskStore) {
    let resources = match db.list_resources(Some("downloaded")) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "health scan could not list resources");
            return;
        }
    };
    let mut demoted = 0usize;
    for mut res in resources {
        if store.check_health(&res, true) {
            res.checked_at = Some(Utc::now());
        } else {
            res.status = ResourceStatus::Failed;
            res.accessible = false;
            res.checked_at = Some(Utc::now());
            demoted += 1;
        }
        let _ = db.upsert_resource(&res);
    }
    if demoted > 0 {
        info!(demoted, "health scan demoted broken resources");
    }
}

/// Opt-in cache cleanup: drop resource rows unchecked for `days` days, then
/// their files. Returns the number of rows removed.
pub async fn cleanup_cache(db: &TaskStore, days: i64) -> usize {
    let before: HashMap<String, Option<String>> = match db.list_resources(None) {
        Ok(list) => list
            .into_iter()
            .map(|r| (r.md5.clone(), r.local_path.clone()))
            .collect(),
        Err(_) => HashMap::new(),
    };
    let removed = db.delete_expired_resources(days).unwrap_or(0);
    if removed == 0 {
        return 0;
    }
    // Remove files whose rows are gone.
    let after: std::collections::HashSet<String> = db
        .list_resources(None)
        .map(|list| list.into_iter().map(|r| r.md5).collect())
        .unwrap_or_default();
    for (md5, path) in before {
        if !after.contains(&md5) {
            if let Some(p) = path {
                let _ = tokio::fs::remove_file(&p).await;
            }
        }
    }
    removed
}

/// Spawn the periodic health scan loop.
pub fn spawn_health_scan(
    store: Arc<ResourceStore>,
    db: Arc<TaskStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => scan_downloaded(&store, &db),
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
