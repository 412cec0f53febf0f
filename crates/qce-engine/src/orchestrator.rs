use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use qce_bridge::Bridge;
use qce_core::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_MS, DOWNLOAD_STALL_SECS,
    DOWNLOAD_TIMEOUT_MS, MAX_CONCURRENT_DOWNLOADS, MAX_DOWNLOAD_RETRIES,
};
use qce_core::message::ParsedMessage;
use qce_core::resource::ResourceInfo;
use qce_core::schedule::{ExecutionHistory, ExecutionStatus};
use qce_core::task::{ExportTask, TaskState, TaskStatus};
use qce_core::QceError;
use qce_exporters::{create_exporter, ExportArtifact, ExportOptions, Exporter};
use qce_fetcher::MessageFetcher;
use qce_parser::{update_resource_paths, MessageParser};
use qce_resources::{ResourceHandler, ResourceStore};
use qce_scheduler::FiredExport;
use qce_store::{spawn_progress_writer, ProgressWriter, TaskStore};

use crate::events::{
    ExportEventData, WsEvent, EVENT_EXPORT_COMPLETE, EVENT_EXPORT_ERROR, EVENT_EXPORT_PROGRESS,
    EVENT_NOTIFICATION,
};

const EVENT_CAPACITY: usize = 256;

/// Engine-level tuning, derived from the loaded config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub exports_dir: PathBuf,
    pub max_concurrent_downloads: usize,
    pub download_timeout_ms: u64,
    pub download_stall_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exports_dir: PathBuf::from("exports"),
            max_concurrent_downloads: MAX_CONCURRENT_DOWNLOADS,
            download_timeout_ms: DOWNLOAD_TIMEOUT_MS,
            download_stall_secs: DOWNLOAD_STALL_SECS,
        }
    }
}

/// What a finished export produced.
#[derive(Debug)]
pub struct ExportOutcome {
    pub message_count: u64,
    pub artifacts: Vec<ExportArtifact>,
}

/// Drives exports end-to-end: fetch → parse → download → serialize →
/// finalize, with per-phase progress, WS events, cooperative cancellation
/// and crash-safe persistence. The in-memory state map is a cache; the task
/// store is authoritative.
pub struct ExportEngine {
    bridge: Arc<dyn Bridge>,
    store: Arc<TaskStore>,
    resource_store: Arc<ResourceStore>,
    progress: ProgressWriter,
    events: broadcast::Sender<String>,
    states: DashMap<String, TaskState>,
    cancel_tokens: DashMap<String, CancellationToken>,
    config: EngineConfig,
}

impl ExportEngine {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        store: Arc<TaskStore>,
        resource_store: Arc<ResourceStore>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let progress = spawn_progress_writer(Arc::clone(&store));
        Arc::new(Self {
            bridge,
            store,
            resource_store,
            progress,
            events,
            states: DashMap::new(),
            cancel_tokens: DashMap::new(),
            config,
        })
    }

    /// Subscribe to the export event stream (WS fan-out attaches here).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Rebuild the in-memory cache from the store. Tasks left `running` by a
    /// dead process are marked failed/orphaned; no events are emitted — there
    /// are no subscribers for a crash that already happened.
    pub fn load_existing_tasks(&self) -> Result<usize, QceError> {
        let orphaned = self.store.mark_orphaned_running()?;
        let tasks = self.store.list_tasks()?;
        for (_, state) in &tasks {
            self.states.insert(state.task_id.clone(), state.clone());
        }
        info!(tasks = tasks.len(), orphaned, "existing tasks loaded");
        Ok(orphaned)
    }

    /// Validate and persist a new task, then run it in the background.
    pub fn submit(self: &Arc<Self>, task: ExportTask) -> Result<String, QceError> {
        validate(&task)?;
        let mut state = TaskState::new(&task.task_id);
        state.status = TaskStatus::Pending;
        self.store.upsert_task(&task, &state)?;
        self.states.insert(task.task_id.clone(), state);

        self.emit(
            EVENT_NOTIFICATION,
            ExportEventData {
                task_id: task.task_id.clone(),
                status: TaskStatus::Pending.to_string(),
                progress: 0,
                message: Some(format!("export task created for {}", task.chat_name)),
                ..Default::default()
            },
        );

        let task_id = task.task_id.clone();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let _ = engine.execute(task).await;
        });
        Ok(task_id)
    }

    /// Cooperative cancel. Returns false for unknown or already-terminal
    /// tasks. In-flight downloads are allowed to complete.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.cancel_tokens.get(task_id) {
            Some(token) => {
                info!(task_id, "cancel requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.states.get(task_id).map(|s| s.clone())
    }

    /// Explicit user deletion. Running tasks must be canceled first.
    pub fn delete_task(&self, task_id: &str) -> Result<(), QceError> {
        if let Some(state) = self.state_of(task_id) {
            if state.status == TaskStatus::Running {
                return Err(QceError::Validation(
                    "cannot delete a running task; cancel it first".into(),
                ));
            }
        }
        self.store.delete_task(task_id)?;
        self.states.remove(task_id);
        Ok(())
    }

    // --- the phase machine -------------------------------------------------

    /// Run one export to its terminal state. Used directly by the scheduler
    /// path; interactive submissions go through [`submit`](Self::submit).
    pub async fn execute(
        self: &Arc<Self>,
        task: ExportTask,
    ) -> Result<ExportOutcome, QceError> {
        let task_id = task.task_id.clone();
        let token = CancellationToken::new();
        self.cancel_tokens.insert(task_id.clone(), token.clone());
        let started = Instant::now();

        let mut state = TaskState::new(&task_id);
        state.status = TaskStatus::Running;
        state.start_time = Some(Utc::now());

        // init: the task must exist durably before any work starts.
        if let Err(e) = self.store.upsert_task(&task, &state) {
            self.cancel_tokens.remove(&task_id);
            let err: QceError = e.into();
            self.emit_terminal_error(&task_id, &state, &err);
            return Err(err);
        }
        self.states.insert(task_id.clone(), state.clone());
        self.emit_progress(&state, Some("export started".into()));

        let result = self.run_phases(&task, &mut state, &token).await;

        let elapsed = started.elapsed().as_secs_f64();
        state.end_time = Some(Utc::now());
        if elapsed > 0.0 {
            state.speed_mps = state.processed_messages as f64 / elapsed;
        }

        match &result {
            Ok(outcome) => {
                state.status = TaskStatus::Completed;
                state.set_progress(100);
                state.error = None;
                // Terminal persistence failures fail the task.
                if let Err(e) = self.store.update_state(&state) {
                    let err: QceError = e.into();
                    state.status = TaskStatus::Failed;
                    state.error = Some(format!("{}: {err}", err.code()));
                    let _ = self.store.update_state(&state);
                    self.emit_terminal_error(&task_id, &state, &err);
                } else {
                    let first = outcome.artifacts.first();
                    self.emit(
                        EVENT_EXPORT_COMPLETE,
                        ExportEventData {
                            task_id: task_id.clone(),
                            status: state.status.to_string(),
                            progress: 100,
                            message_count: Some(outcome.message_count),
                            file_name: first.map(|a| a.file_name.clone()),
                            file_size: first.map(|a| a.file_size),
                            download_url: first.map(|a| format!("/exports/{}", a.file_name)),
                            ..Default::default()
                        },
                    );
                    info!(task_id, messages = outcome.message_count, "export completed");
                }
            }
            Err(QceError::Canceled) => {
                state.status = TaskStatus::Canceled;
                state.error = Some("canceled".into());
                if let Err(e) = self.store.update_state(&state) {
                    warn!(task_id, "could not persist canceled state: {e}");
                }
                self.emit(
                    EVENT_EXPORT_ERROR,
                    ExportEventData {
                        task_id: task_id.clone(),
                        status: state.status.to_string(),
                        progress: state.progress,
                        message: Some("canceled".into()),
                        ..Default::default()
                    },
                );
                info!(task_id, "export canceled");
            }
            Err(e) => {
                state.status = TaskStatus::Failed;
                state.error = Some(format!("{}: {e}", e.code()));
                if let Err(pe) = self.store.update_state(&state) {
                    warn!(task_id, "could not persist failed state: {pe}");
                }
                self.emit_terminal_error(&task_id, &state, e);
                error!(task_id, error = %e, "export failed");
            }
        }

        self.states.insert(task_id.clone(), state);
        self.cancel_tokens.remove(&task_id);
        result
    }

    async fn run_phases(
        self: &Arc<Self>,
        task: &ExportTask,
        state: &mut TaskState,
        token: &CancellationToken,
    ) -> Result<ExportOutcome, QceError> {
        // fetch: 0 → 50
        let mut fetcher = MessageFetcher::new(
            Arc::clone(&self.bridge),
            task.chat.clone(),
            task.filter.clone(),
            token.clone(),
        )
        .with_batch_size(task.batch_size)
        .with_timeout_ms(task.timeout_ms)
        .with_retry_count(task.retry_count);

        let mut buffer = Vec::new();
        let mut batches: u64 = 0;
        while let Some(batch) = fetcher.next_batch().await? {
            batches += 1;
            state.current_message_id = batch.first().map(|m| m.msg_id.clone());
            buffer.extend(batch);
            state.set_processed(buffer.len() as u64);
            state.set_progress((batches * 10).min(50) as u8);
            self.emit_progress(state, Some(format!("fetched {} messages", buffer.len())));
        }
        if token.is_cancelled() {
            return Err(QceError::Canceled);
        }
        state.total_messages = buffer.len() as u64;

        // parse: 50 → 60
        state.set_progress(50);
        self.emit_progress(state, Some("parsing messages".into()));
        let parser = Arc::new(MessageParser::new());
        let mut parsed = parser.parse_batch(buffer).await;
        let failures = parsed
            .iter()
            .filter(|m| m.content.special.iter().any(|s| s.kind == "error_message"))
            .count() as u64;
        state.failure_count = failures;
        state.success_count = parsed.len() as u64 - failures;
        state.set_processed(parsed.len() as u64);
        state.set_progress(60);
        self.emit_progress(state, Some("parsing complete".into()));
        if token.is_cancelled() {
            return Err(QceError::Canceled);
        }

        // download: 60 → 85
        let resource_map = self.download_resources(task, &parsed, state).await;
        state.set_progress(85);
        self.emit_progress(state, Some("resource downloads settled".into()));
        if token.is_cancelled() {
            // In-flight downloads already completed above; stop before any
            // artifact exists.
            return Err(QceError::Canceled);
        }

        // serialize: 85 → 100
        update_resource_paths(&mut parsed, &resource_map);
        let artifacts = self.serialize(task, &parsed).await?;
        state.set_progress(100);

        Ok(ExportOutcome {
            message_count: parsed.len() as u64,
            artifacts,
        })
    }

    async fn download_resources(
        self: &Arc<Self>,
        task: &ExportTask,
        parsed: &[ParsedMessage],
        state: &mut TaskState,
    ) -> HashMap<String, Vec<ResourceInfo>> {
        let referenced: usize = parsed.iter().map(|m| m.content.resources.len()).sum();
        if referenced == 0 {
            return HashMap::new();
        }
        let handler = Arc::new(
            ResourceHandler::new(
                Arc::clone(&self.bridge),
                Arc::clone(&self.resource_store),
                Arc::clone(&self.store),
                task.chat.clone(),
            )
            .with_limits(
                self.config.max_concurrent_downloads,
                self.config.download_timeout_ms,
                MAX_DOWNLOAD_RETRIES,
            ),
        );
        handler.process(parsed);
        let pending = handler.pending_count();
        if pending > 0 {
            self.emit_progress(state, Some(format!("downloading {pending} resources")));
        }
        handler
            .wait_for_all_downloads(Duration::from_secs(self.config.download_stall_secs))
            .await
    }

    async fn serialize(
        &self,
        task: &ExportTask,
        parsed: &[ParsedMessage],
    ) -> Result<Vec<ExportArtifact>, QceError> {
        let dir = PathBuf::from(&task.output_dir);
        tokio::fs::create_dir_all(&dir).await?;

        let opts = ExportOptions {
            chat_name: task.chat_name.clone(),
            chat_type: task.chat.chat_type,
            window: task.filter.window,
            pretty_json: false,
            include_system_messages: true,
            include_resource_links: task.include_resource_links,
            stamp_ms: Utc::now().timestamp_millis(),
        };
        // The fetch contract gives `parsed` newest-first; TXT/HTML read time
        // forward.
        let ascending: Vec<ParsedMessage> = parsed.iter().rev().cloned().collect();

        let mut artifacts: Vec<ExportArtifact> = Vec::new();
        for format in &task.formats {
            let mut exporter = create_exporter(*format, &dir, &opts)
                .await
                .map_err(QceError::from)?;
            let data = match format {
                qce_core::task::ExportFormat::Json => parsed,
                _ => &ascending[..],
            };
            match write_all(&mut exporter, data, task.batch_size).await {
                Ok(()) => artifacts.push(exporter.finish().await.map_err(QceError::from)?),
                Err(e) => {
                    exporter.abort().await;
                    // No partial publication: drop artifacts finished earlier
                    // in this loop too.
                    for artifact in &artifacts {
                        let _ = tokio::fs::remove_file(&artifact.path).await;
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(artifacts)
    }

    // --- scheduled exports -------------------------------------------------

    /// Execute one scheduler firing and record its outcome atomically with
    /// the `last_run`/`next_run` advance.
    pub async fn run_fired(self: &Arc<Self>, fired: FiredExport) {
        let sched = fired.schedule;
        let chat_name = self
            .bridge
            .resolve_display_name(&sched.chat)
            .await
            .unwrap_or_else(|_| sched.chat.peer_uid.clone());

        let now = Utc::now();
        let started = Instant::now();
        let task = ExportTask {
            task_id: ExportTask::generate_id(),
            chat: sched.chat.clone(),
            chat_name,
            formats: vec![sched.format],
            filter: qce_core::task::MessageFilter {
                window: fired.window,
                ..Default::default()
            },
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            include_resource_links: true,
            output_dir: self.config.exports_dir.display().to_string(),
            created_at: now,
            updated_at: now,
        };

        let result = self.execute(task).await;
        let history = match &result {
            Ok(outcome) => ExecutionHistory {
                id: Uuid::now_v7().to_string(),
                scheduled_export_id: sched.id.clone(),
                executed_at: now,
                status: ExecutionStatus::Success,
                message_count: Some(outcome.message_count),
                file_path: outcome
                    .artifacts
                    .first()
                    .map(|a| a.path.display().to_string()),
                file_size: outcome.artifacts.first().map(|a| a.file_size),
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => ExecutionHistory {
                id: Uuid::now_v7().to_string(),
                scheduled_export_id: sched.id.clone(),
                executed_at: now,
                status: ExecutionStatus::Failed,
                message_count: None,
                file_path: None,
                file_size: None,
                error: Some(e.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };
        if let Err(e) = self.store.complete_run(&history, fired.next_run) {
            error!(schedule = %sched.id, "could not record scheduled run: {e}");
        }
    }

    // --- events ------------------------------------------------------------

    fn emit(&self, kind: &str, data: ExportEventData) {
        let _ = self.events.send(WsEvent::new(kind, data).to_json());
    }

    fn emit_progress(&self, state: &TaskState, message: Option<String>) {
        // Best-effort persistence; must never block the pipeline.
        self.progress.send(state.clone());
        self.states.insert(state.task_id.clone(), state.clone());
        self.emit(
            EVENT_EXPORT_PROGRESS,
            ExportEventData {
                task_id: state.task_id.clone(),
                status: state.status.to_string(),
                progress: state.progress,
                message,
                message_count: Some(state.processed_messages),
                ..Default::default()
            },
        );
    }

    fn emit_terminal_error(&self, task_id: &str, state: &TaskState, error: &QceError) {
        self.emit(
            EVENT_EXPORT_ERROR,
            ExportEventData {
                task_id: task_id.to_string(),
                status: state.status.to_string(),
                progress: state.progress,
                message: Some(format!("{}: {error}", error.code())),
                ..Default::default()
            },
        );
    }
}

fn validate(task: &ExportTask) -> Result<(), QceError> {
    if task.chat.peer_uid.is_empty() {
        return Err(QceError::Validation("chat peer uid is empty".into()));
    }
    if task.formats.is_empty() {
        return Err(QceError::Validation("at least one export format required".into()));
    }
    if task.batch_size == 0 {
        return Err(QceError::Validation("batch size must be positive".into()));
    }
    Ok(())
}

async fn write_all(
    exporter: &mut Box<dyn Exporter>,
    data: &[ParsedMessage],
    chunk: usize,
) -> qce_exporters::Result<()> {
    for part in data.chunks(chunk.max(1)) {
        exporter.write_batch(part).await?;
    }
    Ok(())
}

/// Drain scheduler firings into the engine, one at a time.
pub fn spawn_fired_consumer(
    engine: Arc<ExportEngine>,
    mut rx: mpsc::Receiver<FiredExport>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fired) = rx.recv().await {
            engine.run_fired(fired).await;
        }
    })
}
