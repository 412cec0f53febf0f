//! End-to-end engine tests against a scripted bridge.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use qce_bridge::{Bridge, BridgeError, FriendEntry, GroupEntry, MediaDownloadRequest};
use qce_core::message::{MessageElement, RawMessage};
use qce_core::task::{ExportFormat, ExportTask, MessageFilter, TaskStatus};
use qce_core::{ChatRef, TimeWindow};
use qce_engine::{EngineConfig, ExportEngine};
use qce_resources::ResourceStore;
use qce_store::TaskStore;

struct MockBridge {
    /// Newest first.
    log: Vec<RawMessage>,
}

impl MockBridge {
    fn new(mut log: Vec<RawMessage>) -> Self {
        log.sort_by(|a, b| b.msg_time.cmp(&a.msg_time).then(b.msg_seq.cmp(&a.msg_seq)));
        Self { log }
    }
}

#[async_trait]
impl Bridge for MockBridge {
    async fn list_groups(&self) -> qce_bridge::Result<Vec<GroupEntry>> {
        Ok(vec![GroupEntry {
            group_code: "g1".into(),
            group_name: "test group".into(),
            member_count: Some(3),
        }])
    }
    async fn list_friends(&self) -> qce_bridge::Result<Vec<FriendEntry>> {
        Ok(Vec::new())
    }
    async fn resolve_display_name(&self, chat: &ChatRef) -> qce_bridge::Result<String> {
        Ok(chat.peer_uid.clone())
    }
    async fn get_latest_messages(
        &self,
        _chat: &ChatRef,
        count: usize,
    ) -> qce_bridge::Result<Vec<RawMessage>> {
        Ok(self.log.iter().take(count).cloned().collect())
    }
    async fn get_message_history(
        &self,
        _chat: &ChatRef,
        anchor_msg_id: &str,
        count: usize,
        _forward: bool,
    ) -> qce_bridge::Result<Vec<RawMessage>> {
        let pos = self.log.iter().position(|m| m.msg_id == anchor_msg_id);
        Ok(match pos {
            Some(p) => self.log.iter().skip(p + 1).take(count).cloned().collect(),
            None => Vec::new(),
        })
    }
    async fn get_messages_by_seq_range(
        &self,
        _chat: &ChatRef,
        seq_start: i64,
        seq_end: i64,
    ) -> qce_bridge::Result<Vec<RawMessage>> {
        Ok(self
            .log
            .iter()
            .filter(|m| m.msg_seq >= seq_start && m.msg_seq <= seq_end)
            .cloned()
            .collect())
    }
    async fn download_media(
        &self,
        _req: &MediaDownloadRequest,
    ) -> qce_bridge::Result<Option<String>> {
        Ok(None)
    }
    async fn resolve_ptt_url(
        &self,
        _peer_uid: &str,
        _file_uuid: &str,
        _timeout_ms: u64,
    ) -> qce_bridge::Result<String> {
        Err(BridgeError::NotFound("no ptt".into()))
    }
}

fn msg(id: &str, seq: i64, time_secs: i64, text: &str) -> RawMessage {
    RawMessage {
        msg_id: id.to_string(),
        msg_seq: seq,
        msg_time: time_secs,
        sender_uid: "u1".to_string(),
        send_nick_name: Some("alice".to_string()),
        elements: vec![MessageElement::text(text)],
        ..Default::default()
    }
}

struct Harness {
    engine: Arc<ExportEngine>,
    exports_dir: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn harness(log: Vec<RawMessage>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let exports_dir = dir.path().join("exports");
    let engine = ExportEngine::new(
        Arc::new(MockBridge::new(log)),
        Arc::new(TaskStore::open_in_memory().unwrap()),
        Arc::new(ResourceStore::new(dir.path().join("resources")).unwrap()),
        EngineConfig {
            exports_dir: exports_dir.clone(),
            ..Default::default()
        },
    );
    Harness {
        engine,
        exports_dir,
        _dir: dir,
    }
}

fn task(formats: Vec<ExportFormat>, window: TimeWindow, output_dir: &std::path::Path) -> ExportTask {
    let now = Utc::now();
    ExportTask {
        task_id: ExportTask::generate_id(),
        chat: ChatRef::group("g1"),
        chat_name: "test group".into(),
        formats,
        filter: MessageFilter {
            window,
            ..Default::default()
        },
        batch_size: 10,
        timeout_ms: 5_000,
        retry_count: 1,
        include_resource_links: true,
        output_dir: output_dir.display().to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn three_messages() -> Vec<RawMessage> {
    vec![
        msg("M100", 100, 1_700_000_010, "first"),
        msg("M101", 101, 1_700_000_020, "second"),
        msg("M102", 102, 1_700_000_030, "third"),
    ]
}

#[tokio::test(start_paused = true)]
async fn group_export_to_json_preserves_upstream_order() {
    let h = harness(three_messages());
    let window = TimeWindow::new(1_700_000_000_000, 1_700_086_400_000).unwrap();
    let t = task(vec![ExportFormat::Json], window, &h.exports_dir);
    let task_id = t.task_id.clone();

    let outcome = h.engine.execute(t).await.unwrap();
    assert_eq!(outcome.message_count, 3);

    let artifact = &outcome.artifacts[0];
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.path).unwrap()).unwrap();
    let messages = value["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    // Upstream order: newest first, seconds promoted to millis.
    assert_eq!(messages[0]["messageId"], "M102");
    assert_eq!(messages[0]["timestamp"], 1_700_000_030_000i64);
    assert_eq!(messages[2]["messageId"], "M100");

    let state = h.engine.state_of(&task_id).unwrap();
    assert_eq!(state.status, TaskStatus::Completed);
    assert_eq!(state.progress, 100);
    assert!(state.processed_messages <= state.total_messages);
}

#[tokio::test(start_paused = true)]
async fn txt_renders_ascending_timestamps() {
    let h = harness(three_messages());
    let t = task(
        vec![ExportFormat::Txt],
        TimeWindow::unbounded(),
        &h.exports_dir,
    );
    let outcome = h.engine.execute(t).await.unwrap();
    let text = std::fs::read_to_string(&outcome.artifacts[0].path).unwrap();
    let first = text.find("first").unwrap();
    let third = text.find("third").unwrap();
    assert!(first < third, "TXT must read oldest to newest");
}

#[tokio::test(start_paused = true)]
async fn empty_window_completes_with_zero_messages() {
    let h = harness(three_messages());
    // Window entirely after the log.
    let window = TimeWindow::new(1_900_000_000_000, 1_900_086_400_000).unwrap();
    let t = task(vec![ExportFormat::Json], window, &h.exports_dir);
    let task_id = t.task_id.clone();

    let outcome = h.engine.execute(t).await.unwrap();
    assert_eq!(outcome.message_count, 0);
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&outcome.artifacts[0].path).unwrap())
            .unwrap();
    assert_eq!(value["messages"].as_array().unwrap().len(), 0);
    assert_eq!(value["meta"]["counts"]["messages"], 0);
    assert_eq!(
        h.engine.state_of(&task_id).unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_fetch_publishes_nothing() {
    // 60 messages, batch size 5 → 12 pages with 100 ms gaps.
    let log: Vec<RawMessage> = (1..=60)
        .map(|i| msg(&format!("M{i}"), i, 1_700_000_000 + i * 10, "x"))
        .collect();
    let h = harness(log);
    let mut t = task(
        vec![ExportFormat::Json],
        TimeWindow::unbounded(),
        &h.exports_dir,
    );
    t.batch_size = 5;
    let task_id = t.task_id.clone();

    let mut events = h.engine.subscribe();
    let task_id_submit = h.engine.submit(t).unwrap();
    assert_eq!(task_id_submit, task_id);

    // Cancel after the second progress event, then wait for the terminal one.
    let mut progress_seen = 0;
    let terminal = loop {
        let event = events.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&event).unwrap();
        match value["type"].as_str().unwrap() {
            "export_progress" => {
                progress_seen += 1;
                if progress_seen == 2 {
                    assert!(h.engine.cancel(&task_id));
                }
            }
            "export_error" => break value,
            "export_complete" => panic!("export should not complete"),
            _ => {}
        }
    };

    assert_eq!(terminal["data"]["status"], "canceled");
    assert!(terminal["data"]["message"]
        .as_str()
        .unwrap()
        .contains("canceled"));

    // No artifact, not even a partial one.
    let leftovers: Vec<_> = match std::fs::read_dir(&h.exports_dir) {
        Ok(rd) => rd.collect(),
        Err(_) => Vec::new(), // directory never created
    };
    assert!(leftovers.is_empty());

    let (_, state) = h.engine.store().get_task(&task_id).unwrap().unwrap();
    assert_eq!(state.status, TaskStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn orphaned_running_tasks_fail_on_startup_without_events() {
    let h = harness(three_messages());
    let t = task(
        vec![ExportFormat::Json],
        TimeWindow::unbounded(),
        &h.exports_dir,
    );
    let task_id = t.task_id.clone();
    let mut state = qce_core::task::TaskState::new(&task_id);
    state.status = TaskStatus::Running;
    h.engine.store().upsert_task(&t, &state).unwrap();

    let mut events = h.engine.subscribe();
    let orphaned = h.engine.load_existing_tasks().unwrap();
    assert_eq!(orphaned, 1);

    let recovered = h.engine.state_of(&task_id).unwrap();
    assert_eq!(recovered.status, TaskStatus::Failed);
    assert_eq!(recovered.error.as_deref(), Some("orphaned"));
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn invalid_tasks_are_rejected_before_creation() {
    let h = harness(three_messages());
    let mut t = task(vec![], TimeWindow::unbounded(), &h.exports_dir);
    assert!(h.engine.submit(t.clone()).is_err());
    // Nothing was persisted.
    assert!(h.engine.store().get_task(&t.task_id).unwrap().is_none());

    t.formats = vec![ExportFormat::Json];
    t.batch_size = 0;
    assert!(h.engine.submit(t).is_err());
}

#[tokio::test(start_paused = true)]
async fn multi_format_export_writes_every_artifact() {
    let h = harness(three_messages());
    let t = task(
        vec![ExportFormat::Json, ExportFormat::Txt, ExportFormat::Html],
        TimeWindow::unbounded(),
        &h.exports_dir,
    );
    let outcome = h.engine.execute(t).await.unwrap();
    assert_eq!(outcome.artifacts.len(), 3);
    for artifact in &outcome.artifacts {
        assert!(artifact.path.exists());
        assert!(artifact.file_size > 0);
    }
    // All three share one stamp, so they sort side by side.
    let names: Vec<&str> = outcome
        .artifacts
        .iter()
        .map(|a| a.file_name.rsplit_once('.').unwrap().0)
        .collect();
    assert_eq!(names[0], names[1]);
    assert_eq!(names[1], names[2]);
}
