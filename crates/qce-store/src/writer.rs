use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use qce_core::task::TaskState;

use crate::store::TaskStore;

/// Queue depth for fire-and-forget progress writes.
const PROGRESS_QUEUE: usize = 256;

/// Handle for best-effort state persistence.
///
/// `try_send` never blocks the fetch/parse loop; when the queue is full the
/// update is dropped with a warning — the next one will carry fresher numbers
/// anyway. Terminal states must NOT go through here; persist those directly
/// so failures surface.
#[derive(Clone)]
pub struct ProgressWriter {
    tx: mpsc::Sender<TaskState>,
}

impl ProgressWriter {
    pub fn send(&self, state: TaskState) {
        if self.tx.try_send(state).is_err() {
            warn!("progress write queue full, update dropped");
        }
    }
}

/// Spawn the single writer task draining progress updates into the store.
pub fn spawn_progress_writer(store: Arc<TaskStore>) -> ProgressWriter {
    let (tx, mut rx) = mpsc::channel::<TaskState>(PROGRESS_QUEUE);
    tokio::spawn(async move {
        while let Some(state) = rx.recv().await {
            if let Err(e) = store.update_state(&state) {
                warn!(task_id = %state.task_id, error = %e, "progress write failed, dropped");
            }
        }
    });
    ProgressWriter { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use qce_core::task::{ExportFormat, ExportTask, MessageFilter, TaskStatus};
    use qce_core::ChatRef;

    fn sample_task() -> (ExportTask, TaskState) {
        let id = ExportTask::generate_id();
        let now = Utc::now();
        let task = ExportTask {
            task_id: id.clone(),
            chat: ChatRef::private("u1"),
            chat_name: "writer test".into(),
            formats: vec![ExportFormat::Json],
            filter: MessageFilter::default(),
            batch_size: 100,
            timeout_ms: 30_000,
            retry_count: 3,
            include_resource_links: true,
            output_dir: "/tmp".into(),
            created_at: now,
            updated_at: now,
        };
        (task, TaskState::new(id))
    }

    #[tokio::test]
    async fn progress_updates_reach_the_store() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        // Seed a task so the state row exists.
        let (task, state) = sample_task();
        store.upsert_task(&task, &state).unwrap();

        let writer = spawn_progress_writer(Arc::clone(&store));
        let mut update = state.clone();
        update.status = TaskStatus::Running;
        update.progress = 42;
        writer.send(update);

        // Give the writer task a moment to drain.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (_, st) = store.get_task(&task.task_id).unwrap().unwrap();
        assert_eq!(st.progress, 42);
        assert_eq!(st.status, TaskStatus::Running);
    }
}
