use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use qce_core::resource::ResourceInfo;
use qce_core::ChatRef;

const MIB: i64 = 1024 * 1024;

/// One unit of download work.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub resource: ResourceInfo,
    /// Message the resource belongs to — needed for the bridge call.
    pub msg_id: String,
    pub chat: ChatRef,
    pub attempts: u32,
}

/// Queue priority: media type bonus plus a small-file bonus, so cheap
/// visible things (images, short audio) come back first.
pub fn priority(resource: &ResourceInfo) -> i32 {
    let mut p = resource.resource_type.priority_bonus();
    if resource.file_size < MIB {
        p += 20;
    } else if resource.file_size < 10 * MIB {
        p += 10;
    }
    p
}

struct Entry {
    priority: i32,
    /// Insertion counter; lower = earlier. Breaks priority ties FIFO.
    seq: u64,
    task: DownloadTask,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier insertion.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority download queue with a retry lane.
///
/// Retried tasks jump the whole queue (`push_front`) so a flaky resource is
/// resolved — one way or the other — before new work starts.
#[derive(Default)]
pub struct DownloadQueue {
    heap: BinaryHeap<Entry>,
    retries: VecDeque<DownloadTask>,
    next_seq: u64,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: DownloadTask) {
        let entry = Entry {
            priority: priority(&task.resource),
            seq: self.next_seq,
            task,
        };
        self.next_seq += 1;
        self.heap.push(entry);
    }

    /// Head-of-queue requeue for a failed attempt.
    pub fn push_front(&mut self, task: DownloadTask) {
        self.retries.push_back(task);
    }

    pub fn pop(&mut self) -> Option<DownloadTask> {
        if let Some(t) = self.retries.pop_front() {
            return Some(t);
        }
        self.heap.pop().map(|e| e.task)
    }

    pub fn len(&self) -> usize {
        self.heap.len() + self.retries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty() && self.retries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<DownloadTask> {
        let mut out: Vec<DownloadTask> = self.retries.drain(..).collect();
        while let Some(e) = self.heap.pop() {
            out.push(e.task);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qce_core::resource::ResourceType;

    fn task(rt: ResourceType, size: i64, name: &str) -> DownloadTask {
        let mut resource = ResourceInfo::new(rt, name);
        resource.file_size = size;
        DownloadTask {
            resource,
            msg_id: "m".into(),
            chat: ChatRef::group("g"),
            attempts: 0,
        }
    }

    #[test]
    fn images_beat_videos_and_small_beats_large() {
        let mut q = DownloadQueue::new();
        q.push(task(ResourceType::Video, 50 * MIB, "big.mp4")); // 30
        q.push(task(ResourceType::Image, 100, "small.png")); // 120
        q.push(task(ResourceType::File, 5 * MIB, "doc.pdf")); // 20
        q.push(task(ResourceType::Audio, 100, "voice.amr")); // 70

        let order: Vec<String> = std::iter::from_fn(|| q.pop())
            .map(|t| t.resource.file_name)
            .collect();
        assert_eq!(order, vec!["small.png", "voice.amr", "big.mp4", "doc.pdf"]);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut q = DownloadQueue::new();
        q.push(task(ResourceType::Image, 100, "first.png"));
        q.push(task(ResourceType::Image, 100, "second.png"));
        assert_eq!(q.pop().unwrap().resource.file_name, "first.png");
        assert_eq!(q.pop().unwrap().resource.file_name, "second.png");
    }

    #[test]
    fn retries_jump_the_queue() {
        let mut q = DownloadQueue::new();
        q.push(task(ResourceType::Image, 100, "a.png"));
        let mut retry = task(ResourceType::File, 50 * MIB, "slow.bin");
        retry.attempts = 1;
        q.push_front(retry);
        assert_eq!(q.pop().unwrap().resource.file_name, "slow.bin");
    }
}
