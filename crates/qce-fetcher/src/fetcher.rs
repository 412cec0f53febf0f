use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use qce_bridge::Bridge;
use qce_core::config::{DEFAULT_BATCH_SIZE, DEFAULT_RETRY_COUNT, DEFAULT_TIMEOUT_MS, INTER_CALL_DELAY_MS};
use qce_core::message::RawMessage;
use qce_core::task::MessageFilter;
use qce_core::ChatRef;

use crate::error::{FetchError, Result};
use crate::filter;
use crate::retry::call_with_retry;
use crate::stats::{FetcherStats, StatsSnapshot};
use crate::strategy::FetchStrategy;

/// Pagination cursor: the earliest message seen so far.
#[derive(Debug, Clone)]
struct Anchor {
    msg_id: String,
    msg_seq: i64,
    time_ms: i64,
}

/// Batch iterator over one chat's history, newest-to-oldest.
///
/// Not re-entrant: one instance serves exactly one export. Call
/// [`next_batch`](MessageFetcher::next_batch) until it returns `Ok(None)`;
/// cancellation also ends the iteration cleanly with `Ok(None)`.
pub struct MessageFetcher {
    bridge: Arc<dyn Bridge>,
    chat: ChatRef,
    filter: MessageFilter,
    batch_size: usize,
    timeout_ms: u64,
    retry_count: u32,
    cancel: CancellationToken,
    strategy: FetchStrategy,
    anchor: Option<Anchor>,
    /// Next inclusive upper sequence bound for the range walk.
    seq_cursor: Option<i64>,
    first_call: bool,
    done: bool,
    stats: FetcherStats,
}

impl MessageFetcher {
    pub fn new(
        bridge: Arc<dyn Bridge>,
        chat: ChatRef,
        filter: MessageFilter,
        cancel: CancellationToken,
    ) -> Self {
        let strategy = FetchStrategy::select(&chat, &filter);
        info!(chat = %chat, ?strategy, "fetcher created");
        Self {
            bridge,
            chat,
            filter,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            cancel,
            strategy,
            anchor: None,
            seq_cursor: None,
            first_call: true,
            done: false,
            stats: FetcherStats::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Pull the next filtered batch. `Ok(None)` means the iteration is over —
    /// history exhausted, the window's lower bound passed, or cancellation.
    ///
    /// Pages whose messages are entirely filtered out are skipped internally,
    /// so a returned batch is never empty.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RawMessage>>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                debug!(chat = %self.chat, "fetch canceled");
                self.done = true;
                return Ok(None);
            }

            if !self.first_call {
                // Yield between calls so concurrent exports interleave and the
                // bridge is not hammered.
                tokio::time::sleep(Duration::from_millis(INTER_CALL_DELAY_MS)).await;
            }

            let started = Instant::now();
            let mut batch = match self.fetch_page().await {
                Ok(v) => {
                    self.stats.record_success(started.elapsed().as_millis() as u64);
                    v
                }
                Err(FetchError::Canceled) => {
                    self.done = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.stats.record_failure();
                    return Err(e);
                }
            };
            self.first_call = false;

            if batch.is_empty() {
                self.done = true;
                return Ok(None);
            }

            // Contract order: newest-to-oldest by (time, seq).
            batch.sort_by(|a, b| {
                b.time_millis()
                    .cmp(&a.time_millis())
                    .then(b.msg_seq.cmp(&a.msg_seq))
            });

            if let Some(a) = &self.anchor {
                // Loop guard: upstream handed back the same head.
                if batch.last().is_some_and(|m| m.msg_id == a.msg_id) {
                    debug!(anchor = %a.msg_id, "anchor did not advance, terminating");
                    self.done = true;
                    return Ok(None);
                }
                // History pages may include the anchor itself; keep only
                // strictly-older messages.
                let (at, aseq) = (a.time_ms, a.msg_seq);
                batch.retain(|m| {
                    let t = m.time_millis();
                    t < at || (t == at && m.msg_seq < aseq)
                });
                if batch.is_empty() {
                    self.done = true;
                    return Ok(None);
                }
            }

            let earliest = batch.last().expect("non-empty batch");
            let earliest_time = earliest.time_millis();
            // A short page ends the history walk; the range walk tolerates
            // sparse pages (sequence gaps) and only stops on an empty range
            // or a spent cursor.
            let exhausted = batch.len() < self.batch_size
                && self.strategy == FetchStrategy::TimeSequential;
            let below_window = self.filter.window.start_ms != 0
                && earliest_time < self.filter.window.start_ms;

            self.anchor = Some(Anchor {
                msg_id: earliest.msg_id.clone(),
                msg_seq: earliest.msg_seq,
                time_ms: earliest_time,
            });
            if self.strategy == FetchStrategy::SeqRange {
                self.seq_cursor = Some(earliest.msg_seq - 1);
            }

            let filtered = filter::apply(&self.filter, batch);

            if filtered.is_empty() && below_window {
                // Defensive early stop: nothing survived the filter and the
                // page already reaches past the window start.
                self.done = true;
                return Ok(None);
            }
            if exhausted || below_window {
                self.done = true;
            }
            if self.seq_cursor.is_some_and(|c| c <= 0) {
                self.done = true;
            }
            if !filtered.is_empty() {
                return Ok(Some(filtered));
            }
            if self.done {
                return Ok(None);
            }
            // Entire page filtered out — keep walking.
        }
    }

    async fn fetch_page(&self) -> Result<Vec<RawMessage>> {
        match self.strategy {
            FetchStrategy::TimeSequential => self.fetch_history_page().await,
            FetchStrategy::SeqRange => self.fetch_seq_page().await,
        }
    }

    async fn fetch_history_page(&self) -> Result<Vec<RawMessage>> {
        let bridge = Arc::clone(&self.bridge);
        let chat = self.chat.clone();
        let count = self.batch_size;
        match &self.anchor {
            None => {
                call_with_retry(
                    "getLatestMessages",
                    self.retry_count,
                    self.timeout_ms,
                    &self.cancel,
                    move || {
                        let bridge = Arc::clone(&bridge);
                        let chat = chat.clone();
                        async move { bridge.get_latest_messages(&chat, count).await }
                    },
                )
                .await
            }
            Some(a) => {
                let anchor_id = a.msg_id.clone();
                call_with_retry(
                    "getMessageHistory",
                    self.retry_count,
                    self.timeout_ms,
                    &self.cancel,
                    move || {
                        let bridge = Arc::clone(&bridge);
                        let chat = chat.clone();
                        let anchor_id = anchor_id.clone();
                        async move {
                            bridge
                                .get_message_history(&chat, &anchor_id, count, true)
                                .await
                        }
                    },
                )
                .await
            }
        }
    }

    async fn fetch_seq_page(&self) -> Result<Vec<RawMessage>> {
        let bridge = Arc::clone(&self.bridge);
        let chat = self.chat.clone();
        let count = self.batch_size;
        match self.seq_cursor {
            // No cursor yet — take the newest page to learn the head sequence.
            None => {
                call_with_retry(
                    "getLatestMessages",
                    self.retry_count,
                    self.timeout_ms,
                    &self.cancel,
                    move || {
                        let bridge = Arc::clone(&bridge);
                        let chat = chat.clone();
                        async move { bridge.get_latest_messages(&chat, count).await }
                    },
                )
                .await
            }
            Some(seq_end) if seq_end > 0 => {
                let seq_start = (seq_end - count as i64 + 1).max(1);
                call_with_retry(
                    "getMessagesBySeqRange",
                    self.retry_count,
                    self.timeout_ms,
                    &self.cancel,
                    move || {
                        let bridge = Arc::clone(&bridge);
                        let chat = chat.clone();
                        async move {
                            bridge
                                .get_messages_by_seq_range(&chat, seq_start, seq_end)
                                .await
                        }
                    },
                )
                .await
            }
            Some(_) => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qce_bridge::{BridgeError, FriendEntry, GroupEntry, MediaDownloadRequest};
    use qce_core::message::MessageElement;
    use qce_core::TimeWindow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn msg(id: &str, seq: i64, time_secs: i64) -> RawMessage {
        RawMessage {
            msg_id: id.to_string(),
            msg_seq: seq,
            msg_time: time_secs,
            sender_uid: "u1".to_string(),
            elements: vec![MessageElement::text(format!("body of {id}"))],
            ..Default::default()
        }
    }

    /// Scripted bridge over a fixed, newest-first message log.
    struct MockBridge {
        /// All messages, newest first.
        log: Vec<RawMessage>,
        call_count: AtomicU32,
        /// When set, every history call returns this fixed page.
        stuck_page: Option<Vec<RawMessage>>,
        /// Errors returned before the log starts answering.
        failures: Mutex<Vec<BridgeError>>,
    }

    impl MockBridge {
        fn new(mut log: Vec<RawMessage>) -> Self {
            log.sort_by(|a, b| b.msg_time.cmp(&a.msg_time).then(b.msg_seq.cmp(&a.msg_seq)));
            Self {
                log,
                call_count: AtomicU32::new(0),
                stuck_page: None,
                failures: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }

        fn take_failure(&self) -> Option<BridgeError> {
            self.failures.lock().unwrap().pop()
        }
    }

    #[async_trait]
    impl Bridge for MockBridge {
        async fn list_groups(&self) -> qce_bridge::Result<Vec<GroupEntry>> {
            Ok(Vec::new())
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
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            Ok(self.log.iter().take(count).cloned().collect())
        }

        async fn get_message_history(
            &self,
            _chat: &ChatRef,
            anchor_msg_id: &str,
            count: usize,
            _forward: bool,
        ) -> qce_bridge::Result<Vec<RawMessage>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.take_failure() {
                return Err(e);
            }
            if let Some(page) = &self.stuck_page {
                return Ok(page.clone());
            }
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
            self.call_count.fetch_add(1, Ordering::SeqCst);
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

    fn nine_messages() -> Vec<RawMessage> {
        (1..=9)
            .map(|i| msg(&format!("M{i}"), 100 + i, 1_700_000_000 + i * 10))
            .collect()
    }

    fn collect_ids(batches: &[Vec<RawMessage>]) -> Vec<String> {
        batches
            .iter()
            .flatten()
            .map(|m| m.msg_id.clone())
            .collect()
    }

    async fn drain(fetcher: &mut MessageFetcher) -> Vec<Vec<RawMessage>> {
        let mut out = Vec::new();
        while let Some(batch) = fetcher.next_batch().await.unwrap() {
            out.push(batch);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn paginates_newest_to_oldest_until_exhausted() {
        let bridge = Arc::new(MockBridge::new(nine_messages()));
        let mut fetcher = MessageFetcher::new(
            Arc::clone(&bridge) as Arc<dyn Bridge>,
            ChatRef::private("u1"),
            MessageFilter::default(),
            CancellationToken::new(),
        )
        .with_batch_size(3);

        let batches = drain(&mut fetcher).await;
        assert_eq!(batches.len(), 3);
        // Newest-to-oldest across the whole run.
        assert_eq!(
            collect_ids(&batches),
            vec!["M9", "M8", "M7", "M6", "M5", "M4", "M3", "M2", "M1"]
        );
        // Anchor step: every batch's earliest is strictly older than the last.
        for pair in batches.windows(2) {
            let prev_earliest = pair[0].last().unwrap().time_millis();
            let next_newest = pair[1].first().unwrap().time_millis();
            assert!(next_newest < prev_earliest);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batch_size_one_yields_same_message_set() {
        let bridge = Arc::new(MockBridge::new(nine_messages()));
        let mut fetcher = MessageFetcher::new(
            bridge,
            ChatRef::private("u1"),
            MessageFilter::default(),
            CancellationToken::new(),
        )
        .with_batch_size(1);

        let batches = drain(&mut fetcher).await;
        assert_eq!(
            collect_ids(&batches),
            vec!["M9", "M8", "M7", "M6", "M5", "M4", "M3", "M2", "M1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn loop_guard_terminates_on_repeated_head() {
        let mut bridge = MockBridge::new(nine_messages());
        // Upstream misbehaves: history calls always return the newest page.
        bridge.stuck_page = Some(bridge.log.iter().take(3).cloned().collect());
        let bridge = Arc::new(bridge);
        let mut fetcher = MessageFetcher::new(
            Arc::clone(&bridge) as Arc<dyn Bridge>,
            ChatRef::private("u1"),
            MessageFilter::default(),
            CancellationToken::new(),
        )
        .with_batch_size(3);

        let batches = drain(&mut fetcher).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(bridge.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn early_stop_below_window_start() {
        let bridge = Arc::new(MockBridge::new(nine_messages()));
        let mut filter = MessageFilter::default();
        // Window entirely in the future relative to the log.
        filter.window =
            TimeWindow::new(1_800_000_000_000, 1_900_000_000_000).unwrap();
        let mut fetcher = MessageFetcher::new(
            Arc::clone(&bridge) as Arc<dyn Bridge>,
            ChatRef::private("u1"),
            filter,
            CancellationToken::new(),
        )
        .with_batch_size(3);

        let batches = drain(&mut fetcher).await;
        assert!(batches.is_empty());
        // First page already reached below window start — exactly one call.
        assert_eq!(bridge.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_iteration_cleanly() {
        let bridge = Arc::new(MockBridge::new(nine_messages()));
        let cancel = CancellationToken::new();
        let mut fetcher = MessageFetcher::new(
            bridge,
            ChatRef::private("u1"),
            MessageFilter::default(),
            cancel.clone(),
        )
        .with_batch_size(3);

        let first = fetcher.next_batch().await.unwrap();
        assert!(first.is_some());
        cancel.cancel();
        let second = fetcher.next_batch().await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn seq_range_walk_covers_same_set() {
        let bridge = Arc::new(MockBridge::new(nine_messages()));
        let mut fetcher = MessageFetcher::new(
            Arc::clone(&bridge) as Arc<dyn Bridge>,
            ChatRef::group("g1"),
            MessageFilter::default(),
            CancellationToken::new(),
        )
        .with_batch_size(4);

        assert_eq!(fetcher.strategy(), FetchStrategy::SeqRange);
        let batches = drain(&mut fetcher).await;
        let mut ids = collect_ids(&batches);
        ids.sort();
        let mut expected: Vec<String> = (1..=9).map(|i| format!("M{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_and_counts() {
        let bridge = MockBridge::new(nine_messages());
        bridge
            .failures
            .lock()
            .unwrap()
            .push(BridgeError::TransientNetwork("hiccup".into()));
        let bridge = Arc::new(bridge);
        let mut fetcher = MessageFetcher::new(
            Arc::clone(&bridge) as Arc<dyn Bridge>,
            ChatRef::private("u1"),
            MessageFilter::default(),
            CancellationToken::new(),
        )
        .with_batch_size(9);

        let batches = drain(&mut fetcher).await;
        assert_eq!(collect_ids(&batches).len(), 9);
        let stats = fetcher.stats();
        assert_eq!(stats.failure_count, 0); // retry succeeded inside the call
        assert!(stats.success_count >= 1);
    }
}
