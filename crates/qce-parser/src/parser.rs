use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinSet;
use tracing::warn;

use qce_core::config::REPLY_INDEX_CAPACITY;
use qce_core::message::{
    AtType, CalendarInfo, Element, EmojiKind, EmojiRef, LocationInfo, Mention, MessageContent,
    MessageElement, MultiForwardInfo, ParseStats, ParsedMessage, RawMessage, ReceiverInfo,
    ReplyInfo, SenderInfo, SpecialEntry,
};
use qce_core::resource::ResourceInfo;

use crate::render;
use crate::reply::{IndexedMessage, ReplyIndex};

/// Literal used when a reply cannot be resolved to a concrete message.
const UNRESOLVED_REPLY: &str = "original message";
/// Reply previews are clipped to this many chars.
const REPLY_PREVIEW_CHARS: usize = 60;
/// Cooperative yield cadence inside a parse worker.
const YIELD_EVERY: usize = 1_000;
/// Batches below this size are parsed inline — not worth the task fan-out.
const PARALLEL_THRESHOLD: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message has no id")]
    MissingId,
}

/// Worker count for batch parsing.
fn pool_size() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (2 * cpus).clamp(4, 32)
}

/// Sender display name: group card → remark → nickname → uin → uid → "unknown".
fn display_name(raw: &RawMessage) -> String {
    for candidate in [
        &raw.send_member_name,
        &raw.send_remark_name,
        &raw.send_nick_name,
        &raw.sender_uin,
    ] {
        if let Some(s) = candidate {
            if !s.is_empty() {
                return s.clone();
            }
        }
    }
    if !raw.sender_uid.is_empty() {
        raw.sender_uid.clone()
    } else {
        "unknown".to_string()
    }
}

/// Single-pass element parser producing the normalised message model.
///
/// Holds the reply-resolution LRU; one parser instance serves one export, so
/// the index never mixes chats.
pub struct MessageParser {
    reply_index: Mutex<ReplyIndex>,
    capture_raw: bool,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageParser {
    pub fn new() -> Self {
        Self::with_capacity(REPLY_INDEX_CAPACITY)
    }

    pub fn with_capacity(reply_capacity: usize) -> Self {
        Self {
            reply_index: Mutex::new(ReplyIndex::new(reply_capacity)),
            capture_raw: false,
        }
    }

    /// Keep the original bridge JSON on every parsed message (debugging aid).
    pub fn with_raw_capture(mut self) -> Self {
        self.capture_raw = true;
        self
    }

    /// Parse one raw message. Never drops input: a message-level failure
    /// yields a stub marked with an `error_message` special entry.
    pub fn parse(&self, raw: &RawMessage) -> ParsedMessage {
        match self.try_parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(msg_seq = raw.msg_seq, error = %e, "message parse failed, emitting stub");
                self.stub(raw, &e)
            }
        }
    }

    /// Parse a whole batch on the worker pool, preserving input order.
    pub async fn parse_batch(self: &Arc<Self>, batch: Vec<RawMessage>) -> Vec<ParsedMessage> {
        if batch.len() < PARALLEL_THRESHOLD {
            return batch.iter().map(|m| self.parse(m)).collect();
        }

        let workers = pool_size();
        let chunk_size = batch.len().div_ceil(workers);
        let mut chunks: Vec<Vec<RawMessage>> = Vec::with_capacity(workers);
        let mut iter = batch.into_iter();
        loop {
            let chunk: Vec<RawMessage> = iter.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        let mut set = JoinSet::new();
        for (index, chunk) in chunks.into_iter().enumerate() {
            let parser = Arc::clone(self);
            set.spawn(async move {
                let mut out = Vec::with_capacity(chunk.len());
                for (i, raw) in chunk.iter().enumerate() {
                    out.push(parser.parse(raw));
                    if (i + 1) % YIELD_EVERY == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                (index, out)
            });
        }

        let mut parts: Vec<(usize, Vec<ParsedMessage>)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(part) => parts.push(part),
                Err(e) => warn!(error = %e, "parse worker panicked, chunk lost to stubs"),
            }
        }
        parts.sort_by_key(|(i, _)| *i);
        parts.into_iter().flat_map(|(_, v)| v).collect()
    }

    /// Parse one batch and hand the result to the callback. Lets pipeline
    /// code keep a single await point per batch.
    pub async fn parse_stream<F>(self: &Arc<Self>, batch: Vec<RawMessage>, on_parsed: F)
    where
        F: FnOnce(Vec<ParsedMessage>),
    {
        let parsed = self.parse_batch(batch).await;
        on_parsed(parsed);
    }

    fn try_parse(&self, raw: &RawMessage) -> Result<ParsedMessage, ParseError> {
        if raw.msg_id.is_empty() {
            return Err(ParseError::MissingId);
        }
        let started = Instant::now();

        let mut text_chunks: Vec<String> = Vec::new();
        let mut html_chunks: Vec<String> = Vec::new();
        let mut content = MessageContent::default();
        let mut is_system = false;

        for el in &raw.elements {
            match el {
                MessageElement::Known(known) => {
                    self.parse_element(raw, known, &mut content, &mut text_chunks, &mut html_chunks);
                    if matches!(known, Element::GrayTip { .. }) {
                        is_system = true;
                    }
                }
                MessageElement::Unknown(value) => {
                    content.special.push(SpecialEntry {
                        kind: "unknown".to_string(),
                        data: value.clone(),
                    });
                    text_chunks.push("[unknown]".to_string());
                }
            }
        }

        // Chunk list join — one allocation instead of repeated concatenation.
        content.text = text_chunks.join("");
        if !html_chunks.is_empty() {
            content.html = Some(html_chunks.join(""));
        }

        let sender = SenderInfo {
            uid: raw.sender_uid.clone(),
            uin: raw.sender_uin.clone(),
            display_name: display_name(raw),
            nickname: raw.send_nick_name.clone(),
            group_card: raw.send_member_name.clone(),
            remark: raw.send_remark_name.clone(),
        };

        // Index after parse so self-replies do not resolve to the message
        // being built.
        {
            let mut index = self.reply_index.lock().unwrap();
            index.insert(raw, &sender.display_name);
        }

        let stats = ParseStats {
            element_count: raw.elements.len(),
            resource_count: content.resources.len(),
            text_length: content.text.chars().count(),
            processing_millis: started.elapsed().as_millis() as u64,
        };

        Ok(ParsedMessage {
            message_id: raw.msg_id.clone(),
            message_seq: raw.msg_seq,
            timestamp: raw.time_millis(),
            sender,
            receiver: ReceiverInfo {
                uid: raw.peer_uid.clone().unwrap_or_default(),
                chat_type: raw.chat_type,
            },
            message_type: raw.msg_type,
            is_system,
            is_recalled: raw.is_recalled(),
            is_temp: false,
            content,
            stats,
            raw_ref: if self.capture_raw {
                serde_json::to_value(raw).ok()
            } else {
                None
            },
        })
    }

    fn parse_element(
        &self,
        raw: &RawMessage,
        el: &Element,
        content: &mut MessageContent,
        text_chunks: &mut Vec<String>,
        html_chunks: &mut Vec<String>,
    ) {
        match el {
            Element::Text {
                content: text,
                at_type,
                at_uid,
            } => {
                if *at_type != AtType::None {
                    content.mentions.push(Mention {
                        uid: at_uid.clone(),
                        all: *at_type == AtType::All,
                        text: text.clone(),
                    });
                }
            }
            Element::Face { face_id, name } => {
                content.emojis.push(EmojiRef {
                    id: face_id.to_string(),
                    name: name.clone(),
                    kind: EmojiKind::Face,
                });
            }
            Element::MarketFace { emoji_id, name, .. } => {
                content.emojis.push(EmojiRef {
                    id: emoji_id.clone(),
                    name: Some(name.clone()).filter(|n| !n.is_empty()),
                    kind: EmojiKind::MarketFace,
                });
            }
            Element::Reply {
                source_msg_id,
                reply_msg_seq,
                reply_msg_client_seq,
                sender_name,
            } => {
                content.reply = Some(self.resolve_reply(
                    raw,
                    source_msg_id.as_deref(),
                    *reply_msg_seq,
                    *reply_msg_client_seq,
                    sender_name.as_deref(),
                ));
            }
            Element::ArkCard { payload } => match serde_json::from_str(payload) {
                Ok(value) => content.card = Some(value),
                Err(e) => content.special.push(SpecialEntry {
                    kind: "error_ark_card".to_string(),
                    data: serde_json::json!({ "error": e.to_string(), "payload": payload }),
                }),
            },
            Element::MultiForward {
                res_id,
                summary,
                source_msg_ids,
            } => {
                content.multi_forward = Some(MultiForwardInfo {
                    res_id: res_id.clone(),
                    summary: summary.clone(),
                    message_ids: source_msg_ids.clone(),
                });
            }
            Element::Location {
                lat,
                lon,
                title,
                address,
            } => {
                content.location = Some(LocationInfo {
                    lat: *lat,
                    lon: *lon,
                    title: title.clone(),
                    address: address.clone(),
                });
            }
            Element::Calendar {
                summary,
                start_time,
                description,
            } => {
                content.calendar = Some(CalendarInfo {
                    summary: summary.clone(),
                    start_time: *start_time,
                    description: description.clone(),
                });
            }
            Element::Picture { .. }
            | Element::Video { .. }
            | Element::Voice { .. }
            | Element::File { .. } => {
                if let Some(resource) = render::resource_from_element(el) {
                    content.resources.push(resource);
                }
            }
            Element::GrayTip { .. } | Element::Markdown { .. } => {}
        }

        text_chunks.push(render::element_text(el));
        if let Some(html) = render::element_html(el) {
            html_chunks.push(html);
        }
    }

    /// Reply lookup order: (1) the element's source id against `records`,
    /// (2) the first record, (3) the LRU by sequence, (4) the LRU by client
    /// sequence. Unresolved replies keep the literal "original message".
    fn resolve_reply(
        &self,
        raw: &RawMessage,
        source_msg_id: Option<&str>,
        reply_msg_seq: Option<i64>,
        reply_msg_client_seq: Option<i64>,
        sender_name_hint: Option<&str>,
    ) -> ReplyInfo {
        if let Some(records) = &raw.records {
            if let Some(sid) = source_msg_id {
                if let Some(record) = records.iter().find(|r| r.msg_id == sid) {
                    return self.reply_from_record(record, source_msg_id);
                }
            }
            if let Some(record) = records.first() {
                return self.reply_from_record(record, source_msg_id);
            }
        }

        let mut index = self.reply_index.lock().unwrap();
        let indexed: Option<IndexedMessage> = reply_msg_seq
            .and_then(|seq| index.get_by_seq(seq))
            .or_else(|| reply_msg_client_seq.and_then(|cs| index.get_by_client_seq(cs)));
        drop(index);

        match indexed {
            Some(entry) => ReplyInfo {
                message_id: source_msg_id
                    .map(str::to_string)
                    .or_else(|| Some(entry.msg_id.clone())),
                referenced_message_id: Some(entry.msg_id.clone()),
                sender_name: entry.sender_name.clone(),
                content: render::preview_text(&entry.elements, REPLY_PREVIEW_CHARS),
            },
            None => ReplyInfo {
                message_id: source_msg_id.map(str::to_string),
                referenced_message_id: None,
                sender_name: sender_name_hint.unwrap_or_default().to_string(),
                content: UNRESOLVED_REPLY.to_string(),
            },
        }
    }

    fn reply_from_record(&self, record: &RawMessage, source_msg_id: Option<&str>) -> ReplyInfo {
        ReplyInfo {
            message_id: source_msg_id
                .map(str::to_string)
                .or_else(|| Some(record.msg_id.clone())),
            referenced_message_id: Some(record.msg_id.clone()),
            sender_name: display_name(record),
            content: render::preview_text(&record.elements, REPLY_PREVIEW_CHARS),
        }
    }

    fn stub(&self, raw: &RawMessage, err: &ParseError) -> ParsedMessage {
        let mut content = MessageContent::default();
        content.special.push(SpecialEntry {
            kind: "error_message".to_string(),
            data: serde_json::json!({ "error": err.to_string() }),
        });
        ParsedMessage {
            message_id: if raw.msg_id.is_empty() {
                format!("invalid-{}", raw.msg_seq)
            } else {
                raw.msg_id.clone()
            },
            message_seq: raw.msg_seq,
            timestamp: raw.time_millis(),
            sender: SenderInfo {
                uid: raw.sender_uid.clone(),
                display_name: display_name(raw),
                ..Default::default()
            },
            receiver: ReceiverInfo::default(),
            message_type: raw.msg_type,
            is_system: false,
            is_recalled: raw.is_recalled(),
            is_temp: false,
            content,
            stats: ParseStats::default(),
            raw_ref: None,
        }
    }
}

/// Merge downloaded resource state back into parsed messages before
/// serialization, so exporters see final local paths and statuses.
pub fn update_resource_paths(
    messages: &mut [ParsedMessage],
    resource_map: &HashMap<String, Vec<ResourceInfo>>,
) {
    for msg in messages.iter_mut() {
        let Some(updated) = resource_map.get(&msg.message_id) else {
            continue;
        };
        for resource in &mut msg.content.resources {
            if let Some(new_state) = updated.iter().find(|u| u.identity() == resource.identity()) {
                *resource = new_state.clone();
            }
        }
    }
}
