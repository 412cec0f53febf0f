use qce_core::task::MessageFilter;
use qce_core::{ChatRef, ChatType};

/// How history pages are pulled from the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Walk history backward via `getMsgHistory`, anchored by the earliest
    /// seen message id. Most reliable, works for every chat kind.
    TimeSequential,
    /// Walk `getMsgsBySeqRange` by decrementing the sequence cursor one
    /// batch at a time. Cheaper per call; group chats only.
    SeqRange,
}

impl FetchStrategy {
    /// Pick a strategy for `(chat, filter)`. Rules, in order:
    /// private chats always use the history walk (the range API is unreliable
    /// there); content-constrained filters use it too, because the filter has
    /// to run client-side anyway; everything else takes the cheaper range
    /// walk.
    pub fn select(chat: &ChatRef, filter: &MessageFilter) -> Self {
        if chat.chat_type == ChatType::Private {
            FetchStrategy::TimeSequential
        } else if filter.has_content_constraints() {
            FetchStrategy::TimeSequential
        } else {
            FetchStrategy::SeqRange
        }
    }
}
