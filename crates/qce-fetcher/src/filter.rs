use qce_core::message::RawMessage;
use qce_core::task::MessageFilter;

/// Apply the client-side filter to one batch, preserving order.
///
/// Checks run cheapest-first: time window (with seconds→millis promotion),
/// recall flag, sender set, element-type set, then the keyword scan over a
/// JSON rendering of the elements.
pub fn apply(filter: &MessageFilter, batch: Vec<RawMessage>) -> Vec<RawMessage> {
    batch.into_iter().filter(|m| keep(filter, m)).collect()
}

fn keep(filter: &MessageFilter, msg: &RawMessage) -> bool {
    if !filter.window.contains(msg.time_millis()) {
        return false;
    }

    if msg.is_recalled() && !filter.include_recalled {
        return false;
    }

    if let Some(senders) = &filter.senders {
        if !senders.is_empty() {
            let uid_match = senders.iter().any(|s| *s == msg.sender_uid);
            let uin_match = msg
                .sender_uin
                .as_ref()
                .is_some_and(|uin| senders.iter().any(|s| s == uin));
            if !uid_match && !uin_match {
                return false;
            }
        }
    }

    if let Some(types) = &filter.types {
        if !types.is_empty() && !msg.elements.iter().any(|el| types.iter().any(|t| t == el.kind()))
        {
            return false;
        }
    }

    if let Some(keyword) = &filter.keyword {
        if !keyword.is_empty() {
            let rendered = serde_json::to_string(&msg.elements).unwrap_or_default();
            if !rendered.to_lowercase().contains(&keyword.to_lowercase()) {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use qce_core::message::MessageElement;
    use qce_core::TimeWindow;

    fn msg(id: &str, time_secs: i64, sender: &str, text: &str) -> RawMessage {
        RawMessage {
            msg_id: id.to_string(),
            msg_time: time_secs,
            sender_uid: sender.to_string(),
            elements: vec![MessageElement::text(text)],
            ..Default::default()
        }
    }

    #[test]
    fn window_filter_promotes_seconds() {
        let mut f = MessageFilter::default();
        f.window = TimeWindow::new(1_700_000_000_000, 1_700_000_025_000).unwrap();
        let batch = vec![
            msg("a", 1_700_000_010, "u1", "in"),
            msg("b", 1_700_000_030, "u1", "past end"),
        ];
        let kept = apply(&f, batch);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].msg_id, "a");
    }

    #[test]
    fn sender_filter_matches_uid_or_uin() {
        let mut f = MessageFilter::default();
        f.senders = Some(vec!["12345".to_string()]);
        let mut by_uin = msg("a", 1_700_000_010, "u_opaque", "x");
        by_uin.sender_uin = Some("12345".to_string());
        let by_uid = msg("b", 1_700_000_011, "12345", "y");
        let other = msg("c", 1_700_000_012, "u2", "z");
        let kept = apply(&f, vec![by_uin, by_uid, other]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn type_filter_keeps_matching_elements() {
        let mut f = MessageFilter::default();
        f.types = Some(vec!["picture".to_string()]);
        let with_pic: RawMessage = serde_json::from_str(
            r#"{"msgId":"a","msgSeq":1,"msgTime":1700000010,"senderUid":"u1",
                "elements":[{"type":"picture","file_name":"x.png","md5":"","element_id":"e1"}]}"#,
        )
        .unwrap();
        let text_only = msg("b", 1_700_000_011, "u1", "hi");
        let kept = apply(&f, vec![with_pic, text_only]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].msg_id, "a");
    }

    #[test]
    fn keyword_filter_is_case_insensitive() {
        let mut f = MessageFilter::default();
        f.keyword = Some("HELLO".to_string());
        let kept = apply(
            &f,
            vec![
                msg("a", 1_700_000_010, "u1", "well hello there"),
                msg("b", 1_700_000_011, "u1", "goodbye"),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].msg_id, "a");
    }

    #[test]
    fn recalled_messages_dropped_unless_included() {
        let mut recalled = msg("a", 1_700_000_010, "u1", "oops");
        recalled.recall_time = Some(1_700_000_020);
        let mut f = MessageFilter::default();
        assert!(apply(&f, vec![recalled.clone()]).is_empty());
        f.include_recalled = true;
        assert_eq!(apply(&f, vec![recalled]).len(), 1);
    }
}
