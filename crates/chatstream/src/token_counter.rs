//! Character-based approximation of the context window.
//!
//! There is no tokenizer here: a token budget is turned into a character budget
//! with a fixed ratio, and every message is measured in
//! characters. Swapping in an exact tokenizer only has to change `message_size`
//! and `char_budget`; `truncate_messages` keeps its contract.
use crate::models::message::{Message, Role};

/// Characters assumed per token
pub const APPROX_CHARS_PER_TOKEN: usize = 3;

pub fn char_budget(max_context_tokens: usize) -> usize {
    max_context_tokens.saturating_mul(APPROX_CHARS_PER_TOKEN)
}

/// Size of a message in characters. Text counts by length; structured content
/// (tool calls) counts by its serialized length.
pub fn message_size(message: &Message) -> usize {
    let mut size = message.text().chars().count();
    if message.has_tool_calls() {
        size += serde_json::to_string(&message.tool_calls)
            .map(|s| s.chars().count())
            .unwrap_or_default();
    }
    size
}

/// Select the newest contiguous run of messages that fits `char_budget`.
///
/// A leading system message is always kept and is not charged against the
/// budget. The rest is scanned newest to oldest and the scan stops at the first
/// message that does not fit, so an older small message is never admitted past
/// a newer large one.
pub fn truncate_messages(messages: &[Message], char_budget: usize) -> Vec<Message> {
    let (system, rest) = match messages.split_first() {
        Some((first, rest)) if first.role == Role::System => (Some(first), rest),
        _ => (None, messages),
    };

    let mut remaining = char_budget;
    let mut keep_from = rest.len();
    for (idx, message) in rest.iter().enumerate().rev() {
        let size = message_size(message);
        if size > remaining {
            break;
        }
        remaining -= size;
        keep_from = idx;
    }

    if keep_from > 0 {
        tracing::debug!(
            dropped = keep_from,
            kept = rest.len() - keep_from,
            char_budget,
            "truncated history to fit context budget"
        );
    }

    system
        .into_iter()
        .chain(&rest[keep_from..])
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::ToolCallRequest;

    fn sized(role_builder: fn(String) -> Message, len: usize, tag: char) -> Message {
        role_builder(tag.to_string().repeat(len))
    }

    fn history() -> Vec<Message> {
        vec![
            sized(Message::system, 50, 's'),
            sized(Message::user, 100, '1'),
            sized(|t| Message::assistant().with_text(t), 100, '2'),
            sized(Message::user, 100, '3'),
        ]
    }

    #[test]
    fn test_drops_oldest_that_overflows() {
        let messages = history();
        let kept = truncate_messages(&messages, 220);

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], messages[0]);
        assert_eq!(kept[1], messages[2]);
        assert_eq!(kept[2], messages[3]);
    }

    #[test]
    fn test_everything_fits() {
        let messages = history();
        assert_eq!(truncate_messages(&messages, 10_000), messages);
    }

    #[test]
    fn test_system_kept_when_nothing_else_fits() {
        let messages = history();
        let kept = truncate_messages(&messages, 50);
        assert_eq!(kept, vec![messages[0].clone()]);
    }

    #[test]
    fn test_stops_at_first_overflow() {
        let messages = vec![
            Message::user("a".repeat(10)),
            Message::user("b".repeat(500)),
            Message::user("c".repeat(10)),
        ];
        let kept = truncate_messages(&messages, 100);
        // the small oldest message is not admitted past the large one
        assert_eq!(kept, vec![messages[2].clone()]);
    }

    #[test]
    fn test_kept_messages_are_a_contiguous_suffix() {
        let messages: Vec<Message> = (0..20)
            .map(|i| Message::user("x".repeat((i * 7) % 23 + 1)))
            .collect();
        for budget in 0..200 {
            let kept = truncate_messages(&messages, budget);
            assert_eq!(kept[..], messages[messages.len() - kept.len()..]);
        }
    }

    #[test]
    fn test_structured_content_measured_serialized() {
        let call = ToolCallRequest::new("call_1", "add_node", r#"{"text":"a"}"#);
        let serialized = serde_json::to_string(&vec![call.clone()]).unwrap();
        let message = Message::assistant().with_text("ok").with_tool_calls(vec![call]);

        assert_eq!(message_size(&message), 2 + serialized.len());
    }

    #[test]
    fn test_char_budget() {
        assert_eq!(char_budget(1000), 3000);
        assert_eq!(char_budget(usize::MAX), usize::MAX);
    }
}
