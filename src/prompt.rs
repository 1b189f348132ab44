//! Outgoing prompt construction.
//!
//! Quoting only changes what is sent to the completion service; where the new
//! node attaches is decided by the branch engine alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::locale::Locale;
use crate::tree::{Message, Role};

/// Excerpts longer than this many characters are cut before sending
pub const MAX_QUOTE_CHARS: usize = 300;

/// The message an excerpt was taken from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for QuotedMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// Quoted context attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub text: String,
    pub message: Option<QuotedMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Partial,
    Full,
}

impl QuoteKind {
    pub fn classify(quoted_text: &str, original: Option<&QuotedMessage>) -> Self {
        match original {
            Some(m) if quoted_text.chars().count() >= m.content.chars().count() => QuoteKind::Full,
            _ => QuoteKind::Partial,
        }
    }
}

/// Text sent as the user turn: the raw text, or the quote wrapped around it
pub fn build_user_prompt(locale: Locale, user_text: &str, quote: Option<&Quote>) -> String {
    match quote {
        Some(q) if !q.text.trim().is_empty() => {
            build_quoted_prompt(locale, user_text, &q.text, q.message.as_ref())
        }
        _ => user_text.to_string(),
    }
}

pub fn build_quoted_prompt(
    locale: Locale,
    user_text: &str,
    quoted_text: &str,
    quoted_message: Option<&QuotedMessage>,
) -> String {
    let labels = locale.quote_labels();
    let kind = match QuoteKind::classify(quoted_text, quoted_message) {
        QuoteKind::Partial => labels.partial,
        QuoteKind::Full => labels.full,
    };
    let sender = match quoted_message.map(|m| m.role) {
        Some(Role::User) => labels.from_user,
        _ => labels.from_assistant,
    };
    let excerpt = truncate_text(quoted_text, MAX_QUOTE_CHARS);

    format!(
        "{}{}{}{}{}\n\"{}\"\n\n{}{}",
        labels.header_open,
        kind,
        labels.header_sep,
        sender,
        labels.header_suffix,
        excerpt,
        labels.follow_up,
        user_text
    )
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quoted(role: Role, content: &str) -> QuotedMessage {
        QuotedMessage {
            id: "msg_q".to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_truncate_text_counts_characters() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
        assert_eq!(truncate_text("人工知能について", 4), "人工知能...");
        assert_eq!(truncate_text("exact", 5), "exact");
    }

    #[test]
    fn test_classify_partial_and_full() {
        let original = quoted(Role::Assistant, "AI is a broad field.");
        assert_eq!(QuoteKind::classify("broad field", Some(&original)), QuoteKind::Partial);
        assert_eq!(
            QuoteKind::classify("AI is a broad field.", Some(&original)),
            QuoteKind::Full
        );
        assert_eq!(QuoteKind::classify("anything", None), QuoteKind::Partial);
    }

    #[test]
    fn test_japanese_quoted_prompt_layout() {
        let original = quoted(Role::Assistant, "機械学習と深層学習があります。");
        let prompt = build_quoted_prompt(Locale::Ja, "詳しく教えて", "深層学習", Some(&original));
        assert_eq!(
            prompt,
            "【部分引用：AIの回答より】\n\"深層学習\"\n\n上記の引用について：詳しく教えて"
        );
    }

    #[test]
    fn test_english_quote_of_user_message() {
        let original = quoted(Role::User, "tell me about rust");
        let prompt = build_quoted_prompt(Locale::En, "why?", "tell me about rust", Some(&original));
        assert!(prompt.starts_with("[Full quote from the user's message]"));
        assert!(prompt.ends_with("Regarding the quote above: why?"));
    }

    #[test]
    fn test_long_excerpt_is_truncated() {
        let excerpt = "x".repeat(MAX_QUOTE_CHARS + 50);
        let prompt = build_quoted_prompt(Locale::En, "q", &excerpt, None);
        assert!(prompt.contains(&format!("\"{}...\"", "x".repeat(MAX_QUOTE_CHARS))));
    }

    #[test]
    fn test_user_prompt_without_quote_is_raw_text() {
        assert_eq!(build_user_prompt(Locale::Ja, "Hello", None), "Hello");
        let blank = Quote {
            text: "  ".to_string(),
            message: None,
        };
        assert_eq!(build_user_prompt(Locale::Ja, "Hello", Some(&blank)), "Hello");
    }
}
