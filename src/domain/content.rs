//! Content-addressable warm references and cold blobs (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    SystemPrompt,
    Messages,
    Response,
    Tools,
    Params,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::SystemPrompt,
        ContentType::Messages,
        ContentType::Response,
        ContentType::Tools,
        ContentType::Params,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::SystemPrompt => "system_prompt",
            ContentType::Messages => "messages",
            ContentType::Response => "response",
            ContentType::Tools => "tools",
            ContentType::Params => "params",
        }
    }
}

/// A warm-tier pointer from an event to a deduplicated cold-tier blob.
/// Multiple rows exist per event, one per populated content type (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentReference {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub call_sequence: i64,
    pub team_id: String,
    pub content_type: ContentType,
    pub content_hash: String,
    pub byte_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<i64>,
    pub truncated_preview: String,
}

pub const PREVIEW_MAX_CHARS: usize = 200;

impl ContentReference {
    pub fn preview(content: &str) -> String {
        content.chars().take(PREVIEW_MAX_CHARS).collect()
    }
}

/// Deduplicated cold-tier content, keyed by `(content_hash, team_id)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlob {
    pub content_hash: String,
    pub team_id: String,
    pub content: String,
    pub byte_size: i64,
    pub ref_count: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// SHA-256 over the UTF-8 encoded string form of structured content (§4.3 step 4).
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_hex() {
        let h1 = content_hash("hello world");
        let h2 = content_hash("hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn distinct_content_hashes_differ() {
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn preview_truncates_to_200_chars() {
        let long = "x".repeat(500);
        let preview = ContentReference::preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
    }

    #[test]
    fn preview_keeps_short_content_intact() {
        let preview = ContentReference::preview("short");
        assert_eq!(preview, "short");
    }
}
