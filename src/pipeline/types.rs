//! Items flowing through the pipeline and the status snapshot.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioClip;

/// Characters of item text shown in log lines.
const PREVIEW_CHARS: usize = 50;

/// How a request enters the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Agent finished: summarize the response before speaking.
    Summarize,
    /// Permission requested: summarize the tool call into a question.
    Permission,
    /// Speak the content verbatim.
    Speak,
}

/// Which summarization prompt to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    #[default]
    ShortResponse,
    LongResponse,
    PermissionRequest,
}

/// Structured extras attached at admission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMetadata {
    Permission { tool_name: String },
}

/// Something waiting in a pipeline queue.
pub trait Queued {
    fn id(&self) -> Uuid;
    fn correlation_id(&self) -> &str;
    /// Text used in log lines about this item.
    fn text(&self) -> &str;

    fn preview(&self) -> String {
        sanitize_for_log(self.text(), PREVIEW_CHARS)
    }
}

/// A hook event waiting for the summarizer stage.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub correlation_id: String,
    pub kind: RequestKind,
    pub content: String,
    pub summary_kind: Option<SummaryKind>,
    pub metadata: Option<RequestMetadata>,
}

impl Request {
    pub fn new(
        kind: RequestKind,
        content: String,
        summary_kind: Option<SummaryKind>,
        metadata: Option<RequestMetadata>,
        correlation_id: Option<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: correlation_id.unwrap_or_else(|| short_id(id)),
            kind,
            content,
            summary_kind,
            metadata,
        }
    }
}

impl Queued for Request {
    fn id(&self) -> Uuid {
        self.id
    }

    fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn text(&self) -> &str {
        &self.content
    }
}

/// Text waiting to be synthesized.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub correlation_id: String,
    pub text: String,
    pub created_at: SystemTime,
}

impl Message {
    pub fn new(text: String, correlation_id: Option<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            correlation_id: correlation_id.unwrap_or_else(|| short_id(id)),
            text,
            created_at: SystemTime::now(),
        }
    }
}

impl Queued for Message {
    fn id(&self) -> Uuid {
        self.id
    }

    fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn text(&self) -> &str {
        &self.text
    }
}

/// Synthesized audio waiting for the player. Owns its clip.
#[derive(Debug)]
pub struct ReadyAudio {
    pub id: Uuid,
    pub correlation_id: String,
    pub clip: AudioClip,
    pub text: String,
}

impl Queued for ReadyAudio {
    fn id(&self) -> Uuid {
        self.id
    }

    fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn text(&self) -> &str {
        &self.text
    }
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending_requests: usize,
    pub pending_messages: usize,
    pub ready_audio: usize,
    pub is_playing: bool,
    pub current_text: Option<String>,
}

impl QueueStatus {
    pub fn queue_depth(&self) -> usize {
        self.pending_requests + self.pending_messages + self.ready_audio
    }
}

/// First eight hex digits of a UUID, used as a log correlation id.
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Collapse whitespace and cut `text` to `max_chars` for logging.
pub fn sanitize_for_log(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_newlines() {
        assert_eq!(sanitize_for_log("hello\n\n  world", 50), "hello world");
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let text = "ééééééééééé";
        assert_eq!(sanitize_for_log(text, 3), "ééé...");
    }

    #[test]
    fn request_without_correlation_uses_short_id() {
        let req = Request::new(RequestKind::Speak, "hi".into(), None, None, None);
        assert_eq!(req.correlation_id.len(), 8);
        assert!(req.id.simple().to_string().starts_with(&req.correlation_id));
    }

    #[test]
    fn message_keeps_given_correlation() {
        let msg = Message::new("hi".into(), Some("abc123".into()));
        assert_eq!(msg.correlation_id(), "abc123");
    }

    #[test]
    fn queue_depth_sums_all_stages() {
        let status = QueueStatus {
            pending_requests: 1,
            pending_messages: 2,
            ready_audio: 3,
            ..QueueStatus::default()
        };
        assert_eq!(status.queue_depth(), 6);
    }
}
