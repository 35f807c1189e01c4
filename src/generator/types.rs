//! Wire shapes shared by both generator transports.
//!
//! Requests use the OpenAI-compatible chat shape; the backend proxy accepts
//! the same `messages` array. Responses arrive as event-stream frames in one
//! of two dialects, decoded in [`super::sse`].

use serde::{Deserialize, Serialize};

/// One chat message. `content` is either a plain string or a part list;
/// both transports accept both forms.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(data_url: impl Into<String>) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: data_url.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Body for the backend proxy: `POST {api_url}/{operation}`.
#[derive(Debug, Serialize)]
pub struct ProxyRequest<'a> {
    pub messages: &'a [ChatMessage],
}

/// Body for a direct OpenAI-compatible completions endpoint.
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub model: &'a str,
    pub stream: bool,
}

/// Backend stream frame; only `text-delta` frames carry instruction text,
/// every other `type` is skipped.
#[derive(Debug, Deserialize)]
pub struct BackendFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delta: String,
}

/// OpenAI-style chunk frame, reduced to the fields the decoder reads.
#[derive(Debug, Deserialize)]
pub struct ChunkFrame {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}
