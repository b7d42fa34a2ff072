//! Incoming message content model.
//!
//! Content is a closed tagged variant with one handler per kind, rather
//! than sequential truthiness probing of attributes. Transport adapters
//! convert their native update format into [`IncomingMessage`].

use serde::{Deserialize, Serialize};

/// Reference to a media file held by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Opaque id used for send/download calls.
    pub file_id: String,
    /// Stable content-unique id, used for media fingerprints.
    pub unique_id: String,
}

/// A poll, rendered to text for delivery (polls are never re-sent as polls).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollContent {
    pub question: String,
    pub options: Vec<String>,
}

/// Geographic point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationContent {
    pub latitude: f64,
    pub longitude: f64,
}

/// A shared contact card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactContent {
    pub phone_number: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

/// The 12 supported content kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    Photo(FileRef),
    Video(FileRef),
    Audio(FileRef),
    Voice(FileRef),
    VideoNote(FileRef),
    Document(FileRef),
    Sticker(FileRef),
    Animation(FileRef),
    Poll(PollContent),
    Location(LocationContent),
    Contact(ContactContent),
}

impl MessageContent {
    /// Short tag used in fingerprints and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Photo(_) => "photo",
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
            Self::Voice(_) => "voice",
            Self::VideoNote(_) => "video_note",
            Self::Document(_) => "doc",
            Self::Sticker(_) => "sticker",
            Self::Animation(_) => "animation",
            Self::Poll(_) => "poll",
            Self::Location(_) => "location",
            Self::Contact(_) => "contact",
        }
    }

    /// The media file reference, for kinds that carry one.
    pub fn file_ref(&self) -> Option<&FileRef> {
        match self {
            Self::Photo(f)
            | Self::Video(f)
            | Self::Audio(f)
            | Self::Voice(f)
            | Self::VideoNote(f)
            | Self::Document(f)
            | Self::Sticker(f)
            | Self::Animation(f) => Some(f),
            _ => None,
        }
    }

    /// Only photo and video content is watermark-eligible.
    pub fn watermark_eligible(&self) -> bool {
        matches!(self, Self::Photo(_) | Self::Video(_))
    }
}

/// One row of inline-keyboard button labels.
pub type ButtonRow = Vec<String>;

/// A message as received from the source chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Transport-native message id within the source chat.
    pub message_id: i64,
    /// Numeric id of the source chat.
    pub source_chat_id: i64,
    /// `@handle` of the source chat, when it has one.
    pub source_chat_handle: Option<String>,
    /// Numeric id of the sender, when known.
    pub sender_id: Option<i64>,
    pub content: MessageContent,
    /// Caption accompanying media content.
    pub caption: Option<String>,
    /// Inline keyboard button labels, row by row.
    pub buttons: Vec<ButtonRow>,
}

impl IncomingMessage {
    /// The primary text of the message: the text body, or the caption.
    pub fn primary_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t.as_str()),
            _ => self.caption.as_deref(),
        }
    }
}
