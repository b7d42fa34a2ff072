//! Chat transport abstraction for message delivery and update intake.

pub mod telegram;

pub use telegram::TelegramTransport;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::content::{ContactContent, IncomingMessage, LocationContent};
use crate::error::TransportError;
use crate::model::ChatRef;

/// Re-sendable media categories; each maps to one Bot API method and
/// its payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Document,
    Sticker,
    Animation,
}

impl MediaKind {
    pub fn method(&self) -> &'static str {
        match self {
            MediaKind::Photo => "sendPhoto",
            MediaKind::Video => "sendVideo",
            MediaKind::Audio => "sendAudio",
            MediaKind::Voice => "sendVoice",
            MediaKind::VideoNote => "sendVideoNote",
            MediaKind::Document => "sendDocument",
            MediaKind::Sticker => "sendSticker",
            MediaKind::Animation => "sendAnimation",
        }
    }

    pub fn field(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
            MediaKind::Document => "document",
            MediaKind::Sticker => "sticker",
            MediaKind::Animation => "animation",
        }
    }

    /// Whether the API method accepts a caption field.
    pub fn captionable(&self) -> bool {
        !matches!(self, MediaKind::VideoNote | MediaKind::Sticker)
    }
}

/// One transport update, already reduced to what the bot cares about.
#[derive(Debug, Clone)]
pub enum TransportUpdate {
    /// A post in a monitored channel or group, fed to the forward engine.
    Post(IncomingMessage),
    /// A private text message from a user, fed to the session handler.
    Private {
        chat_id: i64,
        user_id: i64,
        username: Option<String>,
        text: String,
    },
}

pub type UpdateStream = BoxStream<'static, TransportUpdate>;

/// Message send/copy/download primitives of the chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Server-side copy of an existing message, with the caption or
    /// text replaced when `caption` is set.
    async fn copy_message(
        &self,
        destination: &ChatRef,
        source_chat_id: i64,
        message_id: i64,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn send_text(&self, destination: &ChatRef, text: &str) -> Result<(), TransportError>;

    /// Re-send media by its transport file id.
    async fn send_media(
        &self,
        destination: &ChatRef,
        kind: MediaKind,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    /// Upload fresh media bytes (watermarked output).
    async fn upload_media(
        &self,
        destination: &ChatRef,
        kind: MediaKind,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn send_location(
        &self,
        destination: &ChatRef,
        location: &LocationContent,
    ) -> Result<(), TransportError>;

    async fn send_contact(
        &self,
        destination: &ChatRef,
        contact: &ContactContent,
    ) -> Result<(), TransportError>;

    /// Fetch original media bytes for the watermark round trip.
    async fn download_media(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}
