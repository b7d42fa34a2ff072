//! Content fingerprinting for per-task duplicate suppression.
//!
//! Text-bearing messages hash their primary text; media without text
//! falls back to the transport's stable unique file id, tagged with the
//! content kind so a photo and a document sharing bytes never collide.

use sha2::{Digest, Sha256};

use crate::content::{IncomingMessage, MessageContent};

/// Stable fingerprint of a message's forward-relevant content, or
/// `None` when the content carries nothing to fingerprint.
pub fn fingerprint(message: &IncomingMessage) -> Option<String> {
    if let Some(text) = message.primary_text() {
        return Some(hash_text(text));
    }
    match message.content.file_ref() {
        Some(file) => Some(hash_text(&format!(
            "{}_{}",
            message.content.kind(),
            file.unique_id
        ))),
        // Polls fall back to their question via primary_text; bare
        // location/contact payloads have no stable identity.
        None => match &message.content {
            MessageContent::Poll(poll) => Some(hash_text(&poll.question)),
            _ => None,
        },
    }
}

fn hash_text(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{FileRef, LocationContent, PollContent};

    fn message(content: MessageContent, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            message_id: 1,
            source_chat_id: -100,
            source_chat_handle: None,
            sender_id: Some(1),
            content,
            caption: caption.map(String::from),
            buttons: vec![],
        }
    }

    #[test]
    fn same_text_same_fingerprint() {
        let a = message(MessageContent::Text("hello world".into()), None);
        let b = message(MessageContent::Text("hello world".into()), None);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(fingerprint(&a).is_some());
    }

    #[test]
    fn different_text_different_fingerprint() {
        let a = message(MessageContent::Text("one".into()), None);
        let b = message(MessageContent::Text("two".into()), None);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn captioned_media_hashes_caption() {
        let file = FileRef { file_id: "f1".into(), unique_id: "u1".into() };
        let photo = message(MessageContent::Photo(file), Some("sale today"));
        let text = message(MessageContent::Text("sale today".into()), None);
        assert_eq!(fingerprint(&photo), fingerprint(&text));
    }

    #[test]
    fn uncaptioned_media_keyed_by_kind_and_unique_id() {
        let file = FileRef { file_id: "f1".into(), unique_id: "u1".into() };
        let photo = message(MessageContent::Photo(file.clone()), None);
        let doc = message(MessageContent::Document(file), None);
        assert!(fingerprint(&photo).is_some());
        assert_ne!(fingerprint(&photo), fingerprint(&doc));
    }

    #[test]
    fn poll_hashes_question() {
        let poll = message(
            MessageContent::Poll(PollContent {
                question: "Favorite color?".into(),
                options: vec!["red".into(), "blue".into()],
            }),
            None,
        );
        assert!(fingerprint(&poll).is_some());
    }

    #[test]
    fn bare_location_has_no_fingerprint() {
        let loc = message(
            MessageContent::Location(LocationContent { latitude: 1.0, longitude: 2.0 }),
            None,
        );
        assert_eq!(fingerprint(&loc), None);
    }
}
