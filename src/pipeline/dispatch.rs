//! Delivery dispatcher — picks a send strategy per content type.
//!
//! Text is always re-sent as a fresh message. Media goes through the
//! transport's cheap copy primitive with the transformed caption, with
//! a manual per-kind re-send as fallback. Watermark-configured photo
//! and video content takes the download/stamp/upload round trip,
//! falling back to unwatermarked delivery when the collaborator fails.
//! Polls are never forwarded as polls; they become an enumerated text
//! summary.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::content::{IncomingMessage, MessageContent, PollContent};
use crate::error::TransportError;
use crate::model::Task;
use crate::transport::{MediaKind, Transport};
use crate::watermark::Watermarker;

pub struct DeliveryDispatcher {
    transport: Arc<dyn Transport>,
    watermarker: Option<Arc<dyn Watermarker>>,
}

impl DeliveryDispatcher {
    pub fn new(transport: Arc<dyn Transport>, watermarker: Option<Arc<dyn Watermarker>>) -> Self {
        Self { transport, watermarker }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Deliver one transformed message for one task. `text` is the
    /// transform output: the full body for text messages, the caption
    /// for media, absent when the source had no text.
    pub async fn deliver(
        &self,
        task: &Task,
        message: &IncomingMessage,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        match &message.content {
            MessageContent::Text(original) => {
                let body = text.unwrap_or(original);
                self.transport.send_text(&task.destination, body).await
            }
            MessageContent::Poll(poll) => {
                self.transport
                    .send_text(&task.destination, &render_poll(poll))
                    .await
            }
            MessageContent::Location(location) => {
                self.transport.send_location(&task.destination, location).await
            }
            MessageContent::Contact(contact) => {
                self.transport.send_contact(&task.destination, contact).await
            }
            content => {
                if task.watermark.is_some() && content.watermark_eligible() {
                    match self.deliver_watermarked(task, message, text).await {
                        Ok(()) => return Ok(()),
                        Err(error) => {
                            warn!(
                                task_id = task.id,
                                %error,
                                "Watermark round trip failed, delivering unwatermarked"
                            );
                        }
                    }
                }
                self.deliver_media(task, message, text).await
            }
        }
    }

    /// Copy first; on failure re-send by file id.
    async fn deliver_media(
        &self,
        task: &Task,
        message: &IncomingMessage,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let copy_result = self
            .transport
            .copy_message(
                &task.destination,
                message.source_chat_id,
                message.message_id,
                caption,
            )
            .await;

        let error = match copy_result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let Some(kind) = media_kind(&message.content) else {
            return Err(error);
        };
        let Some(file) = message.content.file_ref() else {
            return Err(error);
        };

        debug!(task_id = task.id, %error, "copyMessage failed, re-sending by file id");
        self.transport
            .send_media(&task.destination, kind, &file.file_id, caption)
            .await
    }

    async fn deliver_watermarked(
        &self,
        task: &Task,
        message: &IncomingMessage,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let spec = task.watermark.as_ref().ok_or(TransportError::ApiFailed {
            method: "watermark".into(),
            reason: "no watermark configured".into(),
        })?;
        let watermarker = self.watermarker.as_ref().ok_or(TransportError::ApiFailed {
            method: "watermark".into(),
            reason: "no watermark service configured".into(),
        })?;
        let file = message.content.file_ref().ok_or(TransportError::ApiFailed {
            method: "watermark".into(),
            reason: "content carries no media".into(),
        })?;
        let kind = match media_kind(&message.content) {
            Some(kind @ (MediaKind::Photo | MediaKind::Video)) => kind,
            _ => {
                return Err(TransportError::ApiFailed {
                    method: "watermark".into(),
                    reason: "content is not watermark-eligible".into(),
                });
            }
        };

        let original = self.transport.download_media(&file.file_id).await?;
        let stamped = watermarker.apply(original, spec).await?;
        self.transport
            .upload_media(&task.destination, kind, stamped, caption)
            .await
    }
}

fn media_kind(content: &MessageContent) -> Option<MediaKind> {
    match content {
        MessageContent::Photo(_) => Some(MediaKind::Photo),
        MessageContent::Video(_) => Some(MediaKind::Video),
        MessageContent::Audio(_) => Some(MediaKind::Audio),
        MessageContent::Voice(_) => Some(MediaKind::Voice),
        MessageContent::VideoNote(_) => Some(MediaKind::VideoNote),
        MessageContent::Document(_) => Some(MediaKind::Document),
        MessageContent::Sticker(_) => Some(MediaKind::Sticker),
        MessageContent::Animation(_) => Some(MediaKind::Animation),
        _ => None,
    }
}

fn render_poll(poll: &PollContent) -> String {
    let mut out = format!("📊 Poll: {}", poll.question);
    for (index, option) in poll.options.iter().enumerate() {
        out.push_str(&format!("\n{}. {option}", index + 1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContactContent, FileRef, LocationContent};
    use crate::error::TransportError;
    use crate::model::{ChatRef, CleanerOptions, LineRemoval, WatermarkPosition, WatermarkSpec};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Copy { caption: Option<String> },
        Text(String),
        Media { kind: MediaKind, file_id: String, caption: Option<String> },
        Upload { kind: MediaKind, caption: Option<String> },
        Location,
        Contact,
        Download(String),
    }

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<Call>>,
        fail_copy: bool,
        fail_download: bool,
    }

    impl MockTransport {
        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn copy_message(
            &self,
            _destination: &ChatRef,
            _source_chat_id: i64,
            _message_id: i64,
            caption: Option<&str>,
        ) -> Result<(), TransportError> {
            self.record(Call::Copy { caption: caption.map(String::from) });
            if self.fail_copy {
                return Err(TransportError::ApiFailed { method: "copyMessage".into(), reason: "denied".into() });
            }
            Ok(())
        }

        async fn send_text(&self, _destination: &ChatRef, text: &str) -> Result<(), TransportError> {
            self.record(Call::Text(text.to_string()));
            Ok(())
        }

        async fn send_media(
            &self,
            _destination: &ChatRef,
            kind: MediaKind,
            file_id: &str,
            caption: Option<&str>,
        ) -> Result<(), TransportError> {
            self.record(Call::Media {
                kind,
                file_id: file_id.to_string(),
                caption: caption.map(String::from),
            });
            Ok(())
        }

        async fn upload_media(
            &self,
            _destination: &ChatRef,
            kind: MediaKind,
            _bytes: Vec<u8>,
            caption: Option<&str>,
        ) -> Result<(), TransportError> {
            self.record(Call::Upload { kind, caption: caption.map(String::from) });
            Ok(())
        }

        async fn send_location(
            &self,
            _destination: &ChatRef,
            _location: &LocationContent,
        ) -> Result<(), TransportError> {
            self.record(Call::Location);
            Ok(())
        }

        async fn send_contact(
            &self,
            _destination: &ChatRef,
            _contact: &ContactContent,
        ) -> Result<(), TransportError> {
            self.record(Call::Contact);
            Ok(())
        }

        async fn download_media(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
            self.record(Call::Download(file_id.to_string()));
            if self.fail_download {
                return Err(TransportError::DownloadFailed {
                    file_ref: file_id.to_string(),
                    reason: "gone".into(),
                });
            }
            Ok(vec![1, 2, 3])
        }
    }

    struct MockWatermarker;

    #[async_trait]
    impl Watermarker for MockWatermarker {
        async fn apply(
            &self,
            mut image: Vec<u8>,
            _spec: &WatermarkSpec,
        ) -> Result<Vec<u8>, TransportError> {
            image.push(99);
            Ok(image)
        }
    }

    fn task() -> Task {
        Task {
            id: 1,
            owner_id: 1,
            source: ChatRef::Id(-100),
            source_title: None,
            destination: ChatRef::Id(-200),
            destination_title: None,
            enabled: true,
            forward_delay: None,
            header: None,
            footer: None,
            translate_to: None,
            watermark: None,
            power_on: None,
            power_off: None,
            remove_duplicates: false,
            convert_buttons: false,
            cleaner: CleanerOptions::default(),
            replacements: vec![],
            remove_lines: LineRemoval::default(),
            created_at: Utc::now(),
        }
    }

    fn message(content: MessageContent) -> IncomingMessage {
        IncomingMessage {
            message_id: 10,
            source_chat_id: -100,
            source_chat_handle: None,
            sender_id: Some(1),
            content,
            caption: None,
            buttons: vec![],
        }
    }

    fn photo() -> MessageContent {
        MessageContent::Photo(FileRef { file_id: "f1".into(), unique_id: "u1".into() })
    }

    #[tokio::test]
    async fn text_is_resent_not_copied() {
        let transport = Arc::new(MockTransport::default());
        let dispatcher = DeliveryDispatcher::new(transport.clone(), None);
        dispatcher
            .deliver(&task(), &message(MessageContent::Text("orig".into())), Some("transformed"))
            .await
            .unwrap();
        assert_eq!(transport.calls(), vec![Call::Text("transformed".into())]);
    }

    #[tokio::test]
    async fn photo_without_watermark_uses_copy() {
        let transport = Arc::new(MockTransport::default());
        let dispatcher = DeliveryDispatcher::new(transport.clone(), None);
        dispatcher
            .deliver(&task(), &message(photo()), Some("cap"))
            .await
            .unwrap();
        assert_eq!(transport.calls(), vec![Call::Copy { caption: Some("cap".into()) }]);
    }

    #[tokio::test]
    async fn copy_failure_falls_back_to_resend() {
        let transport = Arc::new(MockTransport { fail_copy: true, ..Default::default() });
        let dispatcher = DeliveryDispatcher::new(transport.clone(), None);
        dispatcher.deliver(&task(), &message(photo()), None).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec![
                Call::Copy { caption: None },
                Call::Media { kind: MediaKind::Photo, file_id: "f1".into(), caption: None },
            ]
        );
    }

    #[tokio::test]
    async fn watermarked_photo_takes_round_trip() {
        let transport = Arc::new(MockTransport::default());
        let dispatcher = DeliveryDispatcher::new(transport.clone(), Some(Arc::new(MockWatermarker)));
        let mut t = task();
        t.watermark = Some(WatermarkSpec {
            text: "brand".into(),
            position: WatermarkPosition::BottomRight,
        });
        dispatcher.deliver(&t, &message(photo()), Some("cap")).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec![
                Call::Download("f1".into()),
                Call::Upload { kind: MediaKind::Photo, caption: Some("cap".into()) },
            ]
        );
    }

    #[tokio::test]
    async fn watermark_failure_falls_back_to_copy() {
        let transport = Arc::new(MockTransport { fail_download: true, ..Default::default() });
        let dispatcher = DeliveryDispatcher::new(transport.clone(), Some(Arc::new(MockWatermarker)));
        let mut t = task();
        t.watermark = Some(WatermarkSpec {
            text: "brand".into(),
            position: WatermarkPosition::Center,
        });
        dispatcher.deliver(&t, &message(photo()), None).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec![Call::Download("f1".into()), Call::Copy { caption: None }]
        );
    }

    #[tokio::test]
    async fn watermark_set_but_ineligible_content_copies() {
        let transport = Arc::new(MockTransport::default());
        let dispatcher = DeliveryDispatcher::new(transport.clone(), Some(Arc::new(MockWatermarker)));
        let mut t = task();
        t.watermark = Some(WatermarkSpec {
            text: "brand".into(),
            position: WatermarkPosition::TopLeft,
        });
        let doc = MessageContent::Document(FileRef { file_id: "d1".into(), unique_id: "u".into() });
        dispatcher.deliver(&t, &message(doc), None).await.unwrap();
        assert_eq!(transport.calls(), vec![Call::Copy { caption: None }]);
    }

    #[tokio::test]
    async fn poll_rendered_as_enumerated_text() {
        let transport = Arc::new(MockTransport::default());
        let dispatcher = DeliveryDispatcher::new(transport.clone(), None);
        let poll = MessageContent::Poll(PollContent {
            question: "Best day?".into(),
            options: vec!["Sat".into(), "Sun".into()],
        });
        dispatcher.deliver(&task(), &message(poll), None).await.unwrap();
        assert_eq!(
            transport.calls(),
            vec![Call::Text("📊 Poll: Best day?\n1. Sat\n2. Sun".into())]
        );
    }

    #[tokio::test]
    async fn location_and_contact_use_dedicated_sends() {
        let transport = Arc::new(MockTransport::default());
        let dispatcher = DeliveryDispatcher::new(transport.clone(), None);
        let loc = MessageContent::Location(LocationContent { latitude: 1.0, longitude: 2.0 });
        let contact = MessageContent::Contact(ContactContent {
            phone_number: "+1".into(),
            first_name: "Ann".into(),
            last_name: None,
        });
        dispatcher.deliver(&task(), &message(loc), None).await.unwrap();
        dispatcher.deliver(&task(), &message(contact), None).await.unwrap();
        assert_eq!(transport.calls(), vec![Call::Location, Call::Contact]);
    }
}
