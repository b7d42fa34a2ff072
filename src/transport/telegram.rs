//! Telegram transport — Bot API over HTTP, long-polling for updates.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::content::{
    ButtonRow, ContactContent, FileRef, IncomingMessage, LocationContent, MessageContent,
    PollContent,
};
use crate::error::TransportError;
use crate::model::ChatRef;
use crate::transport::{MediaKind, Transport, TransportUpdate, UpdateStream};

/// Hard limit for sendMessage text length.
const MAX_MESSAGE_LENGTH: usize = 4096;

const POLL_TIMEOUT_SECS: u64 = 30;

pub struct TelegramTransport {
    bot_token: String,
    client: reqwest::Client,
    http_timeout: std::time::Duration,
}

impl TelegramTransport {
    pub fn new(bot_token: &SecretString, http_timeout: std::time::Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            bot_token: bot_token.expose_secret().to_string(),
            client,
            http_timeout,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("https://api.telegram.org/file/bot{}/{file_path}", self.bot_token)
    }

    /// POST a JSON body and unwrap the Bot API envelope.
    async fn call(&self, method: &'static str, body: Value) -> Result<Value, TransportError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        method: method.to_string(),
                        timeout: self.http_timeout,
                    }
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let data: Value = resp.json().await.map_err(|e| TransportError::Http(e.to_string()))?;

        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description")
                .to_string();
            if description.contains("chat not found") {
                return Err(TransportError::ChatNotFound(description));
            }
            return Err(TransportError::ApiFailed {
                method: method.to_string(),
                reason: format!("{status}: {description}"),
            });
        }
        Ok(data)
    }

    /// Verify the token against getMe at startup.
    pub async fn health_check(&self) -> Result<(), TransportError> {
        self.call("getMe", json!({})).await.map(|_| ())
    }

    /// Long-poll getUpdates on a background task and expose the result
    /// as a stream of parsed updates.
    pub fn start_updates(&self) -> UpdateStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        // Long-poll requests hold the connection open for POLL_TIMEOUT_SECS,
        // so they need headroom beyond the regular call timeout.
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .unwrap_or_else(|_| self.client.clone());
        let url = self.api_url("getUpdates");

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Listening for updates");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Update poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Update parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                if let Some(results) = data.get("result").and_then(Value::as_array) {
                    for update in results {
                        if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                            offset = uid + 1;
                        }
                        let Some(parsed) = parse_update(update) else {
                            continue;
                        };
                        if tx.send(parsed).is_err() {
                            tracing::info!("Update listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|update| (update, rx))
        }))
    }
}

fn chat_value(chat: &ChatRef) -> Value {
    match chat {
        ChatRef::Id(id) => json!(id),
        ChatRef::Handle(handle) => json!(format!("@{handle}")),
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn copy_message(
        &self,
        destination: &ChatRef,
        source_chat_id: i64,
        message_id: i64,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": chat_value(destination),
            "from_chat_id": source_chat_id,
            "message_id": message_id,
        });
        if let Some(cap) = caption {
            body["caption"] = Value::String(cap.to_string());
        }
        self.call("copyMessage", body).await.map(|_| ())
    }

    /// HTML-first send with a plain-text retry, split to the platform's
    /// length limit.
    async fn send_text(&self, destination: &ChatRef, text: &str) -> Result<(), TransportError> {
        for chunk in split_text(text, MAX_MESSAGE_LENGTH) {
            let html_body = json!({
                "chat_id": chat_value(destination),
                "text": chunk,
                "parse_mode": "HTML",
            });
            match self.call("sendMessage", html_body).await {
                Ok(_) => continue,
                Err(TransportError::ApiFailed { .. }) => {
                    tracing::warn!("sendMessage with HTML failed; retrying as plain text");
                }
                Err(e) => return Err(e),
            }

            let plain_body = json!({
                "chat_id": chat_value(destination),
                "text": chunk,
            });
            self.call("sendMessage", plain_body).await?;
        }
        Ok(())
    }

    async fn send_media(
        &self,
        destination: &ChatRef,
        kind: MediaKind,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": chat_value(destination),
            kind.field(): file_id,
        });
        if let Some(cap) = caption
            && kind.captionable()
        {
            body["caption"] = Value::String(cap.to_string());
        }
        self.call(kind.method(), body).await.map(|_| ())
    }

    async fn upload_media(
        &self,
        destination: &ChatRef,
        kind: MediaKind,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<(), TransportError> {
        let file_name = match kind {
            MediaKind::Video => "video.mp4",
            _ => "photo.jpg",
        };
        let part = Part::bytes(bytes).file_name(file_name);
        let mut form = Form::new()
            .text("chat_id", chat_id_text(destination))
            .part(kind.field(), part);
        if let Some(cap) = caption
            && kind.captionable()
        {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url(kind.method()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let reason = resp.text().await.unwrap_or_default();
            return Err(TransportError::ApiFailed {
                method: kind.method().to_string(),
                reason,
            });
        }
        Ok(())
    }

    async fn send_location(
        &self,
        destination: &ChatRef,
        location: &LocationContent,
    ) -> Result<(), TransportError> {
        let body = json!({
            "chat_id": chat_value(destination),
            "latitude": location.latitude,
            "longitude": location.longitude,
        });
        self.call("sendLocation", body).await.map(|_| ())
    }

    async fn send_contact(
        &self,
        destination: &ChatRef,
        contact: &ContactContent,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": chat_value(destination),
            "phone_number": contact.phone_number,
            "first_name": contact.first_name,
        });
        if let Some(last) = &contact.last_name {
            body["last_name"] = Value::String(last.clone());
        }
        self.call("sendContact", body).await.map(|_| ())
    }

    async fn download_media(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let info = self.call("getFile", json!({ "file_id": file_id })).await?;
        let file_path = info
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::DownloadFailed {
                file_ref: file_id.to_string(),
                reason: "getFile returned no file_path".into(),
            })?;

        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::DownloadFailed {
                file_ref: file_id.to_string(),
                reason: format!("file endpoint returned {}", resp.status()),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn chat_id_text(chat: &ChatRef) -> String {
    match chat {
        ChatRef::Id(id) => id.to_string(),
        ChatRef::Handle(handle) => format!("@{handle}"),
    }
}

// ── Update parsing ──────────────────────────────────────────────────

/// Reduce one raw update to a `TransportUpdate`, or `None` when it
/// carries nothing the bot handles.
fn parse_update(update: &Value) -> Option<TransportUpdate> {
    if let Some(post) = update.get("channel_post") {
        return parse_post(post).map(TransportUpdate::Post);
    }

    let message = update.get("message")?;
    let chat_type = message
        .get("chat")
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)?;

    match chat_type {
        "private" => {
            let chat_id = message.get("chat")?.get("id").and_then(Value::as_i64)?;
            let from = message.get("from")?;
            let user_id = from.get("id").and_then(Value::as_i64)?;
            let username = from
                .get("username")
                .and_then(Value::as_str)
                .map(String::from);
            let text = message.get("text").and_then(Value::as_str)?;
            Some(TransportUpdate::Private {
                chat_id,
                user_id,
                username,
                text: text.to_string(),
            })
        }
        "group" | "supergroup" | "channel" => parse_post(message).map(TransportUpdate::Post),
        _ => None,
    }
}

fn parse_post(message: &Value) -> Option<IncomingMessage> {
    let message_id = message.get("message_id").and_then(Value::as_i64)?;
    let chat = message.get("chat")?;
    let source_chat_id = chat.get("id").and_then(Value::as_i64)?;
    let source_chat_handle = chat
        .get("username")
        .and_then(Value::as_str)
        .map(String::from);
    let sender_id = message
        .get("from")
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64);
    let caption = message
        .get("caption")
        .and_then(Value::as_str)
        .map(String::from);
    let buttons = parse_buttons(message);
    let content = parse_content(message)?;

    Some(IncomingMessage {
        message_id,
        source_chat_id,
        source_chat_handle,
        sender_id,
        content,
        caption,
        buttons,
    })
}

fn file_ref(value: &Value) -> Option<FileRef> {
    Some(FileRef {
        file_id: value.get("file_id")?.as_str()?.to_string(),
        unique_id: value.get("file_unique_id")?.as_str()?.to_string(),
    })
}

fn parse_content(message: &Value) -> Option<MessageContent> {
    if let Some(text) = message.get("text").and_then(Value::as_str) {
        return Some(MessageContent::Text(text.to_string()));
    }
    if let Some(sizes) = message.get("photo").and_then(Value::as_array) {
        // Largest size last.
        return file_ref(sizes.last()?).map(MessageContent::Photo);
    }
    if let Some(video) = message.get("video") {
        return file_ref(video).map(MessageContent::Video);
    }
    if let Some(audio) = message.get("audio") {
        return file_ref(audio).map(MessageContent::Audio);
    }
    if let Some(voice) = message.get("voice") {
        return file_ref(voice).map(MessageContent::Voice);
    }
    if let Some(note) = message.get("video_note") {
        return file_ref(note).map(MessageContent::VideoNote);
    }
    if let Some(doc) = message.get("document") {
        return file_ref(doc).map(MessageContent::Document);
    }
    if let Some(sticker) = message.get("sticker") {
        return file_ref(sticker).map(MessageContent::Sticker);
    }
    if let Some(animation) = message.get("animation") {
        return file_ref(animation).map(MessageContent::Animation);
    }
    if let Some(poll) = message.get("poll") {
        let question = poll.get("question")?.as_str()?.to_string();
        let options = poll
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| o.get("text").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        return Some(MessageContent::Poll(PollContent { question, options }));
    }
    if let Some(location) = message.get("location") {
        return Some(MessageContent::Location(LocationContent {
            latitude: location.get("latitude")?.as_f64()?,
            longitude: location.get("longitude")?.as_f64()?,
        }));
    }
    if let Some(contact) = message.get("contact") {
        return Some(MessageContent::Contact(ContactContent {
            phone_number: contact.get("phone_number")?.as_str()?.to_string(),
            first_name: contact
                .get("first_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            last_name: contact
                .get("last_name")
                .and_then(Value::as_str)
                .map(String::from),
        }));
    }
    None
}

fn parse_buttons(message: &Value) -> Vec<ButtonRow> {
    message
        .get("reply_markup")
        .and_then(|m| m.get("inline_keyboard"))
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .map(|row| {
                    row.iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .map(String::from)
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Split text into chunks within the length limit, preferring newline
/// then space boundaries.
fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Back off to a char boundary before slicing.
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &remaining[..cut];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .unwrap_or(cut);
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_includes_token_and_method() {
        let transport = TelegramTransport::new(
            &SecretString::from("123:ABC"),
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            transport.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn parse_channel_post_text() {
        let update = json!({
            "update_id": 7,
            "channel_post": {
                "message_id": 42,
                "chat": { "id": -1001, "type": "channel", "username": "newschan" },
                "text": "breaking news"
            }
        });
        let Some(TransportUpdate::Post(msg)) = parse_update(&update) else {
            panic!("expected a post");
        };
        assert_eq!(msg.message_id, 42);
        assert_eq!(msg.source_chat_id, -1001);
        assert_eq!(msg.source_chat_handle.as_deref(), Some("newschan"));
        assert_eq!(msg.content, MessageContent::Text("breaking news".into()));
    }

    #[test]
    fn parse_photo_takes_largest_size() {
        let update = json!({
            "update_id": 1,
            "channel_post": {
                "message_id": 1,
                "chat": { "id": -1, "type": "channel" },
                "photo": [
                    { "file_id": "small", "file_unique_id": "u-small" },
                    { "file_id": "big", "file_unique_id": "u-big" }
                ],
                "caption": "look"
            }
        });
        let Some(TransportUpdate::Post(msg)) = parse_update(&update) else {
            panic!("expected a post");
        };
        let MessageContent::Photo(file) = &msg.content else {
            panic!("expected a photo");
        };
        assert_eq!(file.file_id, "big");
        assert_eq!(msg.caption.as_deref(), Some("look"));
    }

    #[test]
    fn parse_private_text_message() {
        let update = json!({
            "update_id": 2,
            "message": {
                "message_id": 5,
                "chat": { "id": 555, "type": "private" },
                "from": { "id": 555, "username": "alice" },
                "text": "/newtask"
            }
        });
        let Some(TransportUpdate::Private { chat_id, user_id, username, text }) =
            parse_update(&update)
        else {
            panic!("expected a private message");
        };
        assert_eq!(chat_id, 555);
        assert_eq!(user_id, 555);
        assert_eq!(username.as_deref(), Some("alice"));
        assert_eq!(text, "/newtask");
    }

    #[test]
    fn parse_group_message_with_sender() {
        let update = json!({
            "update_id": 3,
            "message": {
                "message_id": 9,
                "chat": { "id": -200, "type": "supergroup" },
                "from": { "id": 77 },
                "text": "hello group"
            }
        });
        let Some(TransportUpdate::Post(msg)) = parse_update(&update) else {
            panic!("expected a post");
        };
        assert_eq!(msg.sender_id, Some(77));
    }

    #[test]
    fn parse_poll_and_buttons() {
        let update = json!({
            "update_id": 4,
            "channel_post": {
                "message_id": 3,
                "chat": { "id": -1, "type": "channel" },
                "poll": {
                    "question": "Best day?",
                    "options": [ { "text": "Sat" }, { "text": "Sun" } ]
                },
                "reply_markup": {
                    "inline_keyboard": [[ { "text": "Vote", "url": "https://x" } ]]
                }
            }
        });
        let Some(TransportUpdate::Post(msg)) = parse_update(&update) else {
            panic!("expected a post");
        };
        let MessageContent::Poll(poll) = &msg.content else {
            panic!("expected a poll");
        };
        assert_eq!(poll.question, "Best day?");
        assert_eq!(poll.options, vec!["Sat".to_string(), "Sun".to_string()]);
        assert_eq!(msg.buttons, vec![vec!["Vote".to_string()]]);
    }

    #[test]
    fn unsupported_update_yields_none() {
        let update = json!({
            "update_id": 5,
            "message": {
                "message_id": 8,
                "chat": { "id": -2, "type": "group" },
                "new_chat_members": []
            }
        });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn chat_value_forms() {
        assert_eq!(chat_value(&ChatRef::Id(-100)), json!(-100));
        assert_eq!(chat_value(&ChatRef::Handle("chan".into())), json!("@chan"));
    }

    #[test]
    fn split_text_short_passthrough() {
        assert_eq!(split_text("hi", 4096), vec!["hi".to_string()]);
    }

    #[test]
    fn split_text_prefers_newlines() {
        let text = format!("{}\n{}", "a".repeat(10), "b".repeat(10));
        let chunks = split_text(&text, 15);
        assert_eq!(chunks, vec!["a".repeat(10), "b".repeat(10)]);
    }

    #[test]
    fn split_text_respects_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = split_text(&text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }
}
