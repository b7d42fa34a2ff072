//! Translation collaborator — narrow HTTP contract, never blocks
//! delivery: callers fall back to the untranslated text on any error.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::is_supported_language;
use crate::error::TransportError;

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, TransportError>;
}

/// LibreTranslate-style HTTP endpoint.
pub struct HttpTranslator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranslator {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, target_lang: &str) -> Result<String, TransportError> {
        if !is_supported_language(target_lang) {
            return Err(TransportError::ApiFailed {
                method: "translate".into(),
                reason: format!("unsupported target language {target_lang}"),
            });
        }

        let body = json!({
            "q": text,
            "source": "auto",
            "target": target_lang,
            "format": "text",
        });
        let resp = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(TransportError::ApiFailed {
                method: "translate".into(),
                reason: format!("endpoint returned {}", resp.status()),
            });
        }

        let data: Value = resp.json().await.map_err(|e| TransportError::Http(e.to_string()))?;
        data.get("translatedText")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or(TransportError::ApiFailed {
                method: "translate".into(),
                reason: "response carried no translatedText".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_language_is_rejected_without_io() {
        let translator = HttpTranslator::new(reqwest::Client::new(), "http://localhost:1".into());
        let result = translator.translate("hello", "xx").await;
        assert!(matches!(result, Err(TransportError::ApiFailed { .. })));
    }
}
