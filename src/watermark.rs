//! Watermark collaborator — stamps text onto image bytes via an
//! external HTTP service. Dispatch falls back to unwatermarked delivery
//! when this fails.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::error::TransportError;
use crate::model::WatermarkSpec;

#[async_trait]
pub trait Watermarker: Send + Sync {
    /// Returns the watermarked image bytes.
    async fn apply(&self, image: Vec<u8>, spec: &WatermarkSpec) -> Result<Vec<u8>, TransportError>;
}

pub struct HttpWatermarker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWatermarker {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Watermarker for HttpWatermarker {
    async fn apply(&self, image: Vec<u8>, spec: &WatermarkSpec) -> Result<Vec<u8>, TransportError> {
        let part = Part::bytes(image).file_name("image.jpg");
        let form = Form::new()
            .part("image", part)
            .text("text", spec.text.clone())
            .text("position", spec.position.as_str());

        let resp = self
            .client
            .post(format!("{}/watermark", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(TransportError::ApiFailed {
                method: "watermark".into(),
                reason: format!("endpoint returned {}", resp.status()),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| TransportError::Http(e.to_string()))?;
        if bytes.is_empty() {
            return Err(TransportError::ApiFailed {
                method: "watermark".into(),
                reason: "endpoint returned an empty image".into(),
            });
        }
        Ok(bytes.to_vec())
    }
}
