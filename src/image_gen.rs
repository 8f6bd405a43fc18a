use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    openai::{DownloadError, ImageRequest, OpenAiClient},
};

/// Remote image generation plus retrieval of the generated file.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// `None` means no image; the text recommendation stands on its own.
    async fn generate(&self, image_prompt: &str) -> Option<String>;
    async fn download(&self, url: &str) -> Result<Bytes, DownloadError>;
}

pub struct ImageGenerator {
    client: OpenAiClient,
    model: String,
    size: String,
    quality: String,
    download_timeout: Duration,
}

impl ImageGenerator {
    pub fn new(client: OpenAiClient, config: &Config) -> Self {
        Self {
            client,
            model: config.image_model.clone(),
            size: config.image_size.clone(),
            quality: config.image_quality.clone(),
            download_timeout: config.download_timeout,
        }
    }

    pub fn build_request(&self, image_prompt: &str) -> ImageRequest {
        ImageRequest {
            model: self.model.clone(),
            prompt: enhance_prompt(image_prompt),
            size: self.size.clone(),
            quality: self.quality.clone(),
            n: 1,
        }
    }
}

#[async_trait]
impl ImageBackend for ImageGenerator {
    async fn generate(&self, image_prompt: &str) -> Option<String> {
        let preview: String = image_prompt.chars().take(100).collect();
        info!("🎨 Generating outfit illustration with prompt: {}", preview);
        match self.client.generate_image(&self.build_request(image_prompt)).await {
            Ok(url) => {
                info!("✅ Outfit illustration generated");
                Some(url)
            }
            Err(e) => {
                error!("❌ Image generation failed: {}", e);
                None
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Bytes, DownloadError> {
        let bytes = self.client.fetch_bytes(url, self.download_timeout).await.map_err(|e| {
            warn!("⚠️ Image download failed: {}", e);
            e
        })?;
        info!("📥 Downloaded generated image ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

pub fn enhance_prompt(image_prompt: &str) -> String {
    format!(
        "Fashion illustration style, {image_prompt}.
    The image should be a stylish fashion sketch or illustration showing the complete outfit.
    Do NOT include realistic human faces - use a fashion illustration style with minimal or stylized facial features.
    Clean white or soft gradient background. Professional fashion magazine quality."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn generator_for(server: &MockServer) -> ImageGenerator {
        let config = Config {
            api_key: Some("sk-test".to_string()),
            api_base: server.uri(),
            ..Config::default()
        };
        ImageGenerator::new(OpenAiClient::new(&config).unwrap(), &config)
    }

    #[test]
    fn template_wraps_prompt() {
        let prompt = enhance_prompt("pastel cool-tone campus outfit");
        assert!(prompt.starts_with("Fashion illustration style, pastel cool-tone campus outfit."));
        assert!(prompt.contains("Do NOT include realistic human faces"));
        assert!(prompt.contains("complete outfit"));
        assert!(prompt.contains("Clean white or soft gradient background"));
    }

    #[test]
    fn request_asks_for_exactly_one_image() {
        let config = Config::default();
        let request = ImageGenerator::new(OpenAiClient::new(&config).unwrap(), &config).build_request("x");
        assert_eq!(request.n, 1);
        assert_eq!(request.size, "1024x1024");
        assert_eq!(request.quality, "standard");
        assert_eq!(request.model, "dall-e-3");
    }

    #[tokio::test]
    async fn generate_returns_hosted_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .and(body_partial_json(json!({"n": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"url": "https://images.example/a.png", "revised_prompt": "..."}]
            })))
            .mount(&server)
            .await;

        let url = generator_for(&server).generate("campus outfit").await;
        assert_eq!(url.as_deref(), Some("https://images.example/a.png"));
    }

    #[tokio::test]
    async fn remote_failure_means_no_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Your request was rejected by the safety system."}
            })))
            .mount(&server)
            .await;

        assert_eq!(generator_for(&server).generate("campus outfit").await, None);
    }

    #[tokio::test]
    async fn download_404_is_explicit_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/expired.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = generator_for(&server).download(&format!("{}/expired.png", server.uri())).await;
        assert_eq!(result, Err(DownloadError::Status(404)));
    }

    #[tokio::test]
    async fn download_returns_bytes_as_fetched() {
        let server = MockServer::start().await;
        let jpeg = b"\xff\xd8\xff\xe0 not re-encoded".to_vec();
        Mock::given(method("GET"))
            .and(path("/outfit.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(jpeg.clone()))
            .mount(&server)
            .await;

        let bytes = generator_for(&server).download(&format!("{}/outfit.jpg", server.uri())).await.unwrap();
        assert_eq!(&bytes[..], &jpeg[..]);
    }
}
