use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    encoder::{encode_photo, PhotoError},
    models::{ColorTone, Occasion, RecommendationResult, Season, UserRequest},
    openai::{ChatMessage, ChatRequest, ContentPart, ImageUrl, OpenAiClient, OpenAiError},
};

pub const IMAGE_PROMPT_START: &str = "IMAGE_PROMPT_START";
pub const IMAGE_PROMPT_END: &str = "IMAGE_PROMPT_END";

const SYSTEM_PROMPT: &str = "你是一位專業的時尚穿搭顧問 AI。根據使用者提供的資訊，生成詳細的穿搭建議。

你的回覆必須包含以下格式：

## 穿搭建議

### 整體風格
[描述整體穿搭風格和氛圍]

### 單品清單
- **上衣**: [具體描述]
- **下身**: [具體描述]
- **外套**: [如需要，具體描述]
- **鞋款**: [具體描述]
- **配件**: [具體描述]

### 穿搭理由
[解釋為何這套穿搭適合使用者的需求，包含季節性、場合適合度、配色協調性]

---
IMAGE_PROMPT_START
[用英文寫一段適合 DALL-E 生成穿搭示意圖的 prompt，描述一個時尚插畫風格的全身穿搭圖，不要包含真實人臉，使用 fashion illustration style]
IMAGE_PROMPT_END
";

const PHOTO_NOTE: &str = "請參考上傳的照片來判斷適合的風格和色彩。";

/// Hard failure: no recommendation text was produced.
#[derive(Debug, Error)]
pub enum RecommendationError {
    #[error(transparent)]
    Remote(#[from] OpenAiError),
    #[error(transparent)]
    Photo(#[from] PhotoError),
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &UserRequest) -> Result<RecommendationResult, RecommendationError>;
}

pub struct RecommendationGenerator {
    client: OpenAiClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl RecommendationGenerator {
    pub fn new(client: OpenAiClient, config: &Config) -> Self {
        Self {
            client,
            model: config.chat_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn build_request(&self, request: &UserRequest) -> Result<ChatRequest, PhotoError> {
        let mut parts = Vec::new();
        if let Some(photo) = &request.photo {
            let inline = encode_photo(photo)?;
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: inline.data_url(), detail: Some("low") },
            });
        }
        parts.push(ContentPart::Text { text: user_text(request) });

        Ok(ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(parts)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })
    }
}

#[async_trait]
impl TextGenerator for RecommendationGenerator {
    async fn generate(&self, request: &UserRequest) -> Result<RecommendationResult, RecommendationError> {
        info!(
            "🎯 Generating recommendation: season={} occasion={} color={} photo={}",
            request.season.as_str(),
            request.occasion.as_str(),
            request.color_tone.as_str(),
            request.photo.is_some()
        );
        let chat = self.build_request(request)?;
        let response = self.client.chat_completion(&chat).await.map_err(|e| {
            error!("❌ Recommendation generation failed: {}", e);
            e
        })?;
        let result = parse_response(&response, request.season, request.occasion, request.color_tone);
        info!("✅ Recommendation generated ({} chars)", result.recommendation_text.len());
        Ok(result)
    }
}

pub fn user_text(request: &UserRequest) -> String {
    let image_context = if request.photo.is_some() { PHOTO_NOTE } else { "" };
    format!(
        "\n{image_context}\n\n使用者風格需求: {}\n季節: {}\n場合: {}\n色調偏好: {}\n\n請根據以上資訊生成穿搭建議。\n",
        request.style_text,
        request.season.label(),
        request.occasion.label(),
        request.color_tone.label(),
    )
}

pub fn fallback_image_prompt(season: Season, occasion: Occasion, color_tone: ColorTone) -> String {
    format!(
        "Fashion illustration of a stylish outfit for {} {}, {} color palette, full body fashion sketch style, no face details, elegant and modern, white background",
        season.as_str(),
        occasion.as_str(),
        color_tone.as_str()
    )
}

/// Splits a chat response into the user-facing recommendation and the image prompt.
///
/// Responses without a well-formed `IMAGE_PROMPT_START ... IMAGE_PROMPT_END` block are kept
/// whole and get a prompt built from the selections instead.
pub fn parse_response(
    response: &str,
    season: Season,
    occasion: Occasion,
    color_tone: ColorTone,
) -> RecommendationResult {
    let start = response.find(IMAGE_PROMPT_START);
    let end = response.find(IMAGE_PROMPT_END);

    match (start, end) {
        (Some(start), Some(end)) if end >= start + IMAGE_PROMPT_START.len() => {
            let image_prompt = response[start + IMAGE_PROMPT_START.len()..end].trim();
            let recommendation = response[..start].trim_end();
            let recommendation = recommendation
                .strip_suffix("---")
                .unwrap_or(recommendation)
                .trim();
            RecommendationResult {
                recommendation_text: recommendation.to_string(),
                image_prompt: image_prompt.to_string(),
            }
        }
        _ => {
            warn!("⚠️ Image prompt markers missing, using fallback prompt");
            RecommendationResult {
                recommendation_text: response.to_string(),
                image_prompt: fallback_image_prompt(season, occasion, color_tone),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(text: &str) -> RecommendationResult {
        parse_response(text, Season::Spring, Occasion::Campus, ColorTone::Cool)
    }

    fn request(photo: Option<Bytes>) -> UserRequest {
        UserRequest {
            style_text: "韓系大學生風".to_string(),
            season: Season::Spring,
            occasion: Occasion::Campus,
            color_tone: ColorTone::Cool,
            photo,
        }
    }

    #[test]
    fn splits_campus_example() {
        let result = parse(
            "...建議內容...\n---\nIMAGE_PROMPT_START\nFashion illustration, pastel cool-tone campus outfit\nIMAGE_PROMPT_END\n",
        );
        assert_eq!(result.recommendation_text, "...建議內容...");
        assert_eq!(result.image_prompt, "Fashion illustration, pastel cool-tone campus outfit");
    }

    #[test]
    fn keeps_multiline_prompt_and_handles_missing_separator() {
        let result = parse("## 穿搭建議\n\n內容\n\nIMAGE_PROMPT_START\nline one\nline two\nIMAGE_PROMPT_END");
        assert_eq!(result.recommendation_text, "## 穿搭建議\n\n內容");
        assert_eq!(result.image_prompt, "line one\nline two");
    }

    #[test]
    fn empty_sentinel_block_yields_empty_prompt() {
        let result = parse("text\n---\nIMAGE_PROMPT_START\n   \nIMAGE_PROMPT_END");
        assert_eq!(result.recommendation_text, "text");
        assert_eq!(result.image_prompt, "");
    }

    #[test]
    fn text_after_end_marker_is_dropped() {
        let result = parse("rec\nIMAGE_PROMPT_START p IMAGE_PROMPT_END\ntrailing chatter");
        assert_eq!(result.recommendation_text, "rec");
        assert_eq!(result.image_prompt, "p");
    }

    #[test]
    fn no_markers_falls_back_to_selection_prompt() {
        let response = "  Just some advice without markers.\n";
        let result = parse(response);
        assert_eq!(result.recommendation_text, response);
        assert_eq!(
            result.image_prompt,
            "Fashion illustration of a stylish outfit for spring campus, cool color palette, full body fashion sketch style, no face details, elegant and modern, white background"
        );
    }

    #[test]
    fn single_or_reversed_marker_falls_back() {
        let only_start = parse("advice IMAGE_PROMPT_START prompt");
        assert_eq!(only_start.recommendation_text, "advice IMAGE_PROMPT_START prompt");
        assert_eq!(only_start.image_prompt, fallback_image_prompt(Season::Spring, Occasion::Campus, ColorTone::Cool));

        let reversed = parse("IMAGE_PROMPT_END advice IMAGE_PROMPT_START");
        assert_eq!(reversed.recommendation_text, "IMAGE_PROMPT_END advice IMAGE_PROMPT_START");
        assert!(!reversed.image_prompt.is_empty());
    }

    #[test]
    fn fallback_differs_per_selection() {
        let a = fallback_image_prompt(Season::Winter, Occasion::Work, ColorTone::Monochrome);
        assert!(a.contains("winter work, monochrome color palette"));
    }

    #[test]
    fn user_text_lists_labels_and_photo_note() {
        let plain = user_text(&request(None));
        assert!(plain.contains("使用者風格需求: 韓系大學生風"));
        assert!(plain.contains("季節: 春季"));
        assert!(plain.contains("場合: 校園"));
        assert!(plain.contains("色調偏好: 冷色系"));
        assert!(!plain.contains(PHOTO_NOTE));

        let with_photo = user_text(&request(Some(Bytes::from_static(b"\x89PNG\r\n\x1a\n"))));
        assert!(with_photo.contains(PHOTO_NOTE));
    }

    #[test]
    fn photo_is_attached_as_low_detail_image() {
        let config = Config::default();
        let generator = RecommendationGenerator::new(OpenAiClient::new(&config).unwrap(), &config);
        let chat = generator
            .build_request(&request(Some(Bytes::from_static(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"))))
            .unwrap();
        let value = serde_json::to_value(&chat).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        let parts = &value["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "image_url");
        assert_eq!(parts[0]["image_url"]["detail"], "low");
        assert!(parts[0]["image_url"]["url"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert_eq!(parts[1]["type"], "text");
        assert_eq!(value["max_tokens"], 1500);
    }

    #[test]
    fn unsupported_photo_is_rejected_before_any_call() {
        let config = Config::default();
        let generator = RecommendationGenerator::new(OpenAiClient::new(&config).unwrap(), &config);
        let err = generator.build_request(&request(Some(Bytes::from_static(b"not an image")))).unwrap_err();
        assert_eq!(err, PhotoError::Unsupported);
    }

    #[tokio::test]
    async fn generate_parses_remote_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o", "temperature": 0.7})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "建議\n---\nIMAGE_PROMPT_START\nprompt\nIMAGE_PROMPT_END"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config { api_key: Some("sk-test".into()), api_base: server.uri(), ..Config::default() };
        let generator = RecommendationGenerator::new(OpenAiClient::new(&config).unwrap(), &config);
        let result = generator.generate(&request(None)).await.unwrap();
        assert_eq!(result, RecommendationResult {
            recommendation_text: "建議".to_string(),
            image_prompt: "prompt".to_string(),
        });
    }

    #[tokio::test]
    async fn remote_failure_is_a_hard_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let config = Config { api_key: Some("sk-test".into()), api_base: server.uri(), ..Config::default() };
        let generator = RecommendationGenerator::new(OpenAiClient::new(&config).unwrap(), &config);
        let err = generator.generate(&request(None)).await.unwrap_err();
        assert!(matches!(err, RecommendationError::Remote(OpenAiError::Api { status: 500, .. })));
        assert!(err.to_string().contains("upstream exploded"));
    }
}
