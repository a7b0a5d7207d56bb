// Gemini `generateContent` transport for all three oracles.

use std::sync::Once;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::OracleSection;
use crate::error::{FitroomError, OracleError};
use crate::pricing::TokenUsage;
use crate::prompt;
use crate::types::{FitRecommendation, ImageData, Measurements, SizeChart};

use super::{FitOracle, GeneratedImage, GenerationRequest, ImageOracle, MeasurementOracle};

const DEFAULT_CAPTION: &str = "Here's how it looks!";

static CRYPTO_PROVIDER: Once = Once::new();

pub(crate) fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        // Another component may already have installed one.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    image_model: String,
    text_model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, image_model: String, text_model: String) -> Self {
        install_crypto_provider();
        Self {
            client: Client::new(),
            api_key,
            base_url: OracleSection::default().base_url,
            image_model,
            text_model,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Build a client from the `[oracle]` section. The API key is read from
    /// the configured environment variable.
    pub fn from_config(section: &OracleSection) -> crate::error::Result<Self> {
        let api_key = std::env::var(&section.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                OracleError::Unavailable(format!(
                    "{} is not set. Please check the application setup.",
                    section.api_key_env
                ))
            })?;

        install_crypto_provider();
        let client = Client::builder()
            .timeout(section.timeout())
            .build()
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            image_model: section.image_model.clone(),
            text_model: section.text_model.clone(),
        })
    }

    pub fn text_model(&self) -> &str {
        &self.text_model
    }

    fn endpoint(&self, model: &str) -> String {
        let path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{path}:generateContent", self.base_url)
    }

    async fn post(
        &self,
        model: &str,
        body: &GenerateContentRequest,
    ) -> crate::error::Result<GenerateContentResponse> {
        debug!(model, "Calling Gemini generateContent");

        let resp = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| FitroomError::Oracle(OracleError::Network(e.to_string())))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &text).into());
        }

        resp.json()
            .await
            .map_err(|e| FitroomError::Oracle(OracleError::Parse(e.to_string())))
    }

    async fn generate_json<T: serde::de::DeserializeOwned>(
        &self,
        parts: Vec<RequestPart>,
        schema: serde_json::Value,
    ) -> crate::error::Result<T> {
        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: Some(GenerationConfig {
                response_modalities: None,
                response_mime_type: Some("application/json"),
                response_schema: Some(schema),
            }),
        };
        let response = self.post(&self.text_model, &body).await?;
        let text = interpret_text_response(response)?;
        parse_json_text(&text)
    }
}

#[async_trait::async_trait]
impl ImageOracle for GeminiClient {
    fn model_id(&self) -> &str {
        &self.image_model
    }

    async fn generate(&self, request: &GenerationRequest) -> crate::error::Result<GeneratedImage> {
        let mut parts: Vec<RequestPart> = request.images.iter().map(RequestPart::image).collect();
        parts.push(RequestPart::Text {
            text: request.instruction.clone(),
        });

        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["IMAGE", "TEXT"]),
                response_mime_type: None,
                response_schema: None,
            }),
        };
        let response = self.post(&self.image_model, &body).await?;
        Ok(interpret_image_response(response)?)
    }
}

#[async_trait::async_trait]
impl FitOracle for GeminiClient {
    async fn recommend(
        &self,
        measurements: &Measurements,
        chart: &SizeChart,
    ) -> crate::error::Result<FitRecommendation> {
        let parts = vec![RequestPart::Text {
            text: prompt::fit_instruction(measurements, chart),
        }];
        self.generate_json(parts, fit_schema()).await
    }
}

#[async_trait::async_trait]
impl MeasurementOracle for GeminiClient {
    async fn estimate(&self, photo: &ImageData) -> crate::error::Result<Measurements> {
        let parts = vec![
            RequestPart::image(photo),
            RequestPart::Text {
                text: prompt::MEASUREMENT_INSTRUCTION.to_string(),
            },
        ];
        self.generate_json(parts, measurement_schema()).await
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

impl RequestPart {
    fn image(image: &ImageData) -> Self {
        Self::Inline {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.to_base64(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "inline_data")]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    #[serde(default, alias = "mime_type")]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ── Response interpretation ─────────────────────────────────────────

fn api_error(http_status: u16, body: &str) -> OracleError {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(envelope) => OracleError::from_api_error(
            envelope.error.code.or(Some(http_status)),
            envelope.error.status.as_deref(),
            envelope.error.message.as_deref(),
        ),
        Err(_) => {
            let detail = body.trim();
            let detail = if detail.is_empty() { "empty error body" } else { detail };
            OracleError::from_api_error(Some(http_status), None, Some(detail))
        }
    }
}

fn no_candidates(response: &GenerateContentResponse) -> OracleError {
    let reason = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref());
    match reason {
        Some(reason) => OracleError::EmptyResponse(format!(
            "The AI model did not provide a response (blocked: {reason})."
        )),
        None => OracleError::EmptyResponse(
            "The AI model did not provide a response (e.g., safety block).".to_string(),
        ),
    }
}

fn interpret_image_response(response: GenerateContentResponse) -> Result<GeneratedImage, OracleError> {
    if response.candidates.is_empty() {
        return Err(no_candidates(&response));
    }

    let usage = response
        .usage_metadata
        .as_ref()
        .map_or_else(TokenUsage::default, |u| {
            TokenUsage::new(u.prompt_token_count, u.candidates_token_count, u.total_token_count)
        });

    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    let mut image = None;
    let mut caption: Option<String> = None;
    for part in parts {
        if let Some(inline) = part.inline_data.filter(|d| !d.data.is_empty()) {
            let mime = inline.mime_type.unwrap_or_else(|| "image/png".to_string());
            let decoded = ImageData::from_base64(&inline.data, mime)
                .map_err(|e| OracleError::Parse(e.to_string()))?;
            image = Some(decoded);
        } else if let Some(text) = part.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            caption = Some(text);
        }
    }

    match (image, caption) {
        (Some(image), caption) => Ok(GeneratedImage { image, caption, usage }),
        (None, Some(text)) => Err(OracleError::EmptyResponse(format!(
            "The AI responded with text only: \"{text}\""
        ))),
        (None, None) => Err(OracleError::EmptyResponse(
            "The AI failed to generate an image preview.".to_string(),
        )),
    }
}

fn interpret_text_response(response: GenerateContentResponse) -> Result<String, OracleError> {
    if response.candidates.is_empty() {
        return Err(no_candidates(&response));
    }
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(OracleError::EmptyResponse(
            "The AI returned an empty response.".to_string(),
        ));
    }
    Ok(text)
}

/// Parse a JSON-mode reply, tolerating a Markdown code fence around it.
fn parse_json_text<T: serde::de::DeserializeOwned>(text: &str) -> crate::error::Result<T> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(unfenced)
        .map_err(|e| FitroomError::Oracle(OracleError::Parse(e.to_string())))
}

/// Caption to show for a generated image.
pub fn caption_or_default(caption: Option<&str>) -> String {
    caption.unwrap_or(DEFAULT_CAPTION).to_string()
}

fn fit_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "recommendedSize": { "type": "STRING", "description": "The single best size label, e.g. 'M' or '32x32'." },
            "projectedFit": { "type": "STRING", "description": "A brief, 2-4 word description of the fit." },
            "confidenceScore": { "type": "NUMBER", "description": "A confidence score between 0.0 and 1.0." },
            "alternatives": {
                "type": "ARRAY",
                "description": "Exactly two alternative size options.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "size": { "type": "STRING" },
                        "fit": { "type": "STRING" }
                    },
                    "required": ["size", "fit"]
                }
            }
        },
        "required": ["recommendedSize", "projectedFit", "confidenceScore", "alternatives"]
    })
}

fn measurement_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "height": { "type": "NUMBER", "description": "Estimated height in inches." },
            "weight": { "type": "NUMBER", "description": "Estimated weight in pounds." },
            "chest": { "type": "NUMBER", "description": "Estimated chest circumference in inches." },
            "waist": { "type": "NUMBER", "description": "Estimated waist circumference in inches." }
        },
        "required": ["height", "weight", "chest", "waist"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resolution;

    fn response(raw: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn image_and_usage_are_extracted() {
        let resp = response(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "  Looking sharp.  " },
                { "inlineData": { "mimeType": "image/png", "data": "aW1n" } }
            ]}}],
            "usageMetadata": { "promptTokenCount": 1290, "candidatesTokenCount": 1120, "totalTokenCount": 2410 }
        }));
        let generated = interpret_image_response(resp).unwrap();
        assert_eq!(generated.image.bytes, b"img");
        assert_eq!(generated.caption.as_deref(), Some("Looking sharp."));
        assert_eq!(generated.usage, TokenUsage::new(1290, 1120, Some(2410)));
        assert_eq!(Resolution::estimate(&generated.image), Resolution::OneK);
    }

    #[test]
    fn zero_candidates_is_a_safety_block() {
        let err = interpret_image_response(response(json!({ "candidates": [] }))).unwrap_err();
        assert!(matches!(&err, OracleError::EmptyResponse(m) if m.contains("safety block")));
        assert!(err.is_retryable());

        let err = interpret_image_response(response(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .unwrap_err();
        assert!(err.to_string().contains("blocked: SAFETY"));
    }

    #[test]
    fn text_only_reply_is_reported() {
        let err = interpret_image_response(response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "I can't do that." }] } }]
        })))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The AI responded with text only: \"I can't do that.\""
        );

        let err = interpret_image_response(response(json!({
            "candidates": [{ "content": { "parts": [] } }]
        })))
        .unwrap_err();
        assert_eq!(err.to_string(), "The AI failed to generate an image preview.");
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let generated = interpret_image_response(response(json!({
            "candidates": [{ "content": { "parts": [{ "inline_data": { "data": "aW1n" } }] } }]
        })))
        .unwrap();
        assert_eq!(generated.image.mime_type, "image/png");
        assert_eq!(generated.usage, TokenUsage::default());
        assert!(generated.caption.is_none());
    }

    #[test]
    fn structured_api_errors_map_to_rejections() {
        let err = api_error(
            403,
            r#"{"error": {"code": 403, "status": "PERMISSION_DENIED", "message": "API key invalid"}}"#,
        );
        assert!(!err.is_retryable());

        let err = api_error(500, r#"{"error": {"code": 500, "status": "INTERNAL"}}"#);
        assert!(err.is_retryable());

        let err = api_error(400, "not json");
        assert_eq!(err.to_string(), "AI service error: not json");
    }

    #[test]
    fn json_replies_parse_with_or_without_fences() {
        let m: Measurements =
            parse_json_text("```json\n{\"height\":70,\"weight\":160,\"chest\":40,\"waist\":32}\n```")
                .unwrap();
        assert!((m.height - 70.0).abs() < f64::EPSILON);

        let rec: FitRecommendation = parse_json_text(
            r#"{"recommendedSize":"M","projectedFit":"True to Size","confidenceScore":0.9,
                "alternatives":[{"size":"S","fit":"Snug"},{"size":"L","fit":"Loose"}]}"#,
        )
        .unwrap();
        assert_eq!(rec.alternatives.len(), 2);

        assert!(parse_json_text::<Measurements>("{\"height\": \"tall\"}").is_err());
    }

    #[test]
    fn text_response_concatenates_parts() {
        let text = interpret_text_response(response(json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } }]
        })))
        .unwrap();
        assert_eq!(text, "{\"a\":1}");
        assert!(interpret_text_response(response(json!({ "candidates": [{}] }))).is_err());
    }

    #[test]
    fn request_parts_serialize_images_before_text() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::image(&ImageData::new(b"img".to_vec(), "image/jpeg")),
                    RequestPart::Text { text: "dress".into() },
                ],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["IMAGE", "TEXT"]),
                response_mime_type: None,
                response_schema: None,
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(value["contents"][0]["parts"][0]["inlineData"]["data"], "aW1n");
        assert_eq!(value["contents"][0]["parts"][1]["text"], "dress");
        assert_eq!(value["generationConfig"]["responseModalities"][0], "IMAGE");
        assert!(value["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn missing_key_is_unavailable() {
        let section = OracleSection {
            api_key_env: "FITROOM_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..OracleSection::default()
        };
        let err = GeminiClient::from_config(&section).unwrap_err();
        assert!(matches!(err, FitroomError::Oracle(OracleError::Unavailable(_))));
    }

    #[test]
    fn endpoint_includes_model_path() {
        let client = GeminiClient::new("k".into(), "img".into(), "txt".into())
            .with_base_url("http://localhost:9/v1beta/".into());
        assert_eq!(
            client.endpoint("gemini-2.5-flash"),
            "http://localhost:9/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(client.model_id(), "img");
        assert_eq!(client.text_model(), "txt");
        assert_eq!(caption_or_default(None), "Here's how it looks!");
    }
}
