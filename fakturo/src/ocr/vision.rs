use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::error::FakturoError;
use crate::models::{EngineType, FieldMap, FieldValue};

use super::engine::{EngineError, EngineOutput, ExtractionRequest, OcrEngine};
use super::fields::InvoiceFieldParser;

/// Recognition confidence assumed when the model answers with plain text
/// instead of the requested JSON.
const PLAIN_TEXT_CONFIDENCE: f64 = 0.75;

const PROMPT: &str = "You are reading a scanned invoice. Respond with JSON only, no prose: \
{\"text\": <full transcription>, \"fields\": {<name>: {\"value\": <string>, \"confidence\": <0..1>}}}. \
Use these field names when present: invoice_number, issue_date, sale_date, due_date, \
seller_tax_id, buyer_tax_id, net_total, vat_total, gross_total, currency. \
Dates as YYYY-MM-DD, amounts with a dot decimal separator and two decimals.";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct VisionReply {
    #[serde(default)]
    text: String,
    #[serde(default)]
    fields: BTreeMap<String, VisionField>,
}

#[derive(Debug, Deserialize)]
struct VisionField {
    value: serde_json::Value,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Neural OCR through an OpenAI-compatible chat completions endpoint with
/// image input.
pub struct VisionApiEngine {
    name: String,
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    parser: Arc<InvoiceFieldParser>,
}

impl VisionApiEngine {
    pub const DEFAULT_NAME: &'static str = "vision";

    pub fn new(config: &OcrConfig, parser: Arc<InvoiceFieldParser>) -> crate::error::Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            FakturoError::Configuration("OCR_API_KEY required for the vision engine".to_string())
        })?;
        let model = config.vision_model.clone().ok_or_else(|| {
            FakturoError::Configuration(
                "OCR_VISION_MODEL required for the vision engine".to_string(),
            )
        })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        url::Url::parse(&base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                FakturoError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            name: Self::DEFAULT_NAME.to_string(),
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            parser,
        })
    }

    fn build_request(&self, request: &ExtractionRequest) -> ChatRequest {
        let data_url = format!(
            "data:{};base64,{}",
            request.mime_type,
            STANDARD.encode(&request.image)
        );

        ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: format!("{PROMPT} Document language: {}.", request.language),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            max_tokens: 4096,
            temperature: 0.0,
        }
    }

    /// POST with exponential backoff on 429, 5xx and transport errors,
    /// bounded by the caller's timeout.
    async fn send(&self, body: &ChatRequest, budget: Duration) -> Result<String, EngineError> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(budget),
            ..Default::default()
        };

        let endpoint = format!("{}/chat/completions", self.base_url);
        let url = endpoint.as_str();

        backoff::future::retry(policy, move || self.send_once(url, body, budget)).await
    }

    async fn send_once(
        &self,
        url: &str,
        body: &ChatRequest,
        budget: Duration,
    ) -> Result<String, backoff::Error<EngineError>> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(engine = %self.name, error = %e, "Vision API request failed");
                if e.is_timeout() {
                    backoff::Error::transient(EngineError::Timeout(budget))
                } else {
                    backoff::Error::transient(EngineError::Unavailable(e.to_string()))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let parsed: ChatResponse = response.json().await.map_err(|e| {
                backoff::Error::permanent(EngineError::Failed(format!(
                    "Failed to parse response: {e}"
                )))
            })?;
            return parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| {
                    backoff::Error::permanent(EngineError::Failed(
                        "No choices in response".to_string(),
                    ))
                });
        }

        let detail = response.text().await.unwrap_or_default();
        let error = match status {
            StatusCode::TOO_MANY_REQUESTS => {
                backoff::Error::transient(EngineError::Unavailable(format!("rate limited: {detail}")))
            }
            s if s.is_server_error() => {
                backoff::Error::transient(EngineError::Unavailable(format!("{s}: {detail}")))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => backoff::Error::permanent(
                EngineError::Unavailable(format!("credentials rejected ({status})")),
            ),
            s => backoff::Error::permanent(EngineError::Failed(format!("{s}: {detail}"))),
        };
        Err(error)
    }

    fn parse_reply(&self, content: &str) -> (String, FieldMap) {
        let trimmed = strip_code_fence(content);

        match serde_json::from_str::<VisionReply>(trimmed) {
            Ok(reply) => {
                let fields = reply
                    .fields
                    .into_iter()
                    .filter_map(|(name, field)| {
                        let value = match field.value {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Null => return None,
                            other => other.to_string(),
                        };
                        if value.trim().is_empty() {
                            return None;
                        }
                        let confidence = field.confidence.unwrap_or(PLAIN_TEXT_CONFIDENCE);
                        Some((name, FieldValue::new(value.trim(), confidence)))
                    })
                    .collect();
                (reply.text, fields)
            }
            Err(e) => {
                debug!(error = %e, "Vision reply is not JSON; parsing as plain text");
                let text = content.trim().to_string();
                let fields = self.parser.parse_scaled(&text, PLAIN_TEXT_CONFIDENCE);
                (text, fields)
            }
        }
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl OcrEngine for VisionApiEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn engine_type(&self) -> EngineType {
        EngineType::NeuralNet
    }

    fn version(&self) -> &str {
        &self.model
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<EngineOutput, EngineError> {
        if request.is_pdf() {
            return Err(EngineError::Unavailable(
                "vision engine accepts raster images only".to_string(),
            ));
        }

        let started = Instant::now();
        let body = self.build_request(request);
        let content = self.send(&body, request.timeout).await?;
        let (text, fields) = self.parse_reply(&content);

        let overall_confidence = if fields.is_empty() {
            0.0
        } else {
            fields.values().map(|f| f.confidence).sum::<f64>() / fields.len() as f64
        };

        Ok(EngineOutput {
            text,
            fields,
            overall_confidence,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: Option<String>) -> OcrConfig {
        OcrConfig {
            api_key: Some("test-key".to_string()),
            vision_model: Some("gpt-4o-mini".to_string()),
            base_url,
            timeout_secs: 5,
            ..OcrConfig::default()
        }
    }

    fn engine(base_url: String) -> VisionApiEngine {
        VisionApiEngine::new(
            &config(Some(base_url)),
            Arc::new(InvoiceFieldParser::new().unwrap()),
        )
        .unwrap()
    }

    fn png_request(timeout: Duration) -> ExtractionRequest {
        ExtractionRequest::new(vec![0x89u8, b'P', b'N', b'G'], "image/png", "pol", timeout)
    }

    fn chat_reply(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[test]
    fn test_requires_api_key_and_model() {
        let parser = Arc::new(InvoiceFieldParser::new().unwrap());
        let mut cfg = config(None);
        cfg.api_key = None;
        assert!(matches!(
            VisionApiEngine::new(&cfg, parser.clone()),
            Err(FakturoError::Configuration(_))
        ));

        let mut cfg = config(None);
        cfg.vision_model = None;
        assert!(VisionApiEngine::new(&cfg, parser).is_err());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_json_reply_is_mapped_to_fields() {
        let server = MockServer::start().await;
        let content = json!({
            "text": "Faktura FV/1",
            "fields": {
                "invoice_number": {"value": "FV/1", "confidence": 0.96},
                "gross_total": {"value": 123.5, "confidence": 0.9},
                "due_date": {"value": null}
            }
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(&content)))
            .mount(&server)
            .await;

        let output = engine(server.uri())
            .extract(&png_request(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(output.text, "Faktura FV/1");
        assert_eq!(output.fields.len(), 2);
        assert_eq!(output.fields["invoice_number"].value, "FV/1");
        assert_eq!(output.fields["gross_total"].value, "123.5");
        assert!((output.overall_confidence - 0.93).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_plain_text_reply_falls_back_to_parser() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(chat_reply("Invoice No: INV-9\nTotal: 10.00 EUR")),
            )
            .mount(&server)
            .await;

        let output = engine(server.uri())
            .extract(&png_request(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(output.fields["invoice_number"].value, "INV-9");
        assert!(output.overall_confidence <= PLAIN_TEXT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_server_errors_become_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = engine(server.uri())
            .extract(&png_request(Duration::from_millis(300)))
            .await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_bad_request_is_a_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad image"))
            .expect(1)
            .mount(&server)
            .await;

        let result = engine(server.uri())
            .extract(&png_request(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(EngineError::Failed(_))));
    }

    #[tokio::test]
    async fn test_pdf_input_is_declined() {
        let result = engine("http://127.0.0.1:9".to_string())
            .extract(&ExtractionRequest::new(
                b"%PDF".to_vec(),
                "application/pdf",
                "eng",
                Duration::from_secs(1),
            ))
            .await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }
}
