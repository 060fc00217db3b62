use async_trait::async_trait;
use log::{ debug, info, warn };
use reqwest::StatusCode;
use serde::{ Deserialize, Serialize };
use url::Url;

use super::{ ChatClient, GenerateRequest };
use crate::llm::{ ChatError, LlmConfig, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL };

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
    system_instruction: GeminiSystemInstruction<'a>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize, Debug)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Deserialize, Debug)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize, Debug)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GoogleErrorEnvelope {
    error: GoogleError,
}

#[derive(Deserialize, Debug)]
struct GoogleError {
    #[serde(default)]
    status: Option<String>,
}

fn extract_text(response: &GoogleResponse) -> Option<String> {
    let parts = &response.candidates.first()?.content.as_ref()?.parts;
    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

fn is_resource_exhausted(body: &str) -> bool {
    serde_json
        ::from_str::<GoogleErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.status)
        .map(|s| s == "RESOURCE_EXHAUSTED")
        .unwrap_or(false)
}

pub struct GeminiChatClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(api_key: Option<String>, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        }
    }

    /// A missing key is not an error here; it is reported on the first `generate` call.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let client = Self::new(
            config.api_key.clone(),
            config.completion_model.clone(),
            config.base_url.clone()
        );
        Url::parse(&client.base_url)?;
        Ok(client)
    }

    /// The key travels in the `x-goog-api-key` header, never in the URL.
    fn endpoint(&self) -> Result<Url, ChatError> {
        let url = Url::parse(
            &format!(
                "{}/models/{}:generateContent",
                self.base_url.trim_end_matches('/'),
                self.model
            )
        )?;
        Ok(url)
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<Option<String>, ChatError> {
        let api_key = self.api_key.as_deref().ok_or(ChatError::MissingApiKey)?;

        let payload = GenerateContentRequest {
            contents: request.turns
                .iter()
                .map(|turn| GeminiContent {
                    role: turn.role.as_str(),
                    parts: vec![GeminiPart { text: &turn.text }],
                })
                .collect(),
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiPart { text: &request.system_instruction }],
            },
        };

        info!(
            "GeminiChatClient::generate() → model={} turns={}",
            self.model,
            request.turns.len()
        );

        let response = self.http
            .post(self.endpoint()?)
            .header(API_KEY_HEADER, api_key)
            .json(&payload)
            .send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || is_resource_exhausted(&body) {
                warn!("Gemini quota exceeded (HTTP {})", status.as_u16());
                return Err(ChatError::RateLimited { status: status.as_u16(), body });
            }
            return Err(ChatError::Api { status: status.as_u16(), body });
        }

        let parsed: GoogleResponse = response.json().await?;
        let text = extract_text(&parsed);
        debug!("Gemini returned {} chars", text.as_ref().map(|t| t.len()).unwrap_or(0));
        Ok(text)
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::Turn;
    use crate::models::chat::Role;
    use serde_json::json;
    use wiremock::matchers::{ header, method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    const MODEL_PATH: &str = "/models/gemini-test:generateContent";

    fn client_for(server: &MockServer, api_key: Option<&str>) -> GeminiChatClient {
        GeminiChatClient::new(
            api_key.map(str::to_string),
            Some("gemini-test".to_string()),
            Some(server.uri())
        )
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            turns: vec![
                Turn::new(Role::User, "hi"),
                Turn::new(Role::Model, "hello!"),
                Turn::new(Role::User, "how are you?")
            ],
            system_instruction: "be nice".to_string(),
        }
    }

    #[test]
    fn defaults() {
        let client = GeminiChatClient::new(Some("k".into()), None, None);
        assert_eq!(client.get_model(), DEFAULT_GEMINI_MODEL);
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn rejects_bad_base_url() {
        let config = LlmConfig {
            base_url: Some("not a url".into()),
            ..LlmConfig::default()
        };
        assert!(matches!(GeminiChatClient::from_config(&config), Err(ChatError::Url(_))));
    }

    #[test]
    fn concatenates_parts() {
        let parsed: GoogleResponse = serde_json
            ::from_value(
                json!({
                "candidates": [{ "content": { "role": "model", "parts": [{"text": "a"}, {"text": "b"}] } }]
            })
            )
            .unwrap();
        assert_eq!(extract_text(&parsed), Some("ab".to_string()));
        assert_eq!(extract_text(&GoogleResponse::default()), None);
    }

    #[tokio::test]
    async fn sends_turns_and_system_instruction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(header(API_KEY_HEADER, "secret"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    json!({
                    "candidates": [{ "content": { "role": "model", "parts": [{"text": "great, thanks"}] } }]
                })
                )
            )
            .expect(1)
            .mount(&server).await;

        let text = client_for(&server, Some("secret")).generate(&request()).await.unwrap();
        assert_eq!(text.as_deref(), Some("great, thanks"));

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].url.query(), None);
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be nice");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "how are you?");
    }

    #[tokio::test]
    async fn empty_candidates_yield_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server).await;

        let text = client_for(&server, Some("secret")).generate(&request()).await.unwrap();
        assert_eq!(text, None);
    }

    #[tokio::test]
    async fn missing_key_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server).await;

        let err = client_for(&server, None).generate(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::MissingApiKey));

        let err = client_for(&server, Some("  ")).generate(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::MissingApiKey));
    }

    #[tokio::test]
    async fn transport_errors_do_not_leak_key() {
        let client = GeminiChatClient::new(
            Some("SENTINEL-KEY-42".to_string()),
            None,
            Some("http://127.0.0.1:9".to_string())
        );
        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::Http(_)));

        let logged = format!("Completion failed: {} / {:?}", err, err);
        assert!(!logged.contains("SENTINEL-KEY-42"), "key leaked: {}", logged);
    }

    #[tokio::test]
    async fn maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server).await;

        let err = client_for(&server, Some("secret")).generate(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::RateLimited { status: 429, .. }));
    }

    #[tokio::test]
    async fn maps_resource_exhausted_body_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(
                    json!({
                    "error": { "code": 403, "message": "quota", "status": "RESOURCE_EXHAUSTED" }
                })
                )
            )
            .mount(&server).await;

        let err = client_for(&server, Some("secret")).generate(&request()).await.unwrap_err();
        assert!(matches!(err, ChatError::RateLimited { status: 403, .. }));
    }

    #[tokio::test]
    async fn other_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server).await;

        let err = client_for(&server, Some("secret")).generate(&request()).await.unwrap_err();
        match err {
            ChatError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
