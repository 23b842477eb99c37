use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use cotizador_core::config::{LlmConfig, LlmProvider};

/// One system-plus-user completion call.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("no API key configured for provider `{provider}`; add one in user settings or set COTIZADOR_LLM_API_KEY")]
    MissingCredential { provider: &'static str },
    #[error("could not reach {provider}: {message}")]
    Transport { provider: &'static str, message: String },
    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    Provider { provider: &'static str, status: u16, message: String },
    #[error("{provider} returned an empty completion")]
    EmptyResponse { provider: &'static str },
    #[error("{provider} returned an unreadable response: {message}")]
    MalformedResponse { provider: &'static str, message: String },
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Provider identity and credential resolved for a single call.
#[derive(Clone, Debug)]
pub struct ProviderSettings {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl ProviderSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            provider: config.provider,
            api_key: config.api_key.clone(),
            base_url: config.effective_base_url().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// A per-user key replaces the configured one when present and non-blank.
    pub fn with_user_key(mut self, user_key: Option<String>) -> Self {
        if let Some(key) = user_key.filter(|key| !key.trim().is_empty()) {
            self.api_key = Some(SecretString::from(key));
        }
        self
    }

    fn credential(&self) -> Result<Option<&str>, CompletionError> {
        let key = self.api_key.as_ref().map(|key| key.expose_secret()).filter(|key| !key.is_empty());
        if key.is_none() && self.provider.requires_api_key() {
            return Err(CompletionError::MissingCredential { provider: self.provider.as_str() });
        }
        Ok(key)
    }
}

/// Builds a client for settings resolved at call time (provider plus the caller's credential).
pub trait LlmClientFactory: Send + Sync {
    fn build(&self, settings: ProviderSettings) -> Result<Arc<dyn LlmClient>, CompletionError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HttpClientFactory;

impl LlmClientFactory for HttpClientFactory {
    fn build(&self, settings: ProviderSettings) -> Result<Arc<dyn LlmClient>, CompletionError> {
        Ok(Arc::new(HttpLlmClient::new(settings)?))
    }
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl HttpLlmClient {
    /// Fails before any network traffic when the provider needs a key and none was resolved.
    pub fn new(settings: ProviderSettings) -> Result<Self, CompletionError> {
        settings.credential()?;
        let http = reqwest::Client::builder().timeout(settings.timeout).build().map_err(|error| {
            CompletionError::Transport {
                provider: settings.provider.as_str(),
                message: error.to_string(),
            }
        })?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn post(
        &self,
        url: String,
        body: Value,
        bearer: Option<&str>,
        header_key: Option<(&'static str, &str)>,
    ) -> Result<String, CompletionError> {
        let provider = self.provider();
        let mut request = self.http.post(url).json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some((name, value)) = header_key {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|error| CompletionError::Transport {
            provider,
            message: error.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|error| CompletionError::Transport {
            provider,
            message: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(CompletionError::Provider {
                provider,
                status: status.as_u16(),
                message: provider_error_message(&text),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    fn provider(&self) -> &'static str {
        self.settings.provider.as_str()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let settings = &self.settings;
        let key = settings.credential()?;
        debug!(
            event_name = "llm.request",
            provider = self.provider(),
            model = %settings.model,
            prompt_chars = request.prompt.len(),
            "sending completion request"
        );

        match settings.provider {
            LlmProvider::Gemini => {
                let url = format!("{}/models/{}:generateContent", settings.base_url, settings.model);
                let body = gemini_body(request);
                let raw = self.post(url, body, None, key.map(|key| ("x-goog-api-key", key))).await?;
                parse_gemini(&raw)
            }
            LlmProvider::OpenAi => {
                let url = format!("{}/chat/completions", settings.base_url);
                let body = openai_body(request, &settings.model);
                let raw = self.post(url, body, key, None).await?;
                parse_openai(&raw)
            }
            LlmProvider::Ollama => {
                let url = format!("{}/api/chat", settings.base_url);
                let body = ollama_body(request, &settings.model);
                let raw = self.post(url, body, key, None).await?;
                parse_ollama(&raw)
            }
        }
    }
}

fn gemini_body(request: &CompletionRequest) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": request.system }] },
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "temperature": request.temperature,
            "responseMimeType": "application/json"
        }
    })
}

fn openai_body(request: &CompletionRequest, model: &str) -> Value {
    json!({
        "model": model,
        "temperature": request.temperature,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt }
        ]
    })
}

fn ollama_body(request: &CompletionRequest, model: &str) -> Value {
    json!({
        "model": model,
        "stream": false,
        "format": "json",
        "options": { "temperature": request.temperature },
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt }
        ]
    })
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: Option<ChatMessage>,
}

fn decode<T: for<'de> Deserialize<'de>>(
    provider: &'static str,
    raw: &str,
) -> Result<T, CompletionError> {
    serde_json::from_str(raw)
        .map_err(|error| CompletionError::MalformedResponse { provider, message: error.to_string() })
}

fn non_empty(provider: &'static str, text: String) -> Result<String, CompletionError> {
    if text.trim().is_empty() {
        Err(CompletionError::EmptyResponse { provider })
    } else {
        Ok(text)
    }
}

fn parse_gemini(raw: &str) -> Result<String, CompletionError> {
    let response: GeminiResponse = decode("gemini", raw)?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();
    non_empty("gemini", text)
}

fn parse_openai(raw: &str) -> Result<String, CompletionError> {
    let response: OpenAiResponse = decode("openai", raw)?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    non_empty("openai", text)
}

fn parse_ollama(raw: &str) -> Result<String, CompletionError> {
    let response: OllamaResponse = decode("ollama", raw)?;
    let text = response.message.and_then(|message| message.content).unwrap_or_default();
    non_empty("ollama", text)
}

/// Pulls `error.message` (Gemini/OpenAI) or `error` (Ollama) out of an error body.
fn provider_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    });

    message.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            "no response body".to_string()
        } else {
            trimmed.chars().take(300).collect()
        }
    })
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use cotizador_core::config::{AppConfig, LlmProvider};

    use super::{
        gemini_body, ollama_body, openai_body, parse_gemini, parse_ollama, parse_openai,
        provider_error_message, CompletionError, CompletionRequest, HttpLlmClient,
        ProviderSettings,
    };

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "system rules".to_string(),
            prompt: "Cliente: Acme".to_string(),
            temperature: 0.3,
        }
    }

    fn settings(provider: LlmProvider) -> ProviderSettings {
        let mut config = AppConfig::default().llm;
        config.provider = provider;
        config.model = provider.default_model().to_string();
        ProviderSettings::from_config(&config)
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let error = HttpLlmClient::new(settings(LlmProvider::Gemini))
            .err()
            .expect("gemini without key must be rejected");

        assert!(matches!(error, CompletionError::MissingCredential { provider: "gemini" }));
        assert!(error.to_string().contains("user settings"));
    }

    #[test]
    fn ollama_runs_without_key_on_local_default() {
        let client = HttpLlmClient::new(settings(LlmProvider::Ollama)).expect("ollama client");

        assert_eq!(client.settings().base_url, "http://localhost:11434");
        assert_eq!(client.settings().model, "llama3.1:8b");
    }

    #[test]
    fn user_key_takes_precedence_over_configured_key() {
        let mut base = settings(LlmProvider::OpenAi);
        base.api_key = Some("configured".to_string().into());

        let resolved = base.clone().with_user_key(Some("personal".to_string()));
        assert_eq!(resolved.api_key.as_ref().map(|key| key.expose_secret()), Some("personal"));

        let blank = base.with_user_key(Some("  ".to_string()));
        assert_eq!(blank.api_key.as_ref().map(|key| key.expose_secret()), Some("configured"));
    }

    #[test]
    fn request_bodies_carry_prompt_and_temperature() {
        let gemini = gemini_body(&request());
        assert_eq!(gemini["systemInstruction"]["parts"][0]["text"], "system rules");
        assert_eq!(gemini["contents"][0]["parts"][0]["text"], "Cliente: Acme");

        let openai = openai_body(&request(), "gpt-4o-mini");
        assert_eq!(openai["messages"][0]["role"], "system");
        assert_eq!(openai["messages"][1]["content"], "Cliente: Acme");

        let ollama = ollama_body(&request(), "llama3.1:8b");
        assert_eq!(ollama["stream"], false);
        assert_eq!(ollama["model"], "llama3.1:8b");
    }

    #[test]
    fn responses_are_reduced_to_completion_text() {
        let gemini = r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]}}]}"#;
        assert_eq!(parse_gemini(gemini).expect("gemini text"), "{\"a\":1}");

        let openai = r#"{"choices":[{"message":{"role":"assistant","content":"{}"}}]}"#;
        assert_eq!(parse_openai(openai).expect("openai text"), "{}");

        let ollama = r#"{"message":{"role":"assistant","content":"{\"b\":2}"},"done":true}"#;
        assert_eq!(parse_ollama(ollama).expect("ollama text"), "{\"b\":2}");
    }

    #[test]
    fn empty_or_garbled_responses_are_typed_errors() {
        assert!(matches!(
            parse_gemini(r#"{"candidates":[]}"#),
            Err(CompletionError::EmptyResponse { provider: "gemini" })
        ));
        assert!(matches!(
            parse_openai("<html>bad gateway</html>"),
            Err(CompletionError::MalformedResponse { provider: "openai", .. })
        ));
    }

    #[test]
    fn provider_error_bodies_are_summarized() {
        assert_eq!(
            provider_error_message(r#"{"error":{"code":429,"message":"Quota exceeded"}}"#),
            "Quota exceeded"
        );
        assert_eq!(provider_error_message(r#"{"error":"model not found"}"#), "model not found");
        assert_eq!(provider_error_message(""), "no response body");
    }
}
