//! In-process fakes shared by the service and HTTP tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{json, Value};

use cotizador_agent::{
    CompletionError, CompletionRequest, LlmClient, LlmClientFactory, ProviderSettings,
};

pub(crate) struct ScriptedClient {
    reply: String,
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        Ok(self.reply.clone())
    }
}

/// Hands out clients that always answer with `reply` and records the key each was built with.
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    pub reply: String,
    pub keys_seen: Mutex<Vec<Option<String>>>,
}

impl ScriptedFactory {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self { reply: reply.into(), keys_seen: Mutex::new(Vec::new()) }
    }

    pub fn keys_seen(&self) -> Vec<Option<String>> {
        self.keys_seen.lock().map(|keys| keys.clone()).unwrap_or_default()
    }
}

impl LlmClientFactory for ScriptedFactory {
    fn build(&self, settings: ProviderSettings) -> Result<Arc<dyn LlmClient>, CompletionError> {
        let key = settings.api_key.as_ref().map(|key| key.expose_secret().to_string());
        if let Ok(mut keys) = self.keys_seen.lock() {
            keys.push(key);
        }
        Ok(Arc::new(ScriptedClient { reply: self.reply.clone() }))
    }
}

pub(crate) fn acme_candidate() -> Value {
    json!({
        "cliente": "Acme",
        "fecha": "2026-03-01",
        "secciones": [{
            "titulo": "Servicios",
            "items": [{ "clave": "", "descripcion": "Horas de consultoría", "cantidad": 5, "precioUnitario": 100 }]
        }]
    })
}

pub(crate) fn fenced(candidate: &Value) -> String {
    format!("```json\n{candidate}\n```")
}
