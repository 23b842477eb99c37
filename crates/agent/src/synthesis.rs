use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use cotizador_core::domain::quotation::QuotationInput;

use crate::extraction::{extract_candidate, ExtractionError};
use crate::llm::{CompletionError, CompletionRequest, LlmClient};
use crate::prompts::{build_reconstruction_prompt, build_user_prompt, system_prompt};

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("could not encode the current quotation into the prompt: {0}")]
    Prompt(#[from] serde_json::Error),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Everything one synthesis call needs. `prior` is present only when editing.
#[derive(Clone, Copy, Debug)]
pub struct SynthesisRequest<'a> {
    pub instruction: &'a str,
    pub prior: Option<&'a QuotationInput>,
    pub history: Option<&'a str>,
    pub today: NaiveDate,
}

pub struct SynthesisAdapter {
    client: Arc<dyn LlmClient>,
    temperature: f32,
}

impl SynthesisAdapter {
    pub fn new(client: Arc<dyn LlmClient>, temperature: f32) -> Self {
        Self { client, temperature }
    }

    pub fn completion_request(
        &self,
        request: &SynthesisRequest<'_>,
    ) -> Result<CompletionRequest, SynthesisError> {
        Ok(CompletionRequest {
            system: system_prompt(request.today),
            prompt: build_user_prompt(request.instruction, request.prior, request.history)?,
            temperature: self.temperature,
        })
    }

    /// Raw completion text; callers decide when to extract.
    pub async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<String, SynthesisError> {
        let completion = self.completion_request(&request)?;
        debug!(
            event_name = "synthesis.requested",
            provider = self.client.provider(),
            editing = request.prior.is_some(),
            "requesting quotation draft"
        );
        Ok(self.client.complete(&completion).await?)
    }

    /// Synthesizes and extracts the candidate in one step.
    pub async fn draft(&self, request: SynthesisRequest<'_>) -> Result<Value, SynthesisError> {
        let raw = self.synthesize(request).await?;
        Ok(extract_candidate(&raw)?)
    }

    /// Reads a rendered document back into a candidate.
    pub async fn reconstruct(&self, html: &str, today: NaiveDate) -> Result<Value, SynthesisError> {
        let completion = CompletionRequest {
            system: system_prompt(today),
            prompt: build_reconstruction_prompt(html),
            temperature: self.temperature,
        };
        let raw = self.client.complete(&completion).await?;
        Ok(extract_candidate(&raw)?)
    }
}
