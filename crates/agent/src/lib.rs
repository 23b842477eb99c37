//! Conversational synthesis for quotations.
//!
//! The completion engine is strictly a drafting aid. It turns an instruction (plus the current
//! quotation, when editing) into a candidate JSON document; it never decides folios or totals.
//! Candidates leave this crate untrusted and must pass `cotizador_core::schema::validate`.
//!
//! - `llm` - completion client trait and HTTP providers (Gemini, OpenAI-compatible, Ollama)
//! - `prompts` - system prompt and merge-by-instruction user prompts
//! - `extraction` - tolerant JSON extraction from raw model text
//! - `synthesis` - adapter tying the three together

pub mod extraction;
pub mod llm;
pub mod prompts;
pub mod synthesis;

pub use extraction::{extract_candidate, ExtractionError};
pub use llm::{
    CompletionError, CompletionRequest, HttpClientFactory, HttpLlmClient, LlmClient,
    LlmClientFactory, ProviderSettings,
};
pub use synthesis::{SynthesisAdapter, SynthesisError, SynthesisRequest};
