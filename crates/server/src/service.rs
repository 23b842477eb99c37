//! Quotation operations: synthesis, preview, PDF export and the finalize state machine.
//!
//! `QuotationService` is the only component that writes quotation records. Each call is an
//! independent unit; the service holds handles to its collaborators and nothing else.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use cotizador_agent::{
    CompletionError, LlmClientFactory, ProviderSettings, SynthesisAdapter, SynthesisError,
    SynthesisRequest,
};
use cotizador_core::config::{FolioConfig, LlmConfig};
use cotizador_core::domain::quotation::{
    append_history, NewQuotation, QuotationId, QuotationInput, QuotationRecord, QuotationUpdate,
    UserId,
};
use cotizador_core::errors::QuotationError;
use cotizador_core::flows::{FinalizeEvent, FinalizeFlow};
use cotizador_core::folio::{increment_folio, AllocationError, FolioAllocator, FolioLedger};
use cotizador_core::pricing::{compute, ProcessedQuotation};
use cotizador_core::schema::validate;
use cotizador_db::{QuotationRepository, RepositoryError, UserSettingsRepository};

use crate::pdf::{pdf_filename, DocumentRenderer, PdfResult, RenderError};

pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Caller identity plus the id used to correlate log lines of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self { user_id: UserId(user_id.into()), correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FinalizeRequest {
    pub candidate: Value,
    pub quotation_id: Option<QuotationId>,
    /// The instruction that produced the candidate, appended to the record's history.
    pub instruction: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub quotation_id: QuotationId,
    pub folio: String,
    pub created: bool,
    pub total: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Draft {
    pub text: String,
    pub candidate: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub processed: ProcessedQuotation,
    pub html: String,
}

#[derive(Debug)]
pub struct PdfDocument {
    pub filename: String,
    pub result: PdfResult,
}

pub struct QuotationService {
    quotations: Arc<dyn QuotationRepository>,
    user_settings: Arc<dyn UserSettingsRepository>,
    renderer: Arc<dyn DocumentRenderer>,
    llm_clients: Arc<dyn LlmClientFactory>,
    llm: LlmConfig,
    folio: FolioConfig,
}

impl QuotationService {
    pub fn new(
        quotations: Arc<dyn QuotationRepository>,
        user_settings: Arc<dyn UserSettingsRepository>,
        renderer: Arc<dyn DocumentRenderer>,
        llm_clients: Arc<dyn LlmClientFactory>,
        llm: LlmConfig,
        folio: FolioConfig,
    ) -> Self {
        Self { quotations, user_settings, renderer, llm_clients, llm, folio }
    }

    fn allocator(&self) -> FolioAllocator {
        self.folio.allocator()
    }

    /// Provider from configuration, credential from the caller's settings when they have one.
    async fn adapter_for(&self, ctx: &RequestContext) -> Result<SynthesisAdapter, QuotationError> {
        let user_key =
            self.user_settings.llm_api_key(&ctx.user_id).await.map_err(persistence_error)?;
        let settings = ProviderSettings::from_config(&self.llm).with_user_key(user_key);
        let temperature = settings.temperature;
        let client = self.llm_clients.build(settings).map_err(completion_error)?;
        Ok(SynthesisAdapter::new(client, temperature))
    }

    async fn owned_record(
        &self,
        ctx: &RequestContext,
        id: &QuotationId,
    ) -> Result<QuotationRecord, QuotationError> {
        self.quotations
            .find_by_id(&ctx.user_id, id)
            .await
            .map_err(persistence_error)?
            .ok_or_else(|| QuotationError::NotFound { quotation_id: id.0.clone() })
    }

    /// Raw completion text for an instruction. When editing, the record's current state and
    /// history are sent along.
    pub async fn synthesize(
        &self,
        ctx: &RequestContext,
        instruction: &str,
        quotation_id: Option<&QuotationId>,
    ) -> Result<String, QuotationError> {
        let record = match quotation_id {
            Some(id) => Some(self.owned_record(ctx, id).await?),
            None => None,
        };
        let adapter = self.adapter_for(ctx).await?;

        let request = SynthesisRequest {
            instruction,
            prior: record.as_ref().map(|record| &record.json_data),
            history: record.as_ref().and_then(|record| record.conversation_history.as_deref()),
            today: today(),
        };
        let text = adapter.synthesize(request).await.map_err(synthesis_error)?;

        debug!(
            event_name = "quotation.synthesized",
            correlation_id = %ctx.correlation_id,
            user_id = %ctx.user_id,
            editing = quotation_id.is_some(),
            "completion received"
        );
        Ok(text)
    }

    /// Synthesis followed by extraction. The candidate is still untrusted.
    pub async fn draft(
        &self,
        ctx: &RequestContext,
        instruction: &str,
        quotation_id: Option<&QuotationId>,
    ) -> Result<Draft, QuotationError> {
        let text = self.synthesize(ctx, instruction, quotation_id).await?;
        let candidate = cotizador_agent::extract_candidate(&text)
            .map_err(|error| QuotationError::Extraction(error.to_string()))?;
        Ok(Draft { text, candidate })
    }

    /// Reads a previously rendered document back into a validated quotation.
    pub async fn reconstruct(
        &self,
        ctx: &RequestContext,
        html: &str,
    ) -> Result<QuotationInput, QuotationError> {
        let adapter = self.adapter_for(ctx).await?;
        let candidate = adapter.reconstruct(html, today()).await.map_err(synthesis_error)?;
        Ok(validate(&candidate)?)
    }

    /// Validation, computation and rendering only. The folio passes through untouched.
    pub fn preview(&self, candidate: &Value) -> Result<Preview, QuotationError> {
        let input = validate(candidate)?;
        let processed = compute(&input);
        let html = self.renderer.render_html(&processed, &input).map_err(render_error)?;
        Ok(Preview { processed, html })
    }

    pub async fn generate_pdf(&self, candidate: &Value) -> Result<PdfDocument, QuotationError> {
        let input = validate(candidate)?;
        let processed = compute(&input);
        let html = self.renderer.render_html(&processed, &input).map_err(render_error)?;
        let result = self.renderer.render_pdf(&html).await.map_err(render_error)?;
        let filename = pdf_filename(input.requested_folio().unwrap_or("cotizacion"), &input.cliente);
        Ok(PdfDocument { filename, result })
    }

    /// The folio a new quotation would receive right now. Nothing is reserved.
    pub async fn next_folio(&self, ctx: &RequestContext) -> Result<String, QuotationError> {
        self.allocator()
            .allocate(self.quotations.as_ref(), &ctx.user_id, None)
            .await
            .map(|allocation| allocation.folio)
            .map_err(allocation_error)
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        id: &QuotationId,
    ) -> Result<QuotationRecord, QuotationError> {
        self.owned_record(ctx, id).await
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        limit: Option<u32>,
    ) -> Result<Vec<QuotationRecord>, QuotationError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
        self.quotations.list_for_user(&ctx.user_id, limit).await.map_err(persistence_error)
    }

    /// Stores or clears the caller's own completion engine key.
    pub async fn set_llm_api_key(
        &self,
        ctx: &RequestContext,
        api_key: Option<String>,
    ) -> Result<(), QuotationError> {
        let clearing = api_key.as_deref().map_or(true, |key| key.trim().is_empty());
        self.user_settings
            .set_llm_api_key(&ctx.user_id, api_key)
            .await
            .map_err(persistence_error)?;
        info!(
            event_name = "user_settings.llm_key_updated",
            correlation_id = %ctx.correlation_id,
            user_id = %ctx.user_id,
            cleared = clearing,
            "user completion key updated"
        );
        Ok(())
    }

    /// Validates, resolves the folio, renders and persists. Every failure ends the flow in
    /// `Rejected` and is returned as a typed error.
    pub async fn finalize(
        &self,
        ctx: &RequestContext,
        request: FinalizeRequest,
    ) -> Result<FinalizeOutcome, QuotationError> {
        let mut flow = FinalizeFlow::new(ctx.correlation_id.clone());

        match self.run_finalize(&mut flow, ctx, request).await {
            Ok(outcome) => {
                info!(
                    event_name = "quotation.finalized",
                    correlation_id = %ctx.correlation_id,
                    user_id = %ctx.user_id,
                    quotation_id = %outcome.quotation_id,
                    folio = %outcome.folio,
                    created = outcome.created,
                    "quotation finalized"
                );
                Ok(outcome)
            }
            Err(error) => {
                let from = flow.state();
                flow.reject(error.kind().as_str());
                warn!(
                    event_name = "quotation.finalize_rejected",
                    correlation_id = %ctx.correlation_id,
                    user_id = %ctx.user_id,
                    state = ?from,
                    visited = ?flow.visited_states(),
                    error_kind = error.kind().as_str(),
                    error = %error,
                    "quotation finalize rejected"
                );
                Err(error)
            }
        }
    }

    async fn run_finalize(
        &self,
        flow: &mut FinalizeFlow,
        ctx: &RequestContext,
        request: FinalizeRequest,
    ) -> Result<FinalizeOutcome, QuotationError> {
        let input = validate(&request.candidate)?;
        flow.apply(FinalizeEvent::CandidateValidated)?;

        let existing = match &request.quotation_id {
            Some(id) => Some(self.owned_record(ctx, id).await?),
            None => None,
        };
        let mut attempts = 0;
        let folio = match &existing {
            Some(record) => self.resolve_edit_folio(ctx, record, &input).await?,
            None => self.resolve_new_folio(ctx, &input, &mut attempts).await?,
        };
        flow.apply(FinalizeEvent::FolioResolved)?;

        let mut input = input.with_folio(folio.clone());
        let mut processed = compute(&input);
        let mut html = self.renderer.render_html(&processed, &input).map_err(render_error)?;
        flow.apply(FinalizeEvent::DocumentRendered)?;

        let now = Utc::now();
        let instruction = request.instruction.as_deref().unwrap_or_default();
        let record = match existing {
            Some(record) => {
                let history =
                    append_history(record.conversation_history.as_deref(), instruction, now);
                let update = QuotationUpdate {
                    folio: folio.clone(),
                    html,
                    json_data: input,
                    conversation_history: history,
                };
                match self.quotations.update(&ctx.user_id, &record.id, update).await {
                    Ok(record) => record,
                    Err(RepositoryError::Conflict { folio }) => {
                        return Err(self.duplicate_folio(ctx, folio).await)
                    }
                    Err(RepositoryError::NotFound(id)) => {
                        return Err(QuotationError::NotFound { quotation_id: id.0 })
                    }
                    Err(error) => return Err(persistence_error(error)),
                }
            }
            None => {
                let history = append_history(None, instruction, now);
                let mut folio = folio.clone();
                loop {
                    let quotation = NewQuotation {
                        user_id: ctx.user_id.clone(),
                        folio: folio.clone(),
                        html: html.clone(),
                        json_data: input.clone(),
                        conversation_history: history.clone(),
                    };
                    match self.quotations.insert(quotation).await {
                        Ok(record) => break record,
                        Err(RepositoryError::Conflict { folio: taken }) => {
                            if !self.folio.auto_resolve {
                                return Err(self.duplicate_folio(ctx, taken).await);
                            }
                            debug!(
                                event_name = "folio.insert_conflict",
                                correlation_id = %ctx.correlation_id,
                                user_id = %ctx.user_id,
                                folio = %taken,
                                attempt = attempts,
                                "folio taken concurrently, advancing"
                            );
                            folio = self
                                .allocator()
                                .probe(
                                    self.quotations.as_ref(),
                                    &ctx.user_id,
                                    increment_folio(&taken),
                                    &mut attempts,
                                )
                                .await
                                .map_err(allocation_error)?;
                            input = input.with_folio(folio.clone());
                            processed = compute(&input);
                            html = self
                                .renderer
                                .render_html(&processed, &input)
                                .map_err(render_error)?;
                        }
                        Err(error) => return Err(persistence_error(error)),
                    }
                }
            }
        };
        flow.apply(FinalizeEvent::RecordPersisted)?;

        let created = request.quotation_id.is_none();
        flow.apply(FinalizeEvent::ResultReturned)?;

        Ok(FinalizeOutcome {
            quotation_id: record.id,
            folio: record.folio,
            created,
            total: processed.total,
        })
    }

    /// Keeps the stored folio unless the candidate names a different one, which must not belong
    /// to another of the caller's quotations. Edits never advance the folio on their own.
    async fn resolve_edit_folio(
        &self,
        ctx: &RequestContext,
        record: &QuotationRecord,
        input: &QuotationInput,
    ) -> Result<String, QuotationError> {
        match input.requested_folio() {
            Some(requested) if requested != record.folio => {
                let taken = self
                    .quotations
                    .folio_exists(&ctx.user_id, requested)
                    .await
                    .map_err(persistence_error)?;
                if taken {
                    return Err(self.duplicate_folio(ctx, requested.to_string()).await);
                }
                Ok(requested.to_string())
            }
            _ => Ok(record.folio.clone()),
        }
    }

    async fn resolve_new_folio(
        &self,
        ctx: &RequestContext,
        input: &QuotationInput,
        attempts: &mut u32,
    ) -> Result<String, QuotationError> {
        let allocator = self.allocator();
        let ledger = self.quotations.as_ref();
        let desired = allocator
            .desired_folio(ledger, &ctx.user_id, input.requested_folio())
            .await
            .map_err(persistence_error)?;

        if self.folio.auto_resolve {
            return allocator
                .probe(ledger, &ctx.user_id, desired, attempts)
                .await
                .map_err(allocation_error);
        }

        *attempts += 1;
        let taken =
            ledger.folio_exists(&ctx.user_id, &desired).await.map_err(persistence_error)?;
        if taken {
            return Err(self.duplicate_folio(ctx, desired).await);
        }
        Ok(desired)
    }

    /// Conflict error carrying the next free folio when one can be found.
    async fn duplicate_folio(&self, ctx: &RequestContext, folio: String) -> QuotationError {
        let suggested_folio = match self
            .allocator()
            .suggest_after(self.quotations.as_ref(), &ctx.user_id, &folio)
            .await
        {
            Ok(suggestion) => suggestion,
            Err(error) => {
                warn!(
                    event_name = "folio.suggestion_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "could not compute a folio suggestion"
                );
                None
            }
        };
        QuotationError::DuplicateFolio { folio, suggested_folio }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn persistence_error(error: RepositoryError) -> QuotationError {
    match error {
        RepositoryError::NotFound(id) => QuotationError::NotFound { quotation_id: id.0 },
        other => QuotationError::Persistence(other.to_string()),
    }
}

fn allocation_error(error: AllocationError<RepositoryError>) -> QuotationError {
    match error {
        AllocationError::Exhausted { last_attempt, attempts } => {
            QuotationError::AllocationExhausted { last_attempt, attempts }
        }
        AllocationError::Ledger(error) => persistence_error(error),
    }
}

fn completion_error(error: CompletionError) -> QuotationError {
    QuotationError::UpstreamCompletion(error.to_string())
}

fn synthesis_error(error: SynthesisError) -> QuotationError {
    match error {
        SynthesisError::Completion(error) => completion_error(error),
        SynthesisError::Extraction(error) => QuotationError::Extraction(error.to_string()),
        SynthesisError::Prompt(error) => QuotationError::Internal(error.to_string()),
    }
}

fn render_error(error: RenderError) -> QuotationError {
    QuotationError::Rendering(error.to_string())
}
