//! HTTP surface over `QuotationService`.
//!
//! Callers are identified by the `x-user-id` header set by the upstream auth proxy. Failures are
//! returned as `FailureResult` JSON with a status derived from the error kind.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use cotizador_core::domain::quotation::{QuotationId, QuotationRecord, QuotationStatus};
use cotizador_core::errors::{ErrorKind, QuotationError};
use cotizador_core::pricing::compute;

use crate::service::{FinalizeOutcome, FinalizeRequest, QuotationService, RequestContext};

pub const USER_HEADER: &str = "x-user-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    service: Arc<QuotationService>,
}

pub fn router(service: Arc<QuotationService>) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/finalize", post(finalize))
        .route("/api/preview", post(preview))
        .route("/api/generate-pdf", post(generate_pdf))
        .route("/api/reconstruct", post(reconstruct))
        .route("/api/folio", get(next_folio))
        .route("/api/quotations", get(list_quotations))
        .route("/api/quotations/{id}", get(get_quotation))
        .route("/api/settings/llm-key", put(set_llm_key))
        .with_state(ApiState { service })
}

/// Request context taken from the caller headers.
pub struct Caller(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match user_id {
            Some(user_id) => Ok(Caller(RequestContext::new(user_id, correlation_id))),
            None => Err(ApiError::MissingCaller { correlation_id }),
        }
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[derive(Debug)]
pub enum ApiError {
    MissingCaller { correlation_id: String },
    Quotation { error: QuotationError, correlation_id: String },
}

impl ApiError {
    fn from_service(ctx: &RequestContext) -> impl FnOnce(QuotationError) -> ApiError + '_ {
        move |error| ApiError::Quotation { error, correlation_id: ctx.correlation_id.clone() }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::DuplicateFolio | ErrorKind::AllocationExhausted => StatusCode::CONFLICT,
        ErrorKind::UpstreamCompletion => StatusCode::BAD_GATEWAY,
        ErrorKind::Persistence | ErrorKind::Rendering | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body, correlation_id) = match self {
            ApiError::MissingCaller { correlation_id } => (
                StatusCode::UNAUTHORIZED,
                json!({ "success": false, "error": format!("missing `{USER_HEADER}` header") }),
                correlation_id,
            ),
            ApiError::Quotation { error, correlation_id } => {
                let status = status_for(error.kind());
                if status.is_server_error() {
                    let interface = error.clone().into_interface(correlation_id.clone());
                    error!(
                        event_name = "api.request_failed",
                        correlation_id = %correlation_id,
                        error_kind = error.kind().as_str(),
                        error = %interface,
                        "request failed"
                    );
                }
                let body = serde_json::to_value(error.to_failure()).unwrap_or_else(|_| {
                    json!({ "success": false, "error": error.to_string() })
                });
                (status, body, correlation_id)
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            response.headers_mut().insert(CORRELATION_HEADER, value);
        }
        response
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub message: String,
    pub quotation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeBody {
    #[serde(alias = "data")]
    pub candidate: Value,
    pub quotation_id: Option<String>,
    pub instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentBody {
    #[serde(alias = "data")]
    pub candidate: Value,
}

#[derive(Debug, Deserialize)]
pub struct ReconstructBody {
    pub html: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmKeyBody {
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: FinalizeOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotationSummary {
    pub id: QuotationId,
    pub folio: String,
    pub cliente: String,
    pub fecha: String,
    pub status: QuotationStatus,
    pub total: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&QuotationRecord> for QuotationSummary {
    fn from(record: &QuotationRecord) -> Self {
        Self {
            id: record.id.clone(),
            folio: record.folio.clone(),
            cliente: record.cliente.clone(),
            fecha: record.fecha.format("%Y-%m-%d").to_string(),
            status: record.status,
            total: compute(&record.json_data).total,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}

fn optional_id(raw: Option<String>) -> Option<QuotationId> {
    raw.map(|id| id.trim().to_string()).filter(|id| !id.is_empty()).map(QuotationId)
}

async fn chat(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let quotation_id = optional_id(body.quotation_id);
    let draft = state
        .service
        .draft(&ctx, &body.message, quotation_id.as_ref())
        .await
        .map_err(ApiError::from_service(&ctx))?;
    Ok(Json(draft).into_response())
}

async fn finalize(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<FinalizeBody>,
) -> Result<Response, ApiError> {
    let request = FinalizeRequest {
        candidate: body.candidate,
        quotation_id: optional_id(body.quotation_id),
        instruction: body.instruction,
    };
    let outcome =
        state.service.finalize(&ctx, request).await.map_err(ApiError::from_service(&ctx))?;
    let status = if outcome.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(FinalizeResponse { success: true, outcome })).into_response())
}

async fn preview(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<DocumentBody>,
) -> Result<Response, ApiError> {
    let preview = state.service.preview(&body.candidate).map_err(ApiError::from_service(&ctx))?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
        preview.html,
    )
        .into_response())
}

async fn generate_pdf(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<DocumentBody>,
) -> Result<Response, ApiError> {
    let document =
        state.service.generate_pdf(&body.candidate).await.map_err(ApiError::from_service(&ctx))?;
    Ok(document.result.into_response(&document.filename))
}

async fn reconstruct(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<ReconstructBody>,
) -> Result<Response, ApiError> {
    let input =
        state.service.reconstruct(&ctx, &body.html).await.map_err(ApiError::from_service(&ctx))?;
    Ok(Json(input).into_response())
}

async fn next_folio(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
) -> Result<Response, ApiError> {
    let folio = state.service.next_folio(&ctx).await.map_err(ApiError::from_service(&ctx))?;
    Ok(Json(json!({ "folio": folio })).into_response())
}

async fn list_quotations(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let records =
        state.service.list(&ctx, params.limit).await.map_err(ApiError::from_service(&ctx))?;
    let summaries: Vec<QuotationSummary> = records.iter().map(QuotationSummary::from).collect();
    Ok(Json(summaries).into_response())
}

async fn get_quotation(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record =
        state.service.get(&ctx, &QuotationId(id)).await.map_err(ApiError::from_service(&ctx))?;
    Ok(Json(record).into_response())
}

async fn set_llm_key(
    State(state): State<ApiState>,
    Caller(ctx): Caller,
    Json(body): Json<LlmKeyBody>,
) -> Result<Response, ApiError> {
    state.service.set_llm_api_key(&ctx, body.api_key).await.map_err(ApiError::from_service(&ctx))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use cotizador_core::config::AppConfig;
    use cotizador_db::{InMemoryQuotationRepository, InMemoryUserSettingsRepository};

    use super::{router, CORRELATION_HEADER, USER_HEADER};
    use crate::pdf::QuotationRenderer;
    use crate::service::QuotationService;
    use crate::testing::{acme_candidate, fenced, ScriptedFactory};

    fn app() -> Router {
        let config = AppConfig::default();
        let service = QuotationService::new(
            Arc::new(InMemoryQuotationRepository::new()),
            Arc::new(InMemoryUserSettingsRepository::default()),
            Arc::new(QuotationRenderer::embedded("Cotizador Test").expect("renderer")),
            Arc::new(ScriptedFactory::replying(fenced(&acme_candidate()))),
            config.llm,
            config.folio,
        );
        router(Arc::new(service))
    }

    fn post(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn get(uri: &str, user: &str) -> Request<Body> {
        Request::builder().uri(uri).header(USER_HEADER, user).body(Body::empty()).expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn requests_without_user_header_are_unauthorized() {
        let response = app()
            .oneshot(post("/api/finalize", None, json!({ "candidate": acme_candidate() })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(CORRELATION_HEADER));
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn chat_then_finalize_assigns_first_folio() {
        let app = app();

        let draft = app
            .clone()
            .oneshot(post(
                "/api/chat",
                Some("user-1"),
                json!({ "message": "Cliente: Acme, 5 horas a $100" }),
            ))
            .await
            .expect("chat");
        assert_eq!(draft.status(), StatusCode::OK);
        let draft = json_body(draft).await;

        let finalized = app
            .clone()
            .oneshot(post(
                "/api/finalize",
                Some("user-1"),
                json!({ "candidate": draft["candidate"], "instruction": "Cliente: Acme" }),
            ))
            .await
            .expect("finalize");
        assert_eq!(finalized.status(), StatusCode::CREATED);
        let finalized = json_body(finalized).await;
        assert_eq!(finalized["success"], true);
        assert_eq!(finalized["folio"], "CIC-00001");
        assert_eq!(finalized["total"], "$580.00");

        let id = finalized["quotationId"].as_str().expect("id");
        let record = app
            .clone()
            .oneshot(get(&format!("/api/quotations/{id}"), "user-1"))
            .await
            .expect("get");
        assert_eq!(record.status(), StatusCode::OK);
        assert_eq!(json_body(record).await["folio"], "CIC-00001");

        let folio = app.oneshot(get("/api/folio", "user-1")).await.expect("folio");
        assert_eq!(json_body(folio).await["folio"], "CIC-00002");
    }

    #[tokio::test]
    async fn invalid_candidate_maps_to_unprocessable_entity() {
        let mut candidate = acme_candidate();
        candidate["secciones"][0]["items"][0]["precioUnitario"] = json!(-1);

        let response = app()
            .oneshot(post("/api/finalize", Some("user-1"), json!({ "data": candidate })))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["errorKind"], "validation");
        assert!(body["error"].as_str().expect("message").contains("precioUnitario"));
    }

    #[tokio::test]
    async fn foreign_quotation_is_not_found() {
        let app = app();
        let created = app
            .clone()
            .oneshot(post("/api/finalize", Some("owner"), json!({ "candidate": acme_candidate() })))
            .await
            .expect("create");
        let id = json_body(created).await["quotationId"].as_str().expect("id").to_string();

        let response =
            app.oneshot(get(&format!("/api/quotations/{id}"), "intruder")).await.expect("get");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["errorKind"], "not_found");
    }

    #[tokio::test]
    async fn preview_returns_html_and_listing_stays_empty() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post("/api/preview", Some("user-1"), json!({ "candidate": acme_candidate() })))
            .await
            .expect("preview");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .expect("content type")
            .starts_with("text/html"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        assert!(String::from_utf8_lossy(&bytes).contains("$580.00"));

        let listing = app.oneshot(get("/api/quotations", "user-1")).await.expect("list");
        assert_eq!(json_body(listing).await, json!([]));
    }

    #[tokio::test]
    async fn listing_summarizes_newest_first() {
        let app = app();
        for cliente in ["Acme", "Globex"] {
            let mut candidate = acme_candidate();
            candidate["cliente"] = json!(cliente);
            app.clone()
                .oneshot(post("/api/finalize", Some("user-1"), json!({ "candidate": candidate })))
                .await
                .expect("create");
        }

        let listing = app.oneshot(get("/api/quotations?limit=10", "user-1")).await.expect("list");
        let listing = json_body(listing).await;

        assert_eq!(listing[0]["cliente"], "Globex");
        assert_eq!(listing[0]["folio"], "CIC-00002");
        assert_eq!(listing[1]["total"], "$580.00");
        assert_eq!(listing[1]["status"], "draft");
    }
}
