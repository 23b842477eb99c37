use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for QuotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationStatus {
    Draft,
    Sent,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "sent" => Some(Self::Sent),
            _ => None,
        }
    }
}

/// A single quoted line. Amounts are exact decimals; JSON carries them as numbers.
///
/// The number form passes through `f64` on the way out, so stored amounts stay exact up to about
/// 15 significant digits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub clave: String,
    pub descripcion: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub cantidad: Decimal,
    #[serde(rename = "precioUnitario", with = "rust_decimal::serde::float")]
    pub precio_unitario: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub titulo: String,
    pub items: Vec<Item>,
}

/// Authoritative structured quotation, as produced by `schema::validate`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationInput {
    pub cliente: String,
    pub fecha: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folio: Option<String>,
    pub secciones: Vec<Section>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notas: Option<Vec<String>>,
}

impl QuotationInput {
    /// Candidate folio after trimming; empty strings count as absent.
    pub fn requested_folio(&self) -> Option<&str> {
        self.folio.as_deref().map(str::trim).filter(|folio| !folio.is_empty())
    }

    pub fn item_count(&self) -> usize {
        self.secciones.iter().map(|section| section.items.len()).sum()
    }

    pub fn with_folio(mut self, folio: impl Into<String>) -> Self {
        self.folio = Some(folio.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationRecord {
    pub id: QuotationId,
    pub user_id: UserId,
    pub folio: String,
    pub cliente: String,
    pub fecha: NaiveDate,
    pub status: QuotationStatus,
    pub html: String,
    pub json_data: QuotationInput,
    pub conversation_history: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written when a record is created; the store assigns id and timestamps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewQuotation {
    pub user_id: UserId,
    pub folio: String,
    pub html: String,
    pub json_data: QuotationInput,
    pub conversation_history: Option<String>,
}

/// Fields overwritten on every finalize of an existing record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotationUpdate {
    pub folio: String,
    pub html: String,
    pub json_data: QuotationInput,
    pub conversation_history: Option<String>,
}

/// Appends one dated line to an accumulated conversation history.
pub fn append_history(
    existing: Option<&str>,
    instruction: &str,
    at: DateTime<Utc>,
) -> Option<String> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return existing.map(ToOwned::to_owned);
    }

    let line = format!("{} | {}", at.to_rfc3339(), instruction.replace('\n', " "));
    match existing.filter(|history| !history.trim().is_empty()) {
        Some(history) => Some(format!("{history}\n{line}")),
        None => Some(line),
    }
}
