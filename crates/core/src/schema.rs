//! Structural validation of candidate quotations.
//!
//! `validate` turns an untrusted JSON value (a user edit or a completion engine response) into a
//! [`QuotationInput`]. It checks types, required fields and numeric constraints and never repairs
//! data: a candidate either conforms or is rejected with the path of the first offending field.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::domain::quotation::{Item, QuotationInput, Section};
use crate::pricing::checked_total;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingField,
    WrongType,
    ConstraintViolation,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MissingField => "missing field",
            Self::WrongType => "wrong type",
            Self::ConstraintViolation => "constraint violation",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("{kind} at `{path}`: {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub path: String,
    pub message: String,
}

impl ValidationError {
    fn missing(path: &str) -> Self {
        Self {
            kind: ValidationErrorKind::MissingField,
            path: path.to_string(),
            message: "field is required".to_string(),
        }
    }

    fn wrong_type(path: &str, expected: &str, found: &Value) -> Self {
        Self {
            kind: ValidationErrorKind::WrongType,
            path: path.to_string(),
            message: format!("expected {expected}, found {}", type_name(found)),
        }
    }

    fn constraint(path: &str, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationErrorKind::ConstraintViolation,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate(raw: &Value) -> Result<QuotationInput, ValidationError> {
    let root = as_object(raw, "$")?;

    let cliente = required_string(root, "cliente", "cliente")?;
    if cliente.trim().is_empty() {
        return Err(ValidationError::constraint("cliente", "must not be empty"));
    }

    let fecha_raw = required_string(root, "fecha", "fecha")?;
    let fecha = NaiveDate::parse_from_str(fecha_raw.trim(), "%Y-%m-%d").map_err(|_| {
        ValidationError::constraint("fecha", format!("`{fecha_raw}` is not a YYYY-MM-DD date"))
    })?;

    let folio = optional_string(root, "folio", "folio")?;

    let secciones_value = root.get("secciones").ok_or_else(|| ValidationError::missing("secciones"))?;
    let secciones = as_array(secciones_value, "secciones")?
        .iter()
        .enumerate()
        .map(|(index, value)| section(value, &format!("secciones[{index}]")))
        .collect::<Result<Vec<_>, _>>()?;
    check_amount_range(&secciones)?;

    let notas = match root.get("notas") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            as_array(value, "notas")?
                .iter()
                .enumerate()
                .map(|(index, note)| match note {
                    Value::String(text) => Ok(text.clone()),
                    other => Err(ValidationError::wrong_type(
                        &format!("notas[{index}]"),
                        "string",
                        other,
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };

    Ok(QuotationInput { cliente, fecha, folio, secciones, notas })
}

fn section(value: &Value, path: &str) -> Result<Section, ValidationError> {
    let object = as_object(value, path)?;
    let titulo = required_string(object, "titulo", &format!("{path}.titulo"))?;

    let items_path = format!("{path}.items");
    let items_value = object.get("items").ok_or_else(|| ValidationError::missing(&items_path))?;
    let items = as_array(items_value, &items_path)?
        .iter()
        .enumerate()
        .map(|(index, value)| item(value, &format!("{items_path}[{index}]")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Section { titulo, items })
}

fn item(value: &Value, path: &str) -> Result<Item, ValidationError> {
    let object = as_object(value, path)?;

    let clave = optional_string(object, "clave", &format!("{path}.clave"))?.unwrap_or_default();
    let descripcion = required_string(object, "descripcion", &format!("{path}.descripcion"))?;

    let cantidad_path = format!("{path}.cantidad");
    let cantidad = required_decimal(object, "cantidad", &cantidad_path)?;
    if cantidad <= Decimal::ZERO {
        return Err(ValidationError::constraint(&cantidad_path, "must be greater than zero"));
    }

    let precio_path = format!("{path}.precioUnitario");
    let precio_unitario = required_decimal(object, "precioUnitario", &precio_path)?;
    if precio_unitario.is_sign_negative() && !precio_unitario.is_zero() {
        return Err(ValidationError::constraint(&precio_path, "must not be negative"));
    }

    Ok(Item { clave, descripcion, cantidad, precio_unitario })
}

// Every line amount, the running subtotal and the IVA total must fit in a `Decimal`.
fn check_amount_range(secciones: &[Section]) -> Result<(), ValidationError> {
    let mut subtotal = Decimal::ZERO;
    for (section_index, section) in secciones.iter().enumerate() {
        for (item_index, item) in section.items.iter().enumerate() {
            subtotal = item
                .cantidad
                .checked_mul(item.precio_unitario)
                .and_then(|importe| subtotal.checked_add(importe))
                .ok_or_else(|| {
                    ValidationError::constraint(
                        &format!("secciones[{section_index}].items[{item_index}]"),
                        "amount exceeds the representable range",
                    )
                })?;
        }
    }

    match checked_total(subtotal) {
        Some(_) => Ok(()),
        None => Err(ValidationError::constraint(
            "secciones",
            "total with IVA exceeds the representable range",
        )),
    }
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ValidationError> {
    value.as_object().ok_or_else(|| ValidationError::wrong_type(path, "object", value))
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, ValidationError> {
    value.as_array().ok_or_else(|| ValidationError::wrong_type(path, "array", value))
}

fn required_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<String, ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ValidationError::missing(path)),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(ValidationError::wrong_type(path, "string", other)),
    }
}

// `null` reads as absent for optional fields.
fn optional_string(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(ValidationError::wrong_type(path, "string", other)),
    }
}

fn required_decimal(
    object: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Decimal, ValidationError> {
    match object.get(key) {
        None | Some(Value::Null) => Err(ValidationError::missing(path)),
        Some(Value::Number(number)) => decimal_from_number(number).ok_or_else(|| {
            ValidationError {
                kind: ValidationErrorKind::WrongType,
                path: path.to_string(),
                message: format!("number `{number}` cannot be represented as a decimal amount"),
            }
        }),
        Some(other) => Err(ValidationError::wrong_type(path, "number", other)),
    }
}

/// Reads the number from its JSON text so `0.1` stays exactly one tenth.
pub fn decimal_from_number(number: &Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
