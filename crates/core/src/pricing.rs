use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::quotation::{Item, QuotationInput};

/// Fixed IVA rate (16%).
pub const IVA_RATE: Decimal = Decimal::from_parts(16, 0, 0, false, 2);

pub const DEFAULT_NOTES: &[&str] = &["60% anticipo, 40% contra aviso de entrega."];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationTotals {
    pub subtotal: Decimal,
    pub iva: Decimal,
    pub total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub clave: String,
    pub descripcion: String,
    pub cantidad: Decimal,
    #[serde(rename = "precioUnitario")]
    pub precio_unitario: String,
    pub importe: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedSection {
    pub titulo: String,
    pub items: Vec<ProcessedItem>,
}

/// Render-ready view of a quotation. Derived only; never validated or stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedQuotation {
    pub cliente: String,
    pub fecha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folio: Option<String>,
    pub secciones: Vec<ProcessedSection>,
    pub subtotal: String,
    pub iva: String,
    pub total: String,
    pub notas: Vec<String>,
}

pub fn line_amount(item: &Item) -> Decimal {
    item.cantidad * item.precio_unitario
}

pub fn subtotal(input: &QuotationInput) -> Decimal {
    input.secciones.iter().flat_map(|section| section.items.iter()).map(line_amount).sum()
}

pub fn price_quotation(input: &QuotationInput) -> QuotationTotals {
    let subtotal = subtotal(input);
    let iva = iva_for(subtotal);

    QuotationTotals { subtotal, iva, total: subtotal + iva }
}

/// `subtotal` plus IVA, or `None` when the total leaves the decimal range.
pub fn checked_total(subtotal: Decimal) -> Option<Decimal> {
    subtotal.checked_mul(IVA_RATE).map(to_cents).and_then(|iva| subtotal.checked_add(iva))
}

fn iva_for(subtotal: Decimal) -> Decimal {
    to_cents(subtotal * IVA_RATE)
}

/// Derives the processed view. Pure: the same input always yields the same output.
pub fn compute(input: &QuotationInput) -> ProcessedQuotation {
    let totals = price_quotation(input);

    let secciones = input
        .secciones
        .iter()
        .map(|section| ProcessedSection {
            titulo: section.titulo.clone(),
            items: section
                .items
                .iter()
                .map(|item| ProcessedItem {
                    clave: item.clave.clone(),
                    descripcion: item.descripcion.clone(),
                    cantidad: item.cantidad.normalize(),
                    precio_unitario: format_currency(item.precio_unitario),
                    importe: format_currency(line_amount(item)),
                })
                .collect(),
        })
        .collect();

    ProcessedQuotation {
        cliente: input.cliente.clone(),
        fecha: input.fecha.format("%Y-%m-%d").to_string(),
        folio: input.folio.clone(),
        secciones,
        subtotal: format_currency(totals.subtotal),
        iva: format_currency(totals.iva),
        total: format_currency(totals.total),
        notas: effective_notes(input.notas.as_deref()),
    }
}

pub fn effective_notes(notas: Option<&[String]>) -> Vec<String> {
    match notas {
        Some(notas) if !notas.is_empty() => notas.to_vec(),
        _ => DEFAULT_NOTES.iter().map(|note| (*note).to_string()).collect(),
    }
}

fn to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `$` symbol, `,` thousands separator, `.` decimal separator, two decimals.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = to_cents(amount);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let text = format!("{:.2}", rounded.abs());
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}${grouped}.{fraction}")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use crate::domain::quotation::{Item, QuotationInput, Section};

    use super::{checked_total, compute, format_currency, price_quotation, DEFAULT_NOTES};

    fn item(cantidad: Decimal, precio_unitario: Decimal) -> Item {
        Item {
            clave: String::new(),
            descripcion: "Servicio".to_string(),
            cantidad,
            precio_unitario,
        }
    }

    fn input(items: Vec<Item>) -> QuotationInput {
        QuotationInput {
            cliente: "Acme".to_string(),
            fecha: NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date"),
            folio: Some("CIC-00001".to_string()),
            secciones: vec![Section { titulo: "Servicios".to_string(), items }],
            notas: None,
        }
    }

    #[test]
    fn single_item_totals_match_reference_example() {
        let processed = compute(&input(vec![item(Decimal::new(10, 0), Decimal::new(80, 0))]));

        assert_eq!(processed.secciones[0].items[0].importe, "$800.00");
        assert_eq!(processed.secciones[0].items[0].precio_unitario, "$80.00");
        assert_eq!(processed.subtotal, "$800.00");
        assert_eq!(processed.iva, "$128.00");
        assert_eq!(processed.total, "$928.00");
    }

    #[test]
    fn many_fractional_lines_do_not_drift() {
        let items = (0..1_000).map(|_| item(Decimal::ONE, Decimal::new(1, 1))).collect();
        let totals = price_quotation(&input(items));

        assert_eq!(totals.subtotal, Decimal::new(100, 0));
        assert_eq!(totals.iva, Decimal::new(16, 0));
        assert_eq!(totals.total, Decimal::new(116, 0));
    }

    #[test]
    fn total_is_subtotal_plus_sixteen_percent() {
        let totals =
            price_quotation(&input(vec![item(Decimal::new(5, 0), Decimal::new(100, 0))]));

        assert_eq!(totals.total, Decimal::new(580, 0));
        assert_eq!(totals.iva, Decimal::new(80, 0));
        assert_eq!(checked_total(totals.subtotal), Some(totals.total));
    }

    #[test]
    fn checked_total_reports_out_of_range_totals() {
        assert_eq!(checked_total(Decimal::from_i128_with_scale(7 * 10i128.pow(28), 0)), None);
        assert_eq!(checked_total(Decimal::MAX), None);
        assert_eq!(checked_total(Decimal::ZERO), Some(Decimal::ZERO));
    }

    #[test]
    fn default_notes_are_deterministic_and_do_not_touch_input() {
        let source = input(vec![item(Decimal::ONE, Decimal::ONE)]);
        let first = compute(&source);
        let second = compute(&source);

        assert_eq!(first.notas, DEFAULT_NOTES.iter().map(|n| n.to_string()).collect::<Vec<_>>());
        assert_eq!(
            serde_json::to_string(&first.notas).expect("serialize"),
            serde_json::to_string(&second.notas).expect("serialize")
        );
        assert_eq!(source.notas, None);

        let mut empty_notes = source.clone();
        empty_notes.notas = Some(Vec::new());
        assert_eq!(compute(&empty_notes).notas, first.notas);
    }

    #[test]
    fn explicit_notes_are_kept_in_order() {
        let mut source = input(vec![item(Decimal::ONE, Decimal::ONE)]);
        source.notas = Some(vec!["Vigencia 30 días".to_string(), "Precios en MXN".to_string()]);

        assert_eq!(compute(&source).notas, source.notas.clone().expect("notes"));
    }

    #[test]
    fn currency_formatting_groups_thousands() {
        assert_eq!(format_currency(Decimal::ZERO), "$0.00");
        assert_eq!(format_currency(Decimal::new(999, 0)), "$999.00");
        assert_eq!(format_currency(Decimal::new(1_234_567_891, 2)), "$12,345,678.91");
        assert_eq!(format_currency(Decimal::new(1000, 0)), "$1,000.00");
        assert_eq!(format_currency(Decimal::new(12_345, 3)), "$12.35");
        assert_eq!(format_currency(Decimal::new(-15, 1)), "-$1.50");
    }

    #[test]
    fn quantities_are_normalized_for_display() {
        let processed =
            compute(&input(vec![item(Decimal::new(250, 2), Decimal::new(100, 0))]));

        assert_eq!(processed.secciones[0].items[0].cantidad.to_string(), "2.5");
        assert_eq!(processed.secciones[0].items[0].importe, "$250.00");
    }
}
