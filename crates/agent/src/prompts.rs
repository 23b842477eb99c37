use chrono::NaiveDate;

use cotizador_core::domain::quotation::QuotationInput;

const DOCUMENT_SHAPE: &str = r#"{
  "cliente": "string",
  "fecha": "YYYY-MM-DD",
  "folio": "string (only when the user states one)",
  "secciones": [
    {
      "titulo": "string",
      "items": [
        { "clave": "string", "descripcion": "string", "cantidad": number, "precioUnitario": number }
      ]
    }
  ],
  "notas": ["string"] (optional)
}"#;

/// Fixed instructions for the completion engine. `today` stands in for any missing date.
pub fn system_prompt(today: NaiveDate) -> String {
    let today = today.format("%Y-%m-%d");
    format!(
        "You turn requests for commercial quotations into a single JSON document.\n\
         Today is {today}.\n\
         \n\
         Rules:\n\
         - Extract the client name into \"cliente\". When no client is named use \"Mostrador\".\n\
         - Extract the date into \"fecha\" as YYYY-MM-DD. When no date is given use {today}.\n\
         - \"cantidad\" is at least 1; assume 1 when the request gives no quantity.\n\
         - \"precioUnitario\" is the price of one unit.\n\
         - Include \"folio\" only when the user explicitly gives one. Never invent a folio.\n\
         - Fix spelling, accents and grammar in cliente, titulo, descripcion and notas.\n\
         - Numbers are plain JSON numbers without currency symbols or thousands separators.\n\
         - When a current quotation is provided, keep every field the request does not change.\n\
         \n\
         Document shape:\n\
         {DOCUMENT_SHAPE}\n\
         \n\
         Answer with the JSON object only. Do not wrap it in code fences or add any prose."
    )
}

/// New quotations send the instruction as is. Edits embed the full current state ahead of the
/// instruction so the engine merges field by field.
pub fn build_user_prompt(
    instruction: &str,
    prior: Option<&QuotationInput>,
    history: Option<&str>,
) -> Result<String, serde_json::Error> {
    let Some(prior) = prior else {
        return Ok(instruction.to_string());
    };

    let state = serde_json::to_string_pretty(prior)?;
    let mut prompt = String::new();
    if let Some(history) = history.map(str::trim).filter(|history| !history.is_empty()) {
        prompt.push_str("Earlier requests for this quotation:\n");
        prompt.push_str(history);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Current quotation:\n");
    prompt.push_str(&state);
    prompt.push_str("\n\nRequest: ");
    prompt.push_str(instruction);
    prompt.push_str(
        "\n\nApply the request to the current quotation and return the complete updated \
         document. Every field the request does not mention must keep its current value.",
    );
    Ok(prompt)
}

/// Asks the engine to read a previously rendered document back into JSON.
pub fn build_reconstruction_prompt(html: &str) -> String {
    format!(
        "Below is a rendered quotation document in HTML. Read it and return the quotation as a \
         JSON document with the shape described in your instructions.\n\n\
         HTML:\n{html}\n\n\
         Copy the client, folio, date, sections, items and notes exactly as they appear. Do not \
         invent or complete missing data."
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use cotizador_core::domain::quotation::{Item, QuotationInput, Section};

    use super::{build_reconstruction_prompt, build_user_prompt, system_prompt};

    fn prior() -> QuotationInput {
        QuotationInput {
            cliente: "Acme".to_string(),
            fecha: NaiveDate::from_ymd_opt(2026, 3, 1).expect("date"),
            folio: Some("CIC-00004".to_string()),
            secciones: vec![Section {
                titulo: "Servicios".to_string(),
                items: vec![Item {
                    clave: String::new(),
                    descripcion: "Consultoría".to_string(),
                    cantidad: Decimal::new(5, 0),
                    precio_unitario: Decimal::new(100, 0),
                }],
            }],
            notas: None,
        }
    }

    #[test]
    fn system_prompt_pins_date_and_defaults() {
        let prompt = system_prompt(NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"));

        assert!(prompt.contains("Today is 2026-10-19."));
        assert!(prompt.contains("\"Mostrador\""));
        assert!(prompt.contains("Never invent a folio"));
        assert!(prompt.contains("\"precioUnitario\": number"));
    }

    #[test]
    fn new_quotation_prompt_is_the_instruction_verbatim() {
        let prompt = build_user_prompt("Cliente: Acme · 5 horas", None, Some("ignored"))
            .expect("prompt");

        assert_eq!(prompt, "Cliente: Acme · 5 horas");
    }

    #[test]
    fn edit_prompt_embeds_state_then_instruction() {
        let prompt = build_user_prompt("agrega 2 horas más", Some(&prior()), None).expect("prompt");

        let state_at = prompt.find("\"folio\": \"CIC-00004\"").expect("state embedded");
        let request_at = prompt.find("Request: agrega 2 horas más").expect("instruction");
        assert!(state_at < request_at);
        assert!(prompt.contains("must keep its current value"));
        assert!(!prompt.contains("Earlier requests"));
    }

    #[test]
    fn edit_prompt_leads_with_history_when_present() {
        let history = "2026-03-01T12:00:00+00:00 | Cliente: Acme";
        let prompt =
            build_user_prompt("cambia a Globex", Some(&prior()), Some(history)).expect("prompt");

        assert!(prompt.starts_with("Earlier requests for this quotation:\n2026-03-01"));
        assert!(prompt.find(history) < prompt.find("Current quotation:"));
    }

    #[test]
    fn reconstruction_prompt_embeds_document() {
        let prompt = build_reconstruction_prompt("<h1>CIC-00001</h1>");

        assert!(prompt.contains("HTML:\n<h1>CIC-00001</h1>"));
        assert!(prompt.contains("Do not invent"));
    }
}
