use std::fs;
use std::path::Path;

use cotizador_core::pricing::compute;
use cotizador_core::schema::validate;
use cotizador_server::pdf::{DocumentRenderer, QuotationRenderer};
use serde_json::Value;

use crate::commands::{load_config, CommandResult, EXIT_INPUT, EXIT_QUOTATION};

/// Validates and prices a quotation document, optionally writing its HTML rendering.
pub fn run(file: &Path, output: Option<&Path>) -> CommandResult {
    let config = match load_config("preview") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let raw = match fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "preview",
                "input",
                format!("could not read `{}`: {error}", file.display()),
                EXIT_INPUT,
            );
        }
    };
    let candidate: Value = match serde_json::from_str(&raw) {
        Ok(candidate) => candidate,
        Err(error) => {
            return CommandResult::failure(
                "preview",
                "extraction",
                format!("`{}` is not valid JSON: {error}", file.display()),
                EXIT_QUOTATION,
            );
        }
    };
    let input = match validate(&candidate) {
        Ok(input) => input,
        Err(error) => {
            return CommandResult::failure(
                "preview",
                "validation",
                error.to_string(),
                EXIT_QUOTATION,
            );
        }
    };
    let processed = compute(&input);

    let Some(output) = output else {
        return CommandResult::success(
            "preview",
            format!(
                "{} items for {}: subtotal {}, IVA {}, total {}",
                input.item_count(),
                processed.cliente,
                processed.subtotal,
                processed.iva,
                processed.total
            ),
        );
    };

    let rendered = QuotationRenderer::from_config(&config.rendering)
        .and_then(|renderer| renderer.render_html(&processed, &input));
    let html = match rendered {
        Ok(html) => html,
        Err(error) => {
            return CommandResult::failure("preview", "rendering", error.to_string(), EXIT_QUOTATION);
        }
    };
    if let Err(error) = fs::write(output, html) {
        return CommandResult::failure(
            "preview",
            "output",
            format!("could not write `{}`: {error}", output.display()),
            EXIT_INPUT,
        );
    }

    CommandResult::success(
        "preview",
        format!("rendered total {} to `{}`", processed.total, output.display()),
    )
}
