use cotizador_core::config::{AppConfig, LoadOptions};
use cotizador_db::{connect_with_config, migrations};
use cotizador_server::pdf::QuotationRenderer;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_CONFIG};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { EXIT_CONFIG } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

const CHECKS_AFTER_CONFIG: [&str; 4] =
    ["database_connectivity", "llm_credential", "document_template", "pdf_converter"];

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_database(&config));
            checks.push(check_llm_credential(&config));
            checks.extend(check_rendering(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.extend(CHECKS_AFTER_CONFIG.iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        let tables = migrations::managed_tables(&pool).await;
        pool.close().await;
        tables.map_err(|error| format!("failed to inspect schema: {error}"))
    });

    match result {
        Ok(tables) if tables.len() == migrations::MANAGED_TABLES.len() => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`; schema is migrated", config.database.url),
        },
        Ok(_) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Warn,
            details: format!(
                "connected using `{}` but quotation tables are missing; run `cotizador migrate`",
                config.database.url
            ),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn check_llm_credential(config: &AppConfig) -> DoctorCheck {
    let provider = config.llm.provider;
    if !provider.requires_api_key() {
        return DoctorCheck {
            name: "llm_credential",
            status: CheckStatus::Pass,
            details: format!(
                "{} needs no API key; endpoint {}",
                provider.as_str(),
                config.llm.effective_base_url()
            ),
        };
    }

    match &config.llm.api_key {
        Some(_) => DoctorCheck {
            name: "llm_credential",
            status: CheckStatus::Pass,
            details: format!("{} key configured (model {})", provider.as_str(), config.llm.model),
        },
        None => DoctorCheck {
            name: "llm_credential",
            status: CheckStatus::Warn,
            details: format!(
                "no {} key configured; only users with a stored key can draft quotations",
                provider.as_str()
            ),
        },
    }
}

fn check_rendering(config: &AppConfig) -> Vec<DoctorCheck> {
    let renderer = match QuotationRenderer::from_config(&config.rendering) {
        Ok(renderer) => renderer,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "document_template",
                    status: CheckStatus::Fail,
                    details: error.to_string(),
                },
                DoctorCheck {
                    name: "pdf_converter",
                    status: CheckStatus::Skipped,
                    details: "skipped because the template did not load".to_string(),
                },
            ];
        }
    };

    let template_details = if renderer.uses_disk_template() {
        format!("templates loaded from `{}`", config.rendering.template_dir)
    } else {
        "using the embedded quotation template".to_string()
    };
    let converter = match renderer.converter_path() {
        Some(path) => DoctorCheck {
            name: "pdf_converter",
            status: CheckStatus::Pass,
            details: format!("wkhtmltopdf at `{}`", path.display()),
        },
        None => DoctorCheck {
            name: "pdf_converter",
            status: CheckStatus::Warn,
            details: "wkhtmltopdf not found; PDF requests will return HTML".to_string(),
        },
    };

    vec![
        DoctorCheck { name: "document_template", status: CheckStatus::Pass, details: template_details },
        converter,
    ]
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
