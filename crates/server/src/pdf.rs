//! Quotation documents.
//!
//! HTML is rendered from a Tera template; PDF conversion shells out to wkhtmltopdf when it is
//! available and falls back to returning the HTML otherwise. Every conversion works inside its
//! own temporary directory, which is removed when the call returns on any path.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tera::{Context, Tera};
use tokio::process::Command;
use tracing::{error, info, warn};

use cotizador_core::config::RenderingConfig;
use cotizador_core::domain::quotation::QuotationInput;
use cotizador_core::pricing::ProcessedQuotation;

pub const QUOTATION_TEMPLATE: &str = "quotation.html.tera";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("could not embed quotation data: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output of a PDF request.
#[derive(Debug)]
pub enum PdfResult {
    Pdf(Vec<u8>),
    Html(String),
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// `processed` drives the visible document; `source` is embedded verbatim for later
    /// reconstruction.
    fn render_html(
        &self,
        processed: &ProcessedQuotation,
        source: &QuotationInput,
    ) -> Result<String, RenderError>;

    async fn render_pdf(&self, html: &str) -> Result<PdfResult, RenderError>;
}

#[derive(Clone, Debug)]
pub struct QuotationRenderer {
    tera: Tera,
    from_disk: bool,
    company_name: String,
    logo_uri: Option<String>,
    wkhtmltopdf_path: Option<PathBuf>,
}

impl QuotationRenderer {
    /// Loads templates from `template_dir` when it holds the quotation template, otherwise uses
    /// the one compiled into the binary.
    pub fn from_config(config: &RenderingConfig) -> Result<Self, RenderError> {
        let template_dir = Path::new(&config.template_dir);
        let from_disk = template_dir.join(QUOTATION_TEMPLATE).is_file();
        let tera = if from_disk {
            let glob = format!("{}/**/*.tera", config.template_dir.trim_end_matches('/'));
            let mut tera = Tera::new(&glob).map_err(|e| RenderError::Template(e.to_string()))?;
            tera.autoescape_on(vec![".html.tera", ".html"]);
            tera
        } else {
            warn!(
                template_dir = %config.template_dir,
                "quotation template not found on disk, using the embedded copy"
            );
            embedded_tera()?
        };

        let wkhtmltopdf_path = config
            .wkhtmltopdf_path
            .clone()
            .filter(|path| path.is_file())
            .or_else(|| which::which("wkhtmltopdf").ok());

        match &wkhtmltopdf_path {
            Some(path) => info!(path = %path.display(), "wkhtmltopdf found"),
            None => warn!("wkhtmltopdf not found in PATH - PDF requests will return HTML"),
        }

        let logo_uri = config
            .logo_path
            .as_ref()
            .and_then(|path| path.canonicalize().ok())
            .map(|path| format!("file://{}", path.display()));

        Ok(Self {
            tera,
            from_disk,
            company_name: config.company_name.clone(),
            logo_uri,
            wkhtmltopdf_path,
        })
    }

    /// Embedded template, no converter.
    pub fn embedded(company_name: impl Into<String>) -> Result<Self, RenderError> {
        Ok(Self {
            tera: embedded_tera()?,
            from_disk: false,
            company_name: company_name.into(),
            logo_uri: None,
            wkhtmltopdf_path: None,
        })
    }

    pub fn uses_disk_template(&self) -> bool {
        self.from_disk
    }

    pub fn converter_path(&self) -> Option<&Path> {
        self.wkhtmltopdf_path.as_deref()
    }

    async fn convert_html_to_pdf(
        &self,
        html: &str,
        wkhtmltopdf_path: &Path,
    ) -> Result<Vec<u8>, RenderError> {
        let workdir = tempfile::Builder::new().prefix("cotizacion-").tempdir()?;
        let html_path = workdir.path().join("document.html");
        let pdf_path = workdir.path().join("document.pdf");

        tokio::fs::write(&html_path, html).await?;

        let output = Command::new(wkhtmltopdf_path)
            .args(["--page-size", "Letter"])
            .args(["--margin-top", "0.5in", "--margin-bottom", "0.5in"])
            .args(["--margin-left", "0.75in", "--margin-right", "0.75in"])
            .args(["--encoding", "utf-8"])
            .arg("--enable-local-file-access")
            .arg("--quiet")
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "wkhtmltopdf failed");
            return Err(RenderError::Conversion(stderr.trim().to_string()));
        }

        let pdf_bytes = tokio::fs::read(&pdf_path).await?;
        info!(size = pdf_bytes.len(), "PDF generated successfully");

        Ok(pdf_bytes)
    }
}

#[async_trait]
impl DocumentRenderer for QuotationRenderer {
    fn render_html(
        &self,
        processed: &ProcessedQuotation,
        source: &QuotationInput,
    ) -> Result<String, RenderError> {
        // `</` inside the embedded JSON would close the script element early.
        let source_json = serde_json::to_string(source)?.replace("</", "<\\/");

        let mut context = Context::new();
        context.insert("quotation", processed);
        context.insert("source_json", &source_json);
        context.insert("company_name", &self.company_name);
        context.insert("logo_uri", &self.logo_uri);

        self.tera
            .render(QUOTATION_TEMPLATE, &context)
            .map_err(|e| RenderError::Template(e.to_string()))
    }

    async fn render_pdf(&self, html: &str) -> Result<PdfResult, RenderError> {
        let Some(wkhtmltopdf) = self.wkhtmltopdf_path.as_deref() else {
            return Ok(PdfResult::Html(html.to_string()));
        };

        match self.convert_html_to_pdf(html, wkhtmltopdf).await {
            Ok(pdf_bytes) => Ok(PdfResult::Pdf(pdf_bytes)),
            Err(e) => {
                warn!(error = %e, "PDF conversion failed, falling back to HTML");
                Ok(PdfResult::Html(html.to_string()))
            }
        }
    }
}

fn embedded_tera() -> Result<Tera, RenderError> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![".html.tera", ".html"]);
    tera.add_raw_template(
        QUOTATION_TEMPLATE,
        include_str!("../../../templates/quotation.html.tera"),
    )
    .map_err(|e| RenderError::Template(e.to_string()))?;
    Ok(tera)
}

/// `<folio>_<cliente>.pdf` with every character outside `[A-Za-z0-9]` in the client name
/// replaced by `_`.
pub fn pdf_filename(folio: &str, cliente: &str) -> String {
    let cliente: String =
        cliente.chars().map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' }).collect();
    format!("{folio}_{cliente}.pdf")
}

impl PdfResult {
    pub fn into_response(self, filename: &str) -> Response {
        match self {
            PdfResult::Pdf(bytes) => {
                let disposition = HeaderValue::from_str(&format!(
                    "attachment; filename=\"{filename}\""
                ))
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
                (
                    StatusCode::OK,
                    [
                        (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
                        (header::CONTENT_DISPOSITION, disposition),
                    ],
                    Body::from(bytes),
                )
                    .into_response()
            }
            PdfResult::Html(html) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
                Body::from(html),
            )
                .into_response(),
        }
    }
}
