use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::folio::{
    FolioAllocator, FolioSequence, DEFAULT_FOLIO_PREFIX, DEFAULT_FOLIO_WIDTH, DEFAULT_MAX_ATTEMPTS,
};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub folio: FolioConfig,
    pub rendering: RenderingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FolioConfig {
    pub prefix: String,
    pub width: usize,
    pub max_attempts: u32,
    pub auto_resolve: bool,
}

#[derive(Clone, Debug)]
pub struct RenderingConfig {
    pub template_dir: String,
    pub company_name: String,
    pub logo_path: Option<PathBuf>,
    pub wkhtmltopdf_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub folio_prefix: Option<String>,
    pub folio_auto_resolve: Option<bool>,
    pub template_dir: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["cotizador.toml", "config/cotizador.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cotizador.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: None,
                model: LlmProvider::Gemini.default_model().to_string(),
                temperature: 0.3,
                timeout_secs: 60,
            },
            folio: FolioConfig {
                prefix: DEFAULT_FOLIO_PREFIX.to_string(),
                width: DEFAULT_FOLIO_WIDTH,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                auto_resolve: true,
            },
            rendering: RenderingConfig {
                template_dir: "templates".to_string(),
                company_name: "Cotizador".to_string(),
                logo_path: None,
                wkhtmltopdf_path: None,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAi => "gpt-4o-mini",
            Self::Ollama => "llama3.1:8b",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }

    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl FolioConfig {
    pub fn allocator(&self) -> FolioAllocator {
        FolioAllocator::new(FolioSequence::new(self.prefix.clone(), self.width), self.max_attempts)
    }
}

impl LlmConfig {
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cotizador.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.set_provider(provider);
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(folio) = patch.folio {
            if let Some(prefix) = folio.prefix {
                self.folio.prefix = prefix;
            }
            if let Some(width) = folio.width {
                self.folio.width = width;
            }
            if let Some(max_attempts) = folio.max_attempts {
                self.folio.max_attempts = max_attempts;
            }
            if let Some(auto_resolve) = folio.auto_resolve {
                self.folio.auto_resolve = auto_resolve;
            }
        }

        if let Some(rendering) = patch.rendering {
            if let Some(template_dir) = rendering.template_dir {
                self.rendering.template_dir = template_dir;
            }
            if let Some(company_name) = rendering.company_name {
                self.rendering.company_name = company_name;
            }
            if let Some(logo_path) = rendering.logo_path {
                self.rendering.logo_path = Some(logo_path);
            }
            if let Some(wkhtmltopdf_path) = rendering.wkhtmltopdf_path {
                self.rendering.wkhtmltopdf_path = Some(wkhtmltopdf_path);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    // Switching provider also switches the model unless one was set explicitly afterwards.
    fn set_provider(&mut self, provider: LlmProvider) {
        if self.llm.model == self.llm.provider.default_model() {
            self.llm.model = provider.default_model().to_string();
        }
        self.llm.provider = provider;
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COTIZADOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COTIZADOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_value("COTIZADOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_value("COTIZADOR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZADOR_LLM_PROVIDER") {
            self.set_provider(value.parse()?);
        }
        if let Some(value) = read_env("COTIZADOR_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COTIZADOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("COTIZADOR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("COTIZADOR_LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("COTIZADOR_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("COTIZADOR_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZADOR_FOLIO_PREFIX") {
            self.folio.prefix = value;
        }
        if let Some(value) = read_env("COTIZADOR_FOLIO_WIDTH") {
            self.folio.width = parse_value("COTIZADOR_FOLIO_WIDTH", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_FOLIO_MAX_ATTEMPTS") {
            self.folio.max_attempts = parse_value("COTIZADOR_FOLIO_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_FOLIO_AUTO_RESOLVE") {
            self.folio.auto_resolve = parse_value("COTIZADOR_FOLIO_AUTO_RESOLVE", &value)?;
        }

        if let Some(value) = read_env("COTIZADOR_RENDERING_TEMPLATE_DIR") {
            self.rendering.template_dir = value;
        }
        if let Some(value) = read_env("COTIZADOR_RENDERING_COMPANY_NAME") {
            self.rendering.company_name = value;
        }
        if let Some(value) = read_env("COTIZADOR_RENDERING_LOGO_PATH") {
            self.rendering.logo_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("COTIZADOR_RENDERING_WKHTMLTOPDF_PATH") {
            self.rendering.wkhtmltopdf_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("COTIZADOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("COTIZADOR_SERVER_PORT") {
            self.server.port = parse_value("COTIZADOR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_value("COTIZADOR_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("COTIZADOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_value("COTIZADOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("COTIZADOR_LOGGING_LEVEL").or_else(|| read_env("COTIZADOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COTIZADOR_LOGGING_FORMAT").or_else(|| read_env("COTIZADOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.set_provider(llm_provider);
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(folio_prefix) = overrides.folio_prefix {
            self.folio.prefix = folio_prefix;
        }
        if let Some(auto_resolve) = overrides.folio_auto_resolve {
            self.folio.auto_resolve = auto_resolve;
        }
        if let Some(template_dir) = overrides.template_dir {
            self.rendering.template_dir = template_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_folio(&self.folio)?;
        validate_rendering(&self.rendering)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

// The api key may also come from per-user settings at call time, so it is not required here.
fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if let Some(base_url) = llm.base_url.as_deref().filter(|url| !url.trim().is_empty()) {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if let Some(api_key) = &llm.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "llm.api_key must not be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_folio(folio: &FolioConfig) -> Result<(), ConfigError> {
    let prefix = folio.prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ConfigError::Validation(
            "folio.prefix must be a non-empty run of ASCII letters (for example `CIC`)".to_string(),
        ));
    }

    if folio.width == 0 || folio.width > 12 {
        return Err(ConfigError::Validation("folio.width must be in range 1..=12".to_string()));
    }

    if folio.max_attempts == 0 || folio.max_attempts > 10_000 {
        return Err(ConfigError::Validation(
            "folio.max_attempts must be in range 1..=10000".to_string(),
        ));
    }

    Ok(())
}

fn validate_rendering(rendering: &RenderingConfig) -> Result<(), ConfigError> {
    if rendering.template_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "rendering.template_dir must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    folio: Option<FolioPatch>,
    rendering: Option<RenderingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FolioPatch {
    prefix: Option<String>,
    width: Option<usize>,
    max_attempts: Option<u32>,
    auto_resolve: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderingPatch {
    template_dir: Option<String>,
    company_name: Option<String>,
    logo_path: Option<PathBuf>,
    wkhtmltopdf_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
