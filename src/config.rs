use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Fallback API base URL when `API_BASE_URL` is not set
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Global options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct CliArgs {
    /// Base URL of the admin API
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Path to the SQLite file holding stored credentials
    #[arg(short = 's', long, env = "KP_STORAGE_FILE")]
    pub storage: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60")]
    pub request_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL without trailing slash
    pub base_url: String,

    /// Credential storage file
    pub storage_file: PathBuf,

    pub log_level: String,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
}

impl Config {
    /// Resolve configuration once at startup: CLI > ENV (.env included) > defaults
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let storage_file = match args.storage {
            Some(path) => expand_tilde(&path),
            None => default_storage_file()
                .context("Could not determine a data directory; set KP_STORAGE_FILE")?,
        };

        Ok(Config {
            base_url: normalize_base_url(&args.base_url),
            storage_file,
            log_level: args.log_level,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.request_timeout,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("API_BASE_URL is not a valid URL: {}", self.base_url))?;

        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("API_BASE_URL must use http or https: {}", self.base_url);
        }

        if self.http_connect_timeout == 0 || self.http_request_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }

        Ok(())
    }
}

/// Strip trailing slashes so paths can be appended verbatim
fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// `<data dir>/kp-admin/storage.sqlite3`
fn default_storage_file() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("kp-admin").join("storage.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
