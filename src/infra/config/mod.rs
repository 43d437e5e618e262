use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use derive_getters::Getters;
use derive_setters::Setters;
use path_clean::PathClean;
use secrecy::SecretString;
use tracing::{error, info};

use crate::domain::errors::DomainError;

const MIB: u64 = 1024 * 1024;
const KIB: usize = 1024;

#[derive(Debug, Args, Getters, Clone, Copy)]
pub struct RetryConfig {
    ///This is the maximum number of http request
    /// retries that will be made to server incase a network issue occur before any body byte arrives.
    #[arg(short = 'r', long, default_value_t = 3, env = "VAULTDL_MAX_RETRIES")]
    max_no_retries: usize,
    ///Upper bound in seconds of the delay between retries,
    /// NB: retries back off exponentially starting at one second.
    #[arg(short = 'd', long, default_value_t = 10, env = "VAULTDL_RETRY_DELAY")]
    retry_delay_secs: usize,
}

impl RetryConfig {
    pub fn new(max_no_retries: usize, retry_delay_secs: usize) -> Self {
        Self { max_no_retries, retry_delay_secs }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_no_retries: 3, retry_delay_secs: 10 }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HttpConfig {
    #[command(flatten)]
    pub retry: RetryConfig,
    /// Set http basic authentication username used for login to the site.
    #[arg(short = 'U', long, env = "VAULTDL_HTTP_USERNAME")]
    pub username: Option<String>,
    /// Set http basic authentication password to used for login to the site.
    #[arg(short = 'P', long, env = "VAULTDL_HTTP_PASSWORD")]
    pub password: Option<SecretString>,
    ///Maximum http redirects this application will make if need be.
    #[arg(long)]
    pub max_redirects: Option<usize>,
    /// Seconds allowed to establish a connection.
    #[arg(long, default_value_t = 30)]
    pub connect_timeout: u64,
    /// Seconds a connection may stay silent before the read is abandoned.
    #[arg(short = 'T', long, default_value_t = 300)]
    pub read_timeout: u64,
    ///Only http proxies are supported currently.
    #[arg(short = 'p', long, env = "VAULTDL_PROXY")]
    pub proxy_url: Option<String>,
    /// Use a column seperated key value pair e.g key1:value1,key2:value2 for request headers.
    #[arg(long)]
    pub request_headers: Option<String>,
    /// Add http cookies from previous http session.
    #[arg(long)]
    pub http_cookies: Option<String>,
    /// Set http version,supports up to  http version 1.1.
    #[arg(long)]
    pub http_version: Option<String>,
    #[arg(long, default_value = concat!("vaultdl/", env!("CARGO_PKG_VERSION")))]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            username: None,
            password: None,
            max_redirects: None,
            connect_timeout: 30,
            read_timeout: 300,
            proxy_url: None,
            request_headers: None,
            http_cookies: None,
            http_version: None,
            user_agent: concat!("vaultdl/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl TryFrom<&HttpConfig> for reqwest::Client {
    type Error = anyhow::Error;

    /// Tries to convert an `HttpConfig` into a `reqwest::Client`.
    fn try_from(http_config: &HttpConfig) -> Result<Self, Self::Error> {
        client::build_client(http_config)
    }
}

#[cfg(feature = "http")]
mod client {
    use std::str::FromStr;
    use std::time::Duration;

    use anyhow::Result;
    use cookie::Cookie;
    use reqwest::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
    use reqwest::{Client, ClientBuilder, Proxy, redirect::Policy};
    use tracing::{error, info, warn};

    use super::HttpConfig;

    pub(super) fn build_client(http_config: &HttpConfig) -> Result<Client> {
        let mut client_config = ClientBuilder::new().user_agent(http_config.user_agent.as_str());
        info!("Initialized client builder.");

        let policy: Policy = if let Some(max_redirects) = http_config.max_redirects {
            info!("Maximum redirect has been set to {}", max_redirects);
            Policy::limited(max_redirects)
        } else {
            Policy::default()
        };

        // No total timeout, a multi-gigabyte chunk may legitimately take hours.
        client_config = client_config
            .connect_timeout(Duration::from_secs(http_config.connect_timeout))
            .read_timeout(Duration::from_secs(http_config.read_timeout))
            .redirect(policy);

        if let Some(proxy_url) = &http_config.proxy_url {
            info!("Setting up user-defined proxy.");
            client_config = client_config.proxy(Proxy::all(proxy_url)?);
        } else {
            client_config = client_config.no_proxy();
        }

        if let Some(http_version) = &http_config.http_version {
            if http_version.as_str() != "1.1" {
                warn!("Unsupported http version {http_version}, using http version 1.1.");
            }
            client_config = client_config.http1_only();
        }

        let mut request_header_headermap = HeaderMap::new();
        // comma seperated header value e.g name:johndoe,age:23
        if let Some(request_headers_str) = &http_config.request_headers {
            info!("Setting up user-defined HTTP headers.");
            for (name, value) in parse_header_pairs(request_headers_str) {
                request_header_headermap.insert(HeaderName::from_str(name)?, HeaderValue::from_str(value)?);
            }
        }

        if let Some(cookies_str) = &http_config.http_cookies {
            info!("Setting up user-defined HTTP cookies.");
            match Cookie::parse(cookies_str.as_str()) {
                Ok(cookie) => {
                    request_header_headermap.insert(COOKIE, HeaderValue::from_str(cookie.to_string().as_ref())?);
                }
                Err(err) => {
                    error!(error = %err, "Can't sanitize cookie");
                }
            }
        }

        let client = client_config.default_headers(request_header_headermap).build()?;
        info!("Built HTTP client with user configuration");
        Ok(client)
    }

    /// Split ``k1:v1,k2:v2`` into trimmed pairs, skipping entries without a ``:``.
    pub(super) fn parse_header_pairs(raw: &str) -> Vec<(&str, &str)> {
        raw.split(',')
            .map(str::trim)
            .filter_map(|header| header.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
            .collect()
    }
}

///# ``EngineConfig``
/// Tuning knobs of the download engine.
/// * ``chunk_count`` : Number of concurrent ranges for a chunked download.
/// * ``chunk_threshold`` : Files smaller than this are fetched as a single stream.
/// * ``buffer_size`` : Bytes written per storage call, cancellation is checked after each.
/// * ``progress_interval`` : Sampling period of the progress aggregator.
/// * ``max_concurrent_jobs`` : Item jobs allowed to run at the same time.
/// * ``copy_buffer`` : Bytes copied per write while assembling parts.
#[derive(Debug, Clone, Getters, Setters)]
#[setters(prefix = "with_")]
pub struct EngineConfig {
    chunk_count: usize,
    chunk_threshold: u64,
    buffer_size: usize,
    progress_interval: Duration,
    max_concurrent_jobs: usize,
    copy_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_count: 4,
            chunk_threshold: 10 * MIB,
            buffer_size: 16 * KIB,
            progress_interval: Duration::from_millis(250),
            max_concurrent_jobs: 3,
            copy_buffer: 64 * KIB,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.chunk_count == 0 {
            return Err(DomainError::Config("chunk count must be at least 1".into()));
        }
        if self.buffer_size == 0 || self.copy_buffer == 0 {
            return Err(DomainError::Config("buffer sizes must be non-zero".into()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(DomainError::Config("at least one concurrent job is required".into()));
        }
        if self.progress_interval.is_zero() {
            return Err(DomainError::Config("progress interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Where downloads and engine state live on disk.
#[derive(Debug, Clone, Getters)]
pub struct DirConfig {
    download_dir: PathBuf,
    state_dir: PathBuf,
}

impl DirConfig {
    pub fn new(download_dir: &Path, state_dir: &Path) -> Result<Self, DomainError> {
        Ok(Self { download_dir: expand_path(download_dir)?, state_dir: expand_path(state_dir)? })
    }

    /// Use ``download_dir`` when given, otherwise ``./Downloads``; state always goes to the user cache dir.
    pub fn resolve(download_dir: Option<&Path>) -> Result<Self, DomainError> {
        let download_dir = download_dir.map_or_else(|| PathBuf::from("Downloads"), Path::to_path_buf);
        let state_dir = default_state_dir()?;
        Self::new(&download_dir, &state_dir)
    }

    /// File backing the download record store.
    pub fn records_file(&self) -> PathBuf {
        self.state_dir.join("records.json")
    }
}

fn default_state_dir() -> Result<PathBuf, DomainError> {
    if let Some(home) = dirs::cache_dir() {
        Ok(home.join("vaultdl"))
    } else {
        error!("Can't get user cache directory.");
        Err(DomainError::Config("Can't get user cache directory.".into()))
    }
}

/// Expand ``~`` and environment variables, make the path absolute and normalise it.
pub fn expand_path(path: &Path) -> Result<PathBuf, DomainError> {
    let raw = path.to_str().ok_or_else(|| {
        DomainError::Config(format!("Path {} is not valid unicode", path.display()))
    })?;
    let expanded = shellexpand::full(raw)
        .map_err(|err| DomainError::Config(format!("Can't expand path {raw}: {err}")))?;
    let expanded = PathBuf::from(expanded.as_ref());
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map_err(|err| DomainError::Config(format!("Can't read current directory: {err}")))?
            .join(expanded)
    };
    let cleaned = absolute.clean();
    info!(path = %cleaned.display(), "Resolved directory.");
    Ok(cleaned)
}
