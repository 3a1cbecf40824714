//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use axum::http::HeaderName;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{
    CliArgs, Command, RevalidateArgs, ServeArgs, ServeOverrides, StoreOverride, TagsArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "revalidator";
const ENV_PREFIX: &str = "REVALIDATOR";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORE_ROOT: &str = "data/cache";
const DEFAULT_PURGE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SHARED_CACHE_CONTROL_HEADER: &str = "netlify-cdn-cache-control";
const DEFAULT_SHARED_VARY_HEADER: &str = "netlify-vary";
const DEFAULT_CACHE_TAG_HEADER: &str = "cache-tag";
const DEFAULT_DEBUG_HEADER: &str = "x-debug-logging";
const DEFAULT_ENGINE_NAME: &str = "revalidator";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub headers: HeaderSettings,
    pub purge: PurgeSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Bearer token required by the admin endpoints; `None` leaves them open.
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Filesystem,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "filesystem" | "fs" => Ok(Self::Filesystem),
            other => Err(format!("unknown backend `{other}` (expected memory|filesystem)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub root: PathBuf,
    /// How long an in-memory write stays invisible to eventually consistent reads.
    pub replication_lag: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CacheSettings {
    pub app_tree: bool,
    pub default_revalidate_seconds: Option<u64>,
    pub prerender_manifest: Option<PathBuf>,
    pub tags_manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HeaderSettings {
    pub shared_cache_control: HeaderName,
    pub shared_vary: HeaderName,
    pub cache_tag: HeaderName,
    pub debug_header: HeaderName,
    pub engine_name: String,
    pub base_path: Option<String>,
    pub locales: Vec<String>,
    pub locale_detection: bool,
}

#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub endpoint: Option<Url>,
    pub token: Option<String>,
    pub site_id: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("headers.locales")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Revalidate(args)) => raw.apply_store_override(&args.store),
        Some(Command::Tags(args)) => raw.apply_store_override(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    headers: RawHeaderSettings,
    purge: RawPurgeSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(app_tree) = overrides.cache_app_tree {
            self.cache.app_tree = Some(app_tree);
        }
        if let Some(seconds) = overrides.cache_default_revalidate_seconds {
            self.cache.default_revalidate_seconds = Some(seconds);
        }
        if let Some(endpoint) = overrides.purge_endpoint.as_ref() {
            self.purge.endpoint = Some(endpoint.clone());
        }

        self.apply_store_override(&overrides.store);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(backend) = overrides.backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(root) = overrides.root.as_ref() {
            self.store.root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            headers,
            purge,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            headers: build_header_settings(headers)?,
            purge: build_purge_settings(purge)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        admin_token: non_empty(server.admin_token),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend {
        Some(value) => StoreBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("store.backend", reason))?,
        None => StoreBackend::Memory,
    };

    let root = store
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("store.root", "path must not be empty"));
    }

    Ok(StoreSettings {
        backend,
        root,
        replication_lag: Duration::from_millis(store.replication_lag_ms.unwrap_or(0)),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    if cache.default_revalidate_seconds == Some(0) {
        return Err(LoadError::invalid(
            "cache.default_revalidate_seconds",
            "must be greater than zero; omit it to never expire",
        ));
    }

    Ok(CacheSettings {
        app_tree: cache.app_tree.unwrap_or(false),
        default_revalidate_seconds: cache.default_revalidate_seconds,
        prerender_manifest: cache.prerender_manifest,
        tags_manifest: cache.tags_manifest,
    })
}

fn build_header_settings(headers: RawHeaderSettings) -> Result<HeaderSettings, LoadError> {
    let shared_cache_control = header_name(
        headers.shared_cache_control,
        DEFAULT_SHARED_CACHE_CONTROL_HEADER,
        "headers.shared_cache_control",
    )?;
    let shared_vary = header_name(
        headers.shared_vary,
        DEFAULT_SHARED_VARY_HEADER,
        "headers.shared_vary",
    )?;
    let cache_tag = header_name(
        headers.cache_tag,
        DEFAULT_CACHE_TAG_HEADER,
        "headers.cache_tag",
    )?;
    let debug_header = header_name(
        headers.debug_header,
        DEFAULT_DEBUG_HEADER,
        "headers.debug_header",
    )?;

    let engine_name = non_empty(headers.engine_name).unwrap_or_else(|| DEFAULT_ENGINE_NAME.into());
    if engine_name.contains('"') {
        return Err(LoadError::invalid(
            "headers.engine_name",
            "must not contain double quotes",
        ));
    }

    let base_path = match non_empty(headers.base_path) {
        Some(path) if !path.starts_with('/') => {
            return Err(LoadError::invalid(
                "headers.base_path",
                "must start with `/`",
            ));
        }
        Some(path) => Some(path.trim_end_matches('/').to_string()).filter(|p| !p.is_empty()),
        None => None,
    };

    let locales = headers
        .locales
        .unwrap_or_default()
        .into_iter()
        .map(|locale| locale.trim().to_string())
        .filter(|locale| !locale.is_empty())
        .collect();

    Ok(HeaderSettings {
        shared_cache_control,
        shared_vary,
        cache_tag,
        debug_header,
        engine_name,
        base_path,
        locales,
        locale_detection: headers.locale_detection.unwrap_or(true),
    })
}

fn build_purge_settings(purge: RawPurgeSettings) -> Result<PurgeSettings, LoadError> {
    let endpoint = match non_empty(purge.endpoint) {
        Some(value) => Some(
            Url::parse(&value)
                .map_err(|err| LoadError::invalid("purge.endpoint", err.to_string()))?,
        ),
        None => None,
    };

    let timeout_secs = purge.timeout_seconds.unwrap_or(DEFAULT_PURGE_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "purge.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(PurgeSettings {
        endpoint,
        token: non_empty(purge.token),
        site_id: non_empty(purge.site_id),
        timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    root: Option<PathBuf>,
    replication_lag_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    app_tree: Option<bool>,
    default_revalidate_seconds: Option<u64>,
    prerender_manifest: Option<PathBuf>,
    tags_manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHeaderSettings {
    shared_cache_control: Option<String>,
    shared_vary: Option<String>,
    cache_tag: Option<String>,
    debug_header: Option<String>,
    engine_name: Option<String>,
    base_path: Option<String>,
    locales: Option<Vec<String>>,
    locale_detection: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPurgeSettings {
    endpoint: Option<String>,
    token: Option<String>,
    site_id: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn header_name(
    value: Option<String>,
    default: &'static str,
    key: &'static str,
) -> Result<HeaderName, LoadError> {
    let value = non_empty(value).unwrap_or_else(|| default.to_string());
    HeaderName::from_str(&value.to_ascii_lowercase())
        .map_err(|err| LoadError::invalid(key, format!("invalid header name `{value}`: {err}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
