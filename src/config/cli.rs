use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the revalidator binary.
#[derive(Debug, Parser)]
#[command(
    name = "revalidator",
    version,
    about = "Incremental rendering cache and tag revalidation server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REVALIDATOR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Revalidate one or more tags against the configured store.
    Revalidate(RevalidateArgs),
    /// Print the tag manifest.
    Tags(TagsArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverride {
    /// Override the store backend (memory|filesystem).
    #[arg(long = "store-backend", value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override the filesystem store root.
    #[arg(long = "store-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverride,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle probing of the app-tree namespace.
    #[arg(
        long = "cache-app-tree",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_app_tree: Option<bool>,

    /// Override the TTL for routes missing from the prerender manifest.
    #[arg(long = "cache-default-revalidate-seconds", value_name = "SECONDS")]
    pub cache_default_revalidate_seconds: Option<u64>,

    /// Override the purge endpoint.
    #[arg(long = "purge-endpoint", value_name = "URL")]
    pub purge_endpoint: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RevalidateArgs {
    #[command(flatten)]
    pub store: StoreOverride,

    /// Tag to revalidate; repeat for several.
    #[arg(long = "tag", value_name = "TAG", required = true)]
    pub tags: Vec<String>,

    /// Skip the shared cache purge.
    #[arg(long = "no-purge", action = clap::ArgAction::SetTrue)]
    pub no_purge: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TagsArgs {
    #[command(flatten)]
    pub store: StoreOverride,
}
