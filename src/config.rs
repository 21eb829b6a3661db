use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::services::{config_cache::AddressMode, poll::PollOptions, preview::PreviewOptions};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub backend_url: String,
    pub address_mode: AddressMode,
    pub poll_interval_ms: u64,
    pub poll_max_duration_ms: u64,
    pub jpeg_quality: u8,
    pub transcode_timeout_ms: u64,
    pub host: String,
    pub port: u16,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Timeline client for the life-moments backend")]
pub struct Args {
    /// Backend base URL (overrides MOMENTS_BACKEND_URL)
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// `direct` or `proxy` media addressing (overrides MOMENTS_ADDRESS_MODE)
    #[arg(long, global = true)]
    pub address_mode: Option<AddressMode>,

    /// Poll interval after a submission (overrides MOMENTS_POLL_INTERVAL_MS)
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// How long to keep polling (overrides MOMENTS_POLL_MAX_DURATION_MS)
    #[arg(long, global = true)]
    pub poll_max_duration_ms: Option<u64>,

    /// JPEG quality for HEIC previews, 1-100 (overrides MOMENTS_JPEG_QUALITY)
    #[arg(long, global = true)]
    pub jpeg_quality: Option<u8>,

    /// Upper bound for one preview transcode (overrides MOMENTS_TRANSCODE_TIMEOUT_MS)
    #[arg(long, global = true)]
    pub transcode_timeout_ms: Option<u64>,

    /// Preview host bind address (overrides MOMENTS_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Preview host port (overrides MOMENTS_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the timeline
    Events,
    /// Submit a text moment, then follow the feed while it is being annotated
    Post { text: String },
    /// Upload a photo with a caption, then follow the feed
    Upload {
        path: PathBuf,
        #[arg(long)]
        caption: String,
    },
    /// Build previews for the given files in order; the last one wins
    Preview {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Keep serving the preview until Ctrl-C
        #[arg(long)]
        hold: bool,
    },
    /// Print the address each media key resolves to
    Resolve {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Refresh the feed for one polling window
    Watch,
    /// Delete every event on the backend
    Truncate,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::merge(&args, |name| env::var(name))?;
        Ok((cfg, args.command))
    }

    /// Merge CLI overrides over values from `lookup` (normally `env::var`).
    pub fn merge(
        args: &Args,
        lookup: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<Self> {
        let env_backend = lookup("MOMENTS_BACKEND_URL")
            .unwrap_or_else(|_| "http://localhost:8000".into());
        let env_host = lookup("MOMENTS_HOST").unwrap_or_else(|_| "127.0.0.1".into());

        let cfg = Self {
            backend_url: args.backend_url.clone().unwrap_or(env_backend),
            address_mode: pick(args.address_mode, &lookup, "MOMENTS_ADDRESS_MODE", AddressMode::Direct)?,
            poll_interval_ms: pick(args.poll_interval_ms, &lookup, "MOMENTS_POLL_INTERVAL_MS", 3_000)?,
            poll_max_duration_ms: pick(
                args.poll_max_duration_ms,
                &lookup,
                "MOMENTS_POLL_MAX_DURATION_MS",
                120_000,
            )?,
            jpeg_quality: pick(args.jpeg_quality, &lookup, "MOMENTS_JPEG_QUALITY", 80)?,
            transcode_timeout_ms: pick(
                args.transcode_timeout_ms,
                &lookup,
                "MOMENTS_TRANSCODE_TIMEOUT_MS",
                30_000,
            )?,
            host: args.host.clone().unwrap_or(env_host),
            port: pick(args.port, &lookup, "MOMENTS_PORT", 4000)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("jpeg quality must be between 1 and 100, got {}", self.jpeg_quality);
        }
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be positive");
        }
        if self.transcode_timeout_ms == 0 {
            bail!("transcode timeout must be positive");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_duration: Duration::from_millis(self.poll_max_duration_ms),
        }
    }

    pub fn preview_options(&self) -> PreviewOptions {
        PreviewOptions {
            jpeg_quality: self.jpeg_quality,
            transcode_timeout: Duration::from_millis(self.transcode_timeout_ms),
        }
    }
}

/// CLI value if given, else the parsed environment value, else `default`.
fn pick<T>(
    cli: Option<T>,
    lookup: &impl Fn(&str) -> Result<String, env::VarError>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = cli {
        return Ok(value);
    }
    match lookup(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{err}"))
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}
