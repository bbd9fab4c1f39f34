use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub s3: S3Config,
}

/// Explicit storage-provider settings handed to the gateway constructor.
/// Core logic never reads these from the environment itself.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack). None means the AWS default.
    pub endpoint_url: Option<String>,
    /// Path-style addressing, required by MinIO.
    pub force_path_style: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image host manager backed by an object store")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_HOST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_HOST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Bucket holding the images (overrides IMAGE_HOST_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides IMAGE_HOST_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Custom S3 endpoint url (overrides IMAGE_HOST_ENDPOINT_URL)
    #[arg(long)]
    pub endpoint_url: Option<String>,

    /// Force path-style bucket addressing (overrides IMAGE_HOST_FORCE_PATH_STYLE)
    #[arg(long)]
    pub force_path_style: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("IMAGE_HOST_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("IMAGE_HOST_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing IMAGE_HOST_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading IMAGE_HOST_PORT"),
        };
        let env_bucket = env::var("IMAGE_HOST_BUCKET").ok();
        let env_region = env::var("IMAGE_HOST_REGION").unwrap_or_else(|_| "us-east-1".into());
        let env_endpoint = env::var("IMAGE_HOST_ENDPOINT_URL").ok();
        let env_path_style = env::var("IMAGE_HOST_FORCE_PATH_STYLE")
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        // --- Merge ---
        let bucket = args
            .bucket
            .or(env_bucket)
            .context("a bucket is required (--bucket or IMAGE_HOST_BUCKET)")?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            s3: S3Config {
                bucket,
                region: args.region.unwrap_or(env_region),
                endpoint_url: args.endpoint_url.or(env_endpoint),
                force_path_style: args.force_path_style || env_path_style,
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
