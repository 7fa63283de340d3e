use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use argh::FromArgs;
use pobox_core::MaxRetries;

/// The game-control + invoice-delivery host. Every flag falls back to an
/// environment variable, then to a default; only the bucket name is
/// required.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// object store bucket holding invoice artifacts ($BUCKET_NAME)
    #[argh(option)]
    bucket: Option<String>,

    /// bucket scan interval in milliseconds ($POLL_INTERVAL_MS, 10000)
    #[argh(option)]
    poll_interval_ms: Option<u64>,

    /// directory for processed invoice records ($INVOICE_DIR, "invoices")
    #[argh(option)]
    invoice_dir: Option<PathBuf>,

    /// port the /game-control WebSocket listens on ($WS_PORT, 8080)
    #[argh(option)]
    ws_port: Option<u16>,

    /// port of the REST surface; derives the default sink base URL
    /// ($HTTP_PORT, 3000)
    #[argh(option)]
    http_port: Option<u16>,

    /// completed scans before an unmatched registration expires, or
    /// 'unlimited' ($MAX_RETRIES, unlimited)
    #[argh(option)]
    max_retries: Option<MaxRetries>,

    /// endpoint override for S3-compatible object stores ($S3_ENDPOINT)
    #[argh(option)]
    s3_endpoint: Option<String>,

    /// base URL of the game-over / process-order sinks ($SINK_URL,
    /// http://127.0.0.1:$HTTP_PORT)
    #[argh(option)]
    sink_url: Option<String>,

    /// outbound HTTP timeout in milliseconds ($HTTP_TIMEOUT_MS, 5000)
    #[argh(option)]
    http_timeout_ms: Option<u64>,
}

/// Validated process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub bucket: String,
    pub poll_interval: Duration,
    pub invoice_dir: PathBuf,
    pub ws_port: u16,
    pub http_port: u16,
    pub max_retries: MaxRetries,
    pub s3_endpoint: Option<String>,
    pub sink_url: String,
    pub http_timeout: Duration,
}

impl Args {
    pub fn into_config(self) -> anyhow::Result<Config> {
        let bucket = or_env(self.bucket, "BUCKET_NAME")?
            .context("a bucket must be set (--bucket or $BUCKET_NAME)")?;
        let poll_interval_ms =
            or_env(self.poll_interval_ms, "POLL_INTERVAL_MS")?
                .unwrap_or(10_000);
        let invoice_dir = or_env(self.invoice_dir, "INVOICE_DIR")?
            .unwrap_or_else(|| PathBuf::from("invoices"));
        let ws_port = or_env(self.ws_port, "WS_PORT")?.unwrap_or(8080);
        let http_port =
            or_env(self.http_port, "HTTP_PORT")?.unwrap_or(3000);
        let max_retries = or_env(self.max_retries, "MAX_RETRIES")?
            .unwrap_or(MaxRetries::Unlimited);
        let s3_endpoint = or_env(self.s3_endpoint, "S3_ENDPOINT")?;
        let sink_url = or_env(self.sink_url, "SINK_URL")?
            .unwrap_or_else(|| format!("http://127.0.0.1:{http_port}"));
        let http_timeout_ms =
            or_env(self.http_timeout_ms, "HTTP_TIMEOUT_MS")?
                .unwrap_or(5_000);

        Ok(Config {
            bucket,
            poll_interval: Duration::from_millis(poll_interval_ms),
            invoice_dir,
            ws_port,
            http_port,
            max_retries,
            s3_endpoint,
            sink_url,
            http_timeout: Duration::from_millis(http_timeout_ms),
        })
    }
}

/// An arg takes its explicit value if given, otherwise parses the env
/// var, otherwise stays unset for the caller to default.
fn or_env<T>(arg: Option<T>, var: &'static str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if arg.is_some() {
        return Ok(arg);
    }
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err| anyhow!("invalid ${var}: {err}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) =>
            Err(anyhow!("${var} is not valid unicode")),
    }
}
