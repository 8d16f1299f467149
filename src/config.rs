use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "COURIER_";

/// How fetch tokens are signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SigningMode {
    /// HMAC with the long-lived account key.
    SharedKey,
    /// HMAC with a short-lived key obtained from the delegation authority.
    Delegated,
}

/// A configuration value that must never reach the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub container: String,
    pub public_url: String,
    pub account_name: String,
    pub signing_mode: SigningMode,
    pub account_key: Option<Secret>,
    pub delegation_secret: Option<Secret>,
    pub token_ttl: Duration,
    pub accepted_extension: String,
    pub accepted_mime: String,
    pub sniff_window: usize,
    pub forward_url: Option<String>,
    pub timeout: Duration,
    pub max_upload_bytes: usize,
    pub db_retry_attempts: u32,
    pub db_retry_base: Duration,
    pub bcrypt_cost: u32,
}

/// One-shot maintenance modes selected on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub migrate: bool,
    pub list_orphans: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Verified upload delivery service")]
pub struct Args {
    /// Host to bind to (overrides COURIER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides COURIER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides COURIER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides COURIER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Container uploads land in (overrides COURIER_CONTAINER)
    #[arg(long)]
    pub container: Option<String>,

    /// Base URL used in fetch links (overrides COURIER_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Token signing mode (overrides COURIER_SIGNING_MODE)
    #[arg(long, value_enum)]
    pub signing_mode: Option<SigningMode>,

    /// Downstream webhook receiving accepted payloads (overrides COURIER_FORWARD_URL)
    #[arg(long)]
    pub forward_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Print the orphaned-object ledger as JSON and exit
    #[arg(long)]
    pub list_orphans: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run flags.
    pub fn from_env_and_args() -> Result<(Self, Flags)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over values looked up through `lookup` (unprefixed names).
    pub fn resolve(
        args: Args,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Flags)> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let host = args
            .host
            .or_else(|| var("HOST"))
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match args.port {
            Some(port) => port,
            None => parse_var(&var, "PORT", 3000)?,
        };
        let signing_mode = match args.signing_mode {
            Some(mode) => mode,
            None => match var("SIGNING_MODE") {
                Some(value) => <SigningMode as ValueEnum>::from_str(&value, true).map_err(|err| {
                    anyhow!("parsing {ENV_PREFIX}SIGNING_MODE value `{value}`: {err}")
                })?,
                None => SigningMode::SharedKey,
            },
        };
        let public_url = args
            .public_url
            .or_else(|| var("PUBLIC_URL"))
            .unwrap_or_else(|| format!("http://{host}:{port}"));

        let cfg = Self {
            storage_dir: args
                .storage_dir
                .or_else(|| var("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| var("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/courier.db".into()),
            container: args
                .container
                .or_else(|| var("CONTAINER"))
                .unwrap_or_else(|| "uploads".into()),
            public_url,
            account_name: var("ACCOUNT_NAME").unwrap_or_else(|| "local".into()),
            signing_mode,
            account_key: var("ACCOUNT_KEY").map(Secret::new),
            delegation_secret: var("DELEGATION_SECRET").map(Secret::new),
            token_ttl: Duration::from_secs(parse_var(&var, "TOKEN_TTL_SECS", 86_400)?),
            accepted_extension: var("ACCEPTED_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .unwrap_or_else(|| "json".into()),
            accepted_mime: var("ACCEPTED_MIME").unwrap_or_else(|| "application/json".into()),
            sniff_window: parse_var(&var, "SNIFF_WINDOW", 2048)?,
            forward_url: args.forward_url.or_else(|| var("FORWARD_URL")),
            timeout: Duration::from_secs(parse_var(&var, "TIMEOUT_SECS", 30)?),
            max_upload_bytes: parse_var(&var, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            db_retry_attempts: parse_var(&var, "DB_RETRY_ATTEMPTS", 3)?,
            db_retry_base: Duration::from_millis(parse_var(&var, "DB_RETRY_BASE_MS", 500)?),
            bcrypt_cost: parse_var(&var, "BCRYPT_COST", 12)?,
            host,
            port,
        };

        let flags = Flags {
            migrate: args.migrate,
            list_orphans: args.list_orphans,
        };
        Ok((cfg, flags))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`")),
        None => Ok(default),
    }
}
