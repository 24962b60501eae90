use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use crate::services::{
    document_store::DEFAULT_DATABASE,
    object_store::DEFAULT_PAGE_SIZE,
    relational_store::{DEFAULT_BATCH_SIZE, DEFAULT_POOL_SIZE},
};

/// Endpoint value that selects the in-process object backend.
pub const MEMORY_ENDPOINT: &str = "memory://";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub pool_size: u32,
    pub batch_size: usize,
    pub page_size: usize,
    pub acquire_timeout: Duration,
    pub nosql_database: String,
    pub cos_endpoint: Option<String>,
    pub credentials_file: PathBuf,
    pub cert_dir: PathBuf,
    pub database_url: Option<String>,
    pub mongodb_uri: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Data access facade over SQL, document and object stores")]
pub struct Args {
    /// Host to bind to (overrides DATA_FACADE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DATA_FACADE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum pooled SQL connections (overrides DATA_FACADE_POOL_SIZE)
    #[arg(long)]
    pub pool_size: Option<u32>,

    /// Rows per upsert statement (overrides DATA_FACADE_BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Keys requested per listing call (overrides DATA_FACADE_PAGE_SIZE)
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Seconds to wait for a pooled SQL connection (overrides DATA_FACADE_ACQUIRE_TIMEOUT_SECS)
    #[arg(long)]
    pub acquire_timeout_secs: Option<u64>,

    /// Document database name (overrides DATA_FACADE_NOSQL_DATABASE)
    #[arg(long)]
    pub nosql_database: Option<String>,

    /// Object storage endpoint; `memory://` keeps objects in process (overrides DATA_FACADE_COS_ENDPOINT)
    #[arg(long)]
    pub cos_endpoint: Option<String>,

    /// Service credentials file used when VCAP_SERVICES is unset (overrides DATA_FACADE_CREDENTIALS_FILE)
    #[arg(long)]
    pub credentials_file: Option<PathBuf>,

    /// Directory for decoded CA certificates (overrides DATA_FACADE_CERT_DIR)
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// PostgreSQL URL used instead of the bound credentials (overrides DATA_FACADE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// MongoDB URI used instead of the bound credentials (overrides DATA_FACADE_MONGODB_URI)
    #[arg(long)]
    pub mongodb_uri: Option<String>,
}

/// Parse `name` from `lookup`, falling back to `default` when unset.
fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge `args` over the variables `lookup` yields; CLI wins.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = lookup("DATA_FACADE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parsed(&lookup, "DATA_FACADE_PORT", 8080u16)?;
        let env_pool = parsed(&lookup, "DATA_FACADE_POOL_SIZE", DEFAULT_POOL_SIZE)?;
        let env_batch = parsed(&lookup, "DATA_FACADE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        let env_page = parsed(&lookup, "DATA_FACADE_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let env_timeout = parsed(&lookup, "DATA_FACADE_ACQUIRE_TIMEOUT_SECS", 30u64)?;
        let env_nosql =
            lookup("DATA_FACADE_NOSQL_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into());
        let env_credentials = lookup("DATA_FACADE_CREDENTIALS_FILE")
            .unwrap_or_else(|| crate::credentials::DEFAULT_VCAP_FILE.into());
        let env_cert_dir = lookup("DATA_FACADE_CERT_DIR").unwrap_or_else(|| "./certs".into());

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            pool_size: args.pool_size.unwrap_or(env_pool).max(1),
            batch_size: args.batch_size.unwrap_or(env_batch).max(1),
            page_size: args.page_size.unwrap_or(env_page).clamp(1, DEFAULT_PAGE_SIZE),
            acquire_timeout: Duration::from_secs(args.acquire_timeout_secs.unwrap_or(env_timeout)),
            nosql_database: args.nosql_database.unwrap_or(env_nosql),
            cos_endpoint: args.cos_endpoint.or_else(|| lookup("DATA_FACADE_COS_ENDPOINT")),
            credentials_file: args.credentials_file.unwrap_or_else(|| env_credentials.into()),
            cert_dir: args.cert_dir.unwrap_or_else(|| env_cert_dir.into()),
            database_url: args.database_url.or_else(|| lookup("DATA_FACADE_DATABASE_URL")),
            mongodb_uri: args.mongodb_uri.or_else(|| lookup("DATA_FACADE_MONGODB_URI")),
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uses_memory_objects(&self) -> bool {
        self.cos_endpoint.as_deref() == Some(MEMORY_ENDPOINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_env_or_args() {
        let cfg = AppConfig::resolve(Args::default(), env_of(&[])).expect("config");
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(cfg.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(cfg.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cfg.nosql_database, DEFAULT_DATABASE);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(30));
        assert!(!cfg.uses_memory_objects());
    }

    #[test]
    fn args_override_env() {
        let args = Args {
            port: Some(9000),
            cos_endpoint: Some(MEMORY_ENDPOINT.into()),
            ..Args::default()
        };
        let cfg = AppConfig::resolve(
            args,
            env_of(&[("DATA_FACADE_PORT", "7000"), ("DATA_FACADE_BATCH_SIZE", "250")]),
        )
        .expect("config");
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.batch_size, 250);
        assert!(cfg.uses_memory_objects());
    }

    #[test]
    fn malformed_numbers_are_reported() {
        let err = AppConfig::resolve(Args::default(), env_of(&[("DATA_FACADE_POOL_SIZE", "many")]))
            .expect_err("bad pool size");
        assert!(err.to_string().contains("DATA_FACADE_POOL_SIZE"));
    }
}
