use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::{
    models::identity::StoreKind,
    services::{
        replicator::{AdmissionPolicy, ReplicatorSettings},
        retry::RetryPolicy,
    },
};

/// Upper bounds accepted by [`AppConfig::validate`].
pub const MAX_ATTEMPTS_LIMIT: u32 = 100;
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;
pub const MAX_RETRY_BACKOFF: f64 = 10.0;
pub const MAX_JOB_TIMEOUT_SECS: u64 = 7 * 24 * 3600;
pub const MAX_HEALTH_CACHE_SECS: u64 = 24 * 3600;

/// Where a store lives: `memory`, `fs:<dir>` or `http(s)://<endpoint>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Filesystem(PathBuf),
    Http(String),
}

impl StoreConfig {
    pub fn kind(&self) -> StoreKind {
        match self {
            StoreConfig::Memory => StoreKind::Memory,
            StoreConfig::Filesystem(_) => StoreKind::Filesystem,
            StoreConfig::Http(_) => StoreKind::Http,
        }
    }
}

impl FromStr for StoreConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("memory") {
            return Ok(StoreConfig::Memory);
        }
        if let Some(dir) = s.strip_prefix("fs:") {
            if dir.is_empty() {
                return Err("`fs:` needs a directory, e.g. `fs:./data`".into());
            }
            return Ok(StoreConfig::Filesystem(PathBuf::from(dir)));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(StoreConfig::Http(s.to_string()));
        }
        Err(format!(
            "unknown store `{s}` (expected `memory`, `fs:<dir>` or an http(s) URL)"
        ))
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfig::Memory => write!(f, "memory"),
            StoreConfig::Filesystem(dir) => write!(f, "fs:{}", dir.display()),
            StoreConfig::Http(url) => write!(f, "{url}"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub source_store: StoreConfig,
    pub destination_store: StoreConfig,
    pub target_bucket: String,
    pub chunk_size: usize,
    /// Total attempts per operation, the first one included.
    pub max_retries: u32,
    /// Seconds before the first retry.
    pub retry_delay: f64,
    pub retry_backoff: f64,
    pub concurrency_ceiling: usize,
    pub admission_policy: AdmissionPolicy,
    pub job_timeout_secs: u64,
    pub health_cache_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked object replication service")]
pub struct Args {
    /// Host to bind to (overrides REPLICATOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides REPLICATOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Source store, required: memory, fs:<dir> or http(s)://<endpoint> (overrides REPLICATOR_SOURCE_STORE)
    #[arg(long)]
    pub source_store: Option<String>,

    /// Destination store: memory or fs:<dir> (overrides REPLICATOR_DESTINATION_STORE)
    #[arg(long)]
    pub destination_store: Option<String>,

    /// Bucket replicated objects are written to (overrides REPLICATOR_TARGET_BUCKET)
    #[arg(long)]
    pub target_bucket: Option<String>,

    /// Bytes per chunk (overrides REPLICATOR_CHUNK_SIZE)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Total attempts per operation (overrides REPLICATOR_MAX_RETRIES)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Seconds before the first retry (overrides REPLICATOR_RETRY_DELAY)
    #[arg(long)]
    pub retry_delay: Option<f64>,

    /// Backoff multiplier between retries (overrides REPLICATOR_RETRY_BACKOFF)
    #[arg(long)]
    pub retry_backoff: Option<f64>,

    /// Maximum concurrent replications (overrides REPLICATOR_CONCURRENCY_CEILING)
    #[arg(long)]
    pub concurrency_ceiling: Option<usize>,

    /// `queue` or `reject` when every slot is busy (overrides REPLICATOR_ADMISSION_POLICY)
    #[arg(long)]
    pub admission_policy: Option<String>,

    /// Per-job deadline in seconds (overrides REPLICATOR_JOB_TIMEOUT_SECS)
    #[arg(long)]
    pub job_timeout_secs: Option<u64>,

    /// Seconds a health check result is reused (overrides REPLICATOR_HEALTH_CACHE_SECS)
    #[arg(long)]
    pub health_cache_secs: Option<u64>,
}

/// CLI value, else environment variable.
fn lookup<T, F>(cli: Option<T>, env: &F, var: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    if cli.is_some() {
        return Ok(cli);
    }
    match env(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("parsing {var} value `{value}`: {err}")),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {var}")),
    }
}

/// CLI value, else environment variable, else `default`.
fn setting<T, F>(cli: Option<T>, env: &F, var: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    Ok(lookup(cli, env, var)?.unwrap_or(default))
}

fn cli_parsed<T>(value: Option<String>, flag: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|v| v.parse::<T>().map_err(|err| anyhow!("parsing --{flag}: {err}")))
        .transpose()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::resolve(Args::parse(), |var| env::var(var))
    }

    /// Merge `args` over the variables visible through `env`.
    pub fn resolve<F>(args: Args, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let cfg = Self {
            host: setting(args.host, &env, "REPLICATOR_HOST", "0.0.0.0".into())?,
            port: setting(args.port, &env, "REPLICATOR_PORT", 8080)?,
            source_store: lookup(
                cli_parsed(args.source_store, "source-store")?,
                &env,
                "REPLICATOR_SOURCE_STORE",
            )?
            .context("source store is required (set --source-store or REPLICATOR_SOURCE_STORE)")?,
            destination_store: setting(
                cli_parsed(args.destination_store, "destination-store")?,
                &env,
                "REPLICATOR_DESTINATION_STORE",
                StoreConfig::Memory,
            )?,
            target_bucket: lookup(args.target_bucket, &env, "REPLICATOR_TARGET_BUCKET")?
                .context(
                    "target bucket is required (set --target-bucket or REPLICATOR_TARGET_BUCKET)",
                )?,
            chunk_size: setting(args.chunk_size, &env, "REPLICATOR_CHUNK_SIZE", 8192)?,
            max_retries: setting(args.max_retries, &env, "REPLICATOR_MAX_RETRIES", 3)?,
            retry_delay: setting(args.retry_delay, &env, "REPLICATOR_RETRY_DELAY", 1.0)?,
            retry_backoff: setting(args.retry_backoff, &env, "REPLICATOR_RETRY_BACKOFF", 2.0)?,
            concurrency_ceiling: setting(
                args.concurrency_ceiling,
                &env,
                "REPLICATOR_CONCURRENCY_CEILING",
                4,
            )?,
            admission_policy: setting(
                cli_parsed(args.admission_policy, "admission-policy")?,
                &env,
                "REPLICATOR_ADMISSION_POLICY",
                AdmissionPolicy::Queue,
            )?,
            job_timeout_secs: setting(
                args.job_timeout_secs,
                &env,
                "REPLICATOR_JOB_TIMEOUT_SECS",
                300,
            )?,
            health_cache_secs: setting(
                args.health_cache_secs,
                &env,
                "REPLICATOR_HEALTH_CACHE_SECS",
                10,
            )?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.target_bucket.trim().is_empty() {
            bail!("target bucket must not be empty");
        }
        if self.chunk_size == 0 {
            bail!("chunk size must be at least 1 byte");
        }
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&self.max_retries) {
            bail!("max retries counts total attempts and must be between 1 and {MAX_ATTEMPTS_LIMIT}");
        }
        if !(0.0..=MAX_RETRY_DELAY_SECS).contains(&self.retry_delay) {
            bail!("retry delay must be between 0 and {MAX_RETRY_DELAY_SECS} seconds");
        }
        if !(1.0..=MAX_RETRY_BACKOFF).contains(&self.retry_backoff) {
            bail!("retry backoff must be between 1.0 and {MAX_RETRY_BACKOFF}");
        }
        if self.concurrency_ceiling == 0 {
            bail!("concurrency ceiling must be at least 1");
        }
        if !(1..=MAX_JOB_TIMEOUT_SECS).contains(&self.job_timeout_secs) {
            bail!("job timeout must be between 1 and {MAX_JOB_TIMEOUT_SECS} seconds");
        }
        if self.health_cache_secs > MAX_HEALTH_CACHE_SECS {
            bail!("health cache must be at most {MAX_HEALTH_CACHE_SECS} seconds");
        }
        if let StoreConfig::Http(url) = &self.destination_store {
            bail!("{url} is a read-only store and cannot be the destination");
        }
        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn to_settings(&self) -> Result<ReplicatorSettings> {
        let base_delay = Duration::try_from_secs_f64(self.retry_delay)
            .context("retry delay out of range")?;
        Ok(ReplicatorSettings {
            chunk_size: self.chunk_size,
            retry: RetryPolicy::new(self.max_retries, base_delay, self.retry_backoff),
            concurrency_ceiling: self.concurrency_ceiling,
            admission: self.admission_policy,
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        })
    }

    pub fn health_cache(&self) -> Duration {
        Duration::from_secs(self.health_cache_secs)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(args: Args, vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::resolve(args, move |name| {
            vars.get(name).cloned().ok_or(env::VarError::NotPresent)
        })
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("REPLICATOR_TARGET_BUCKET", "backup"),
        ("REPLICATOR_SOURCE_STORE", "fs:/srv/source"),
    ];

    #[test]
    fn defaults_apply_when_only_required_settings_are_set() {
        let cfg = resolve(Args::default(), &REQUIRED).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:8080");
        assert_eq!(
            cfg.source_store,
            StoreConfig::Filesystem(PathBuf::from("/srv/source"))
        );
        assert_eq!(cfg.destination_store, StoreConfig::Memory);
        assert_eq!(cfg.chunk_size, 8192);

        let settings = cfg.to_settings().unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay, Duration::from_secs(1));
        assert_eq!(settings.retry.backoff_multiplier, 2.0);
        assert_eq!(settings.concurrency_ceiling, 4);
        assert_eq!(settings.admission, AdmissionPolicy::Queue);
        assert_eq!(settings.job_timeout, Duration::from_secs(300));
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(9000),
            source_store: Some("fs:/srv/source".into()),
            admission_policy: Some("reject".into()),
            ..Args::default()
        };
        let cfg = resolve(
            args,
            &[
                ("REPLICATOR_TARGET_BUCKET", "backup"),
                ("REPLICATOR_PORT", "7000"),
                ("REPLICATOR_SOURCE_STORE", "https://objects.example.com"),
                ("REPLICATOR_RETRY_DELAY", "0.25"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(
            cfg.source_store,
            StoreConfig::Filesystem(PathBuf::from("/srv/source"))
        );
        assert_eq!(cfg.admission_policy, AdmissionPolicy::Reject);
        assert_eq!(
            cfg.to_settings().unwrap().retry.base_delay,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn missing_bucket_is_an_error() {
        let err = resolve(Args::default(), &[REQUIRED[1]]).unwrap_err();
        assert!(err.to_string().contains("REPLICATOR_TARGET_BUCKET"));
    }

    #[test]
    fn missing_source_store_is_an_error() {
        let err = resolve(Args::default(), &[REQUIRED[0]]).unwrap_err();
        assert!(err.to_string().contains("REPLICATOR_SOURCE_STORE"));

        let args = Args {
            source_store: Some("memory".into()),
            ..Args::default()
        };
        let cfg = resolve(args, &[REQUIRED[0]]).unwrap();
        assert_eq!(cfg.source_store, StoreConfig::Memory);
    }

    #[test]
    fn unparsable_variable_names_it() {
        let err = resolve(
            Args::default(),
            &[REQUIRED[0], REQUIRED[1], ("REPLICATOR_CHUNK_SIZE", "big")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("REPLICATOR_CHUNK_SIZE"));
    }

    #[test]
    fn rejects_unusable_settings() {
        for (var, value) in [
            ("REPLICATOR_CHUNK_SIZE", "0"),
            ("REPLICATOR_MAX_RETRIES", "0"),
            ("REPLICATOR_MAX_RETRIES", "1000"),
            ("REPLICATOR_RETRY_DELAY", "-1"),
            ("REPLICATOR_RETRY_DELAY", "NaN"),
            ("REPLICATOR_RETRY_DELAY", "inf"),
            ("REPLICATOR_RETRY_DELAY", "1e20"),
            ("REPLICATOR_RETRY_BACKOFF", "0.5"),
            ("REPLICATOR_RETRY_BACKOFF", "1e300"),
            ("REPLICATOR_CONCURRENCY_CEILING", "0"),
            ("REPLICATOR_JOB_TIMEOUT_SECS", "0"),
            ("REPLICATOR_JOB_TIMEOUT_SECS", "18446744073709551615"),
            ("REPLICATOR_HEALTH_CACHE_SECS", "18446744073709551615"),
            ("REPLICATOR_DESTINATION_STORE", "http://example.com"),
            ("REPLICATOR_TARGET_BUCKET", "  "),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((var, value));
            assert!(resolve(Args::default(), &vars).is_err(), "{var}={value}");
        }
    }

    #[test]
    fn parses_store_specs() {
        assert_eq!("memory".parse::<StoreConfig>(), Ok(StoreConfig::Memory));
        assert_eq!(
            "fs:./data".parse::<StoreConfig>(),
            Ok(StoreConfig::Filesystem(PathBuf::from("./data")))
        );
        assert_eq!(
            "http://localhost:9000".parse::<StoreConfig>().map(|s| s.kind()),
            Ok(StoreKind::Http)
        );
        assert!("fs:".parse::<StoreConfig>().is_err());
        assert!("s3://bucket".parse::<StoreConfig>().is_err());
    }
}
