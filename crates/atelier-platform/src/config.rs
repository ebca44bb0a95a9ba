use std::{fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process-local; state is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub http_addr: String,
    pub public_base_url: String,
    pub bootstrap_admin_email: Option<String>,
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        default_http_addr: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let store = match lookup("ATELIER_STORE") {
            Some(value) => value.parse().context("ATELIER_STORE is invalid")?,
            None => StoreBackend::Postgres,
        };
        let database_url = lookup("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL is required"));
        }
        let redis_url = lookup("REDIS_URL").context("REDIS_URL is required")?;
        let http_addr = lookup("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        let bootstrap_admin_email = lookup("BOOTSTRAP_ADMIN_EMAIL")
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());

        Ok(Self {
            store,
            database_url,
            redis_url,
            http_addr,
            public_base_url,
            bootstrap_admin_email,
        })
    }

    /// The worker shares the gateway's database, so Postgres is mandatory.
    pub fn worker_from_env() -> Result<Self> {
        let config = Self::from_env("")?;
        if config.store == StoreBackend::Memory {
            return Err(anyhow!("the notification worker needs ATELIER_STORE=postgres"));
        }
        Ok(config)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }
}

/// Tuning for the notification outbox worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxConfig {
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub lease: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(15),
            max_attempts: 8,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
            lease: Duration::from_secs(120),
        }
    }
}

impl OutboxConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let secs = |name: &str, default: Duration| -> Result<Duration> {
            parse_or(&lookup, name, default.as_secs()).map(Duration::from_secs)
        };

        let config = Self {
            batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", defaults.batch_size)?,
            poll_interval: secs("OUTBOX_POLL_SECS", defaults.poll_interval)?,
            max_attempts: parse_or(&lookup, "OUTBOX_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: secs("OUTBOX_BASE_DELAY_SECS", defaults.base_delay)?,
            max_delay: secs("OUTBOX_MAX_DELAY_SECS", defaults.max_delay)?,
            lease: secs("OUTBOX_LEASE_SECS", defaults.lease)?,
        };

        if config.batch_size < 1 {
            return Err(anyhow!("OUTBOX_BATCH_SIZE must be at least 1"));
        }
        if config.max_attempts < 1 {
            return Err(anyhow!("OUTBOX_MAX_ATTEMPTS must be at least 1"));
        }
        if config.poll_interval.is_zero() {
            return Err(anyhow!("OUTBOX_POLL_SECS must be at least 1"));
        }
        if config.max_delay < config.base_delay {
            return Err(anyhow!(
                "OUTBOX_MAX_DELAY_SECS must not be below OUTBOX_BASE_DELAY_SECS"
            ));
        }
        Ok(config)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("{name} is invalid: {err}")),
        None => Ok(default),
    }
}
