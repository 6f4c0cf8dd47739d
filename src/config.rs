use serde::Deserialize;
use std::time::Duration;

/// Runtime configuration, loaded from the environment (and `.env` when present).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// Apply `migrations/0001_lead_finder.sql` at startup.
    pub db_apply_schema: bool,
    pub port: u16,
    /// Key sent to the search provider in the `X-API-KEY` header.
    pub search_api_key: String,
    pub search_api_base_url: String,
    /// Pause between consecutive result pages of one search.
    pub page_delay_ms: u64,
    pub search_timeout_secs: u64,
    /// Timeout for ancillary lookups such as place details.
    pub lookup_timeout_secs: u64,
    pub place_cache_enabled: bool,
    pub place_cache_ttl_secs: u64,
    pub place_cache_capacity: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            db_max_connections: parse_env_or("DB_MAX_CONNECTIONS", 10)?,
            db_acquire_timeout_secs: parse_env_or("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
            db_apply_schema: parse_env_or("DB_APPLY_SCHEMA", false)?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            search_api_key: std::env::var("SEARCH_API_KEY")
                .map_err(|_| anyhow::anyhow!("SEARCH_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("SEARCH_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            search_api_base_url: std::env::var("SEARCH_API_BASE_URL")
                .map_err(|_| anyhow::anyhow!("SEARCH_API_BASE_URL environment variable required"))
                .and_then(|raw| {
                    let parsed = url::Url::parse(raw.trim()).map_err(|e| {
                        anyhow::anyhow!("SEARCH_API_BASE_URL is not a valid URL: {}", e)
                    })?;
                    if parsed.scheme() != "http" && parsed.scheme() != "https" {
                        anyhow::bail!("SEARCH_API_BASE_URL must start with http:// or https://");
                    }
                    Ok(raw.trim().trim_end_matches('/').to_string())
                })?,
            page_delay_ms: parse_env_or("SEARCH_PAGE_DELAY_MS", 500)?,
            search_timeout_secs: parse_env_or("SEARCH_TIMEOUT_SECS", 30)?,
            lookup_timeout_secs: parse_env_or("LOOKUP_TIMEOUT_SECS", 10)?,
            place_cache_enabled: parse_env_or("PLACE_CACHE_ENABLED", true)?,
            place_cache_ttl_secs: parse_env_or("PLACE_CACHE_TTL_SECS", 86_400)?,
            place_cache_capacity: parse_env_or("PLACE_CACHE_CAPACITY", 10_000)?,
        };

        // Never log the API key
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!(
            "Database pool: {} connections, {}s acquire timeout",
            config.db_max_connections,
            config.db_acquire_timeout_secs
        );
        tracing::debug!("Search API Base URL: {}", config.search_api_base_url);
        tracing::debug!(
            "Page delay: {}ms, search timeout: {}s, lookup timeout: {}s",
            config.page_delay_ms,
            config.search_timeout_secs,
            config.lookup_timeout_secs
        );
        if !config.place_cache_enabled {
            tracing::info!("Place details cache disabled");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

/// Reads an optional variable, falling back to `default` when unset or blank.
fn parse_env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}
