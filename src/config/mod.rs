use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub volatile: VolatileConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    const fn default_max_connections() -> u32 {
        30
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatileConfig {
    /// Redis connection URL. Empty means the in-process store, which is
    /// only sensible for tests and single-node setups.
    #[serde(default)]
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests one IP may make across all links per hour on the dispatch
    /// surface.
    #[serde(default = "RateLimitConfig::default_ip_limit_per_hour")]
    pub ip_limit_per_hour: i64,

    /// Daily dispatch budget consumed by the external monitoring daemon;
    /// the dispatcher parses it but does not enforce it. 0 disables.
    #[serde(default)]
    pub global_daily_cap: i64,
}

impl RateLimitConfig {
    const fn default_ip_limit_per_hour() -> i64 {
        1000
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_limit_per_hour: Self::default_ip_limit_per_hour(),
            global_daily_cap: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `maxmind` or `ip-api`. Ignored when disabled.
    #[serde(default = "GeoIpConfig::default_provider")]
    pub provider: String,

    /// Path to a MaxMind City .mmdb file, required for the maxmind
    /// provider.
    pub database_path: Option<String>,

    /// Upper bound on cached lookups.
    #[serde(default = "GeoIpConfig::default_cache_size")]
    pub cache_size: usize,
}

impl GeoIpConfig {
    fn default_provider() -> String {
        "ip-api".to_string()
    }

    const fn default_cache_size() -> usize {
        10_000
    }
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: Self::default_provider(),
            database_path: None,
            cache_size: Self::default_cache_size(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://./shunt.db".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or_else(DatabaseConfig::default_max_connections);

        let host = std::env::var("LISTEN_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("LISTEN_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let redis_url = std::env::var("REDIS_URL").unwrap_or_default();
        if redis_url.is_empty() {
            tracing::warn!(
                "REDIS_URL is not set; counters, block list and rotation memory live in process \
                and reset on restart"
            );
        }

        let ip_limit_per_hour = std::env::var("RATE_LIMIT_IP_PER_HOUR")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or_else(RateLimitConfig::default_ip_limit_per_hour);

        let global_daily_cap = std::env::var("RATE_LIMIT_GLOBAL_DAILY_CAP")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let geoip_enabled = std::env::var("GEOIP_ENABLED")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);

        let geoip = if geoip_enabled {
            GeoIpConfig {
                enabled: true,
                provider: std::env::var("GEOIP_PROVIDER")
                    .unwrap_or_else(|_| GeoIpConfig::default_provider())
                    .to_lowercase(),
                database_path: std::env::var("GEOIP_DATABASE_PATH").ok(),
                cache_size: std::env::var("GEOIP_CACHE_SIZE")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or_else(GeoIpConfig::default_cache_size),
            }
        } else {
            GeoIpConfig::default()
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            volatile: VolatileConfig { redis_url },
            rate_limit: RateLimitConfig {
                ip_limit_per_hour,
                global_daily_cap,
            },
            geoip,
        })
    }
}
