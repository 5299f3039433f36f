//! IP geolocation.
//!
//! A [`GeoResolver`] wraps one of three provider backends chosen at
//! startup: a local MaxMind database, the remote ip-api.com service, or a
//! disabled stub. Private and loopback addresses short-circuit to the
//! `LOCAL` sentinel without touching the provider, and any provider
//! failure degrades to `UNKNOWN` instead of failing the request.

mod ip_api;
mod maxmind;
mod provider;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::{bail, Result};
use ipnet::IpNet;
use tracing::{debug, info, warn};

use crate::config::GeoIpConfig;

pub use ip_api::IpApiProvider;
pub use maxmind::MaxMindProvider;
pub use provider::{DisabledProvider, GeoProvider, Location, COUNTRY_LOCAL, COUNTRY_UNKNOWN};

/// Resolver facade with a small bounded cache in front of the provider.
///
/// The cache is read-heavy and deliberately not an LRU: when full, one
/// arbitrary entry is evicted. Entries are long-lived and the working set
/// is bounded by client diversity, so recency tracking would buy nothing
/// on the hot path.
pub struct GeoResolver {
    provider: Arc<dyn GeoProvider>,
    cache: RwLock<HashMap<String, Location>>,
    cache_size: usize,
}

impl GeoResolver {
    /// Build the resolver from configuration. Fails fast on an unusable
    /// MaxMind database path or an unrecognized provider name.
    pub fn from_config(config: &GeoIpConfig) -> Result<Self> {
        let provider: Arc<dyn GeoProvider> = if !config.enabled {
            Arc::new(DisabledProvider)
        } else {
            match config.provider.as_str() {
                "maxmind" => {
                    let Some(ref path) = config.database_path else {
                        bail!("geoip provider 'maxmind' requires a database path");
                    };
                    Arc::new(MaxMindProvider::open(path)?)
                }
                "ip-api" => Arc::new(IpApiProvider::new()),
                other => bail!("unknown geoip provider: {other}"),
            }
        };
        info!("geoip resolver using {} provider", provider.name());

        Ok(Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            cache_size: config.cache_size.max(1),
        })
    }

    pub fn with_provider(provider: Arc<dyn GeoProvider>, cache_size: usize) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            cache_size: cache_size.max(1),
        }
    }

    /// Resolve an IP to a location. Never fails: private ranges map to
    /// `LOCAL`, anything unresolvable maps to `UNKNOWN`.
    pub async fn resolve(&self, ip: &str) -> Location {
        match ip.parse::<IpAddr>() {
            Ok(addr) if is_private(addr) => return Location::local(ip),
            Ok(_) => {}
            Err(_) => {
                debug!("unparseable client address {ip}, treating as unknown");
                return Location::unknown(ip);
            }
        }

        if let Some(cached) = self.cached(ip) {
            return cached;
        }

        match self.provider.lookup(ip).await {
            Ok(location) => {
                self.insert(ip, location.clone());
                location
            }
            Err(e) => {
                warn!("geo lookup failed for {ip}: {e}");
                Location::unknown(ip)
            }
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn close(&self) {
        self.provider.close();
    }

    fn cached(&self, ip: &str) -> Option<Location> {
        self.cache.read().ok()?.get(ip).cloned()
    }

    fn insert(&self, ip: &str, location: Location) {
        let Ok(mut cache) = self.cache.write() else {
            return;
        };
        if cache.len() >= self.cache_size {
            if let Some(evicted) = cache.keys().next().cloned() {
                cache.remove(&evicted);
            }
        }
        cache.insert(ip.to_string(), location);
    }
}

fn is_private(addr: IpAddr) -> bool {
    private_ranges().iter().any(|net| net.contains(&addr))
}

fn private_ranges() -> &'static [IpNet] {
    static RANGES: OnceLock<Vec<IpNet>> = OnceLock::new();
    RANGES.get_or_init(|| {
        [
            "10.0.0.0/8",
            "172.16.0.0/12",
            "192.168.0.0/16",
            "127.0.0.0/8",
            "::1/128",
            "fc00::/7",
        ]
        .iter()
        .filter_map(|cidr| cidr.parse().ok())
        .collect()
    })
}
