use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Country code reported for private and loopback addresses.
pub const COUNTRY_LOCAL: &str = "LOCAL";
/// Country code substituted when resolution fails.
pub const COUNTRY_UNKNOWN: &str = "UNKNOWN";

/// Geographic location information for one IP address. Providers fill in
/// what they know; everything beyond the country code is best effort.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    pub ip: String,
    pub country_code: String,
    pub country_name: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub time_zone: Option<String>,
    pub isp: Option<String>,
}

impl Location {
    pub fn local(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            country_code: COUNTRY_LOCAL.to_string(),
            country_name: "Local Network".to_string(),
            ..Default::default()
        }
    }

    pub fn unknown(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            country_code: COUNTRY_UNKNOWN.to_string(),
            country_name: "Unknown".to_string(),
            ..Default::default()
        }
    }
}

/// A lookup backend. Selected once at construction; see
/// [`super::GeoResolver`].
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<Location>;

    /// Provider name, for logs.
    fn name(&self) -> &'static str;

    /// Release any backing resources. Most providers have nothing to do.
    fn close(&self) {}
}

/// Stub used when geo lookups are turned off. Every address resolves to
/// the `XX` sentinel, which fails any country whitelist that does not
/// allow everything.
pub struct DisabledProvider;

#[async_trait]
impl GeoProvider for DisabledProvider {
    async fn lookup(&self, ip: &str) -> Result<Location> {
        Ok(Location {
            ip: ip.to_string(),
            country_code: "XX".to_string(),
            country_name: "Unknown".to_string(),
            ..Default::default()
        })
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
