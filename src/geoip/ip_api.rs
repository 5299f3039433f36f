use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::provider::{GeoProvider, Location};

/// Remote lookup against ip-api.com.
pub struct IpApiProvider {
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default, rename = "countryCode")]
    country_code: String,
    #[serde(default, rename = "regionName")]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    query: String,
}

impl IpApiProvider {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for IpApiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeoProvider for IpApiProvider {
    async fn lookup(&self, ip: &str) -> Result<Location> {
        let url = format!(
            "http://ip-api.com/json/{ip}?fields=status,country,countryCode,regionName,city,lat,lon,timezone,isp,query"
        );

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("geo lookup returned status {}", response.status()));
        }

        let body: IpApiResponse = response.json().await?;
        if body.status != "success" {
            return Err(anyhow!("geo lookup failed for {ip}"));
        }

        Ok(Location {
            ip: if body.query.is_empty() {
                ip.to_string()
            } else {
                body.query
            },
            country_code: body.country_code,
            country_name: body.country,
            region: body.region_name,
            city: body.city,
            latitude: body.lat,
            longitude: body.lon,
            time_zone: body.timezone,
            isp: body.isp,
        })
    }

    fn name(&self) -> &'static str {
        "ip-api"
    }
}
