use std::net::IpAddr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};

use super::provider::{GeoProvider, Location};

/// Local MaxMind GeoLite2/GeoIP2 City database, memory-mapped.
pub struct MaxMindProvider {
    reader: Reader<Mmap>,
}

impl MaxMindProvider {
    pub fn open(path: &str) -> Result<Self> {
        let reader = Reader::open_mmap(path)
            .with_context(|| format!("failed to open GeoIP database at {path}"))?;
        Ok(Self { reader })
    }

    fn extract(&self, ip: &str, city: geoip2::City) -> Location {
        let mut location = Location {
            ip: ip.to_string(),
            ..Default::default()
        };

        if let Some(ref country) = city.country {
            location.country_code = country.iso_code.unwrap_or_default().to_string();
            location.country_name = country
                .names
                .as_ref()
                .and_then(|names| names.get("en"))
                .map(|s| s.to_string())
                .unwrap_or_default();
        }

        if let Some(ref subdivisions) = city.subdivisions {
            if let Some(subdivision) = subdivisions.first() {
                location.region = subdivision
                    .names
                    .as_ref()
                    .and_then(|names| names.get("en"))
                    .map(|s| s.to_string());
            }
        }

        if let Some(ref city_data) = city.city {
            location.city = city_data
                .names
                .as_ref()
                .and_then(|names| names.get("en"))
                .map(|s| s.to_string());
        }

        if let Some(ref geo) = city.location {
            location.latitude = geo.latitude;
            location.longitude = geo.longitude;
            location.time_zone = geo.time_zone.map(|s| s.to_string());
        }

        location
    }
}

#[async_trait]
impl GeoProvider for MaxMindProvider {
    async fn lookup(&self, ip: &str) -> Result<Location> {
        let addr: IpAddr = ip.parse().with_context(|| format!("invalid IP address: {ip}"))?;
        let city = self
            .reader
            .lookup::<geoip2::City>(addr)?
            .with_context(|| format!("no database record for {ip}"))?;
        Ok(self.extract(ip, city))
    }

    fn name(&self) -> &'static str {
        "maxmind"
    }
}
