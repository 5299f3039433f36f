use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Sentinel country code that disables country filtering for a target.
pub const COUNTRY_ALL: &str = "ALL";

/// A dispatchable link: a short opaque id plus an ordered pool of targets.
///
/// Rows are created and mutated by the admin surface; the dispatcher only
/// reads them. `targets` is hydrated separately (active targets, in
/// configured order) and embedded when the link is snapshotted into the
/// volatile store.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub link_id: String,
    pub business_unit: String,
    pub network: String,
    pub total_cap: i64,
    pub current_hits: i64,
    pub backup_url: Option<String>,
    pub is_active: bool,
    #[sqlx(skip)]
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// One possible destination for a link.
///
/// `countries`, `param_mapping` and `static_params` are stored as raw JSON
/// text, the way the admin surface writes them. The accessors below parse
/// them defensively: malformed JSON is a configuration error and reads as
/// empty rather than failing a request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Target {
    pub id: i64,
    pub link_id: i64,
    pub url: String,
    pub weight: i64,
    pub cap: i64,
    pub current_hits: i64,
    pub countries: String,
    pub param_mapping: String,
    pub static_params: String,
    pub is_active: bool,
}

impl Target {
    /// Whether this target accepts visitors from `country`.
    ///
    /// An empty list (or `[]`, or unparseable JSON) means no restriction.
    /// The `ALL` sentinel inside the list disables filtering. Matching is
    /// case-insensitive.
    pub fn allows_country(&self, country: &str) -> bool {
        let allowed = self.allowed_countries();
        if allowed.is_empty() {
            return true;
        }
        allowed
            .iter()
            .any(|c| c.eq_ignore_ascii_case(COUNTRY_ALL) || c.eq_ignore_ascii_case(country))
    }

    pub fn allowed_countries(&self) -> Vec<String> {
        if self.countries.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&self.countries).unwrap_or_default()
    }

    /// Rename map applied to incoming query parameters (source key to
    /// destination key).
    pub fn param_mapping(&self) -> HashMap<String, String> {
        parse_json_map(&self.param_mapping)
    }

    /// Literal parameters injected into the destination URL.
    pub fn static_params(&self) -> HashMap<String, String> {
        parse_json_map(&self.static_params)
    }

    /// Whether the target still has capacity headroom. A cap of 0 means
    /// unlimited.
    pub fn has_capacity(&self) -> bool {
        self.cap == 0 || self.current_hits < self.cap
    }
}

fn parse_json_map(raw: &str) -> HashMap<String, String> {
    if raw.trim().is_empty() {
        return HashMap::new();
    }
    serde_json::from_str(raw).unwrap_or_default()
}

/// One dispatched visit, written asynchronously after the redirect.
/// Individual records may be lost under backpressure.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessLog {
    pub id: i64,
    pub link_id: i64,
    pub target_id: i64,
    pub ip: String,
    pub user_agent: String,
    pub referer: String,
    pub country: String,
    pub created_at: i64,
}

/// Rolling per-IP access bookkeeping kept in the volatile store
/// (`ip_access:{ip}`, 24 h TTL).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAccessInfo {
    pub count: i64,
    pub last_access: i64,
    pub country: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(countries: &str) -> Target {
        Target {
            id: 1,
            link_id: 1,
            url: "https://t1.example/landing".to_string(),
            weight: 100,
            cap: 0,
            current_hits: 0,
            countries: countries.to_string(),
            param_mapping: String::new(),
            static_params: String::new(),
            is_active: true,
        }
    }

    #[test]
    fn empty_country_list_allows_everyone() {
        assert!(target("").allows_country("US"));
        assert!(target("[]").allows_country("DE"));
        assert!(target("[]").allows_country("UNKNOWN"));
    }

    #[test]
    fn all_sentinel_disables_filtering() {
        let t = target(r#"["ALL"]"#);
        assert!(t.allows_country("US"));
        assert!(t.allows_country("LOCAL"));
        assert!(t.allows_country("UNKNOWN"));
    }

    #[test]
    fn country_match_is_case_insensitive() {
        let t = target(r#"["US","CA"]"#);
        assert!(t.allows_country("us"));
        assert!(t.allows_country("CA"));
        assert!(!t.allows_country("DE"));
    }

    #[test]
    fn malformed_countries_read_as_unrestricted() {
        assert!(target("{not json").allows_country("DE"));
    }

    #[test]
    fn malformed_param_maps_read_as_empty() {
        let mut t = target("");
        t.param_mapping = "{broken".to_string();
        t.static_params = "[1,2]".to_string();
        assert!(t.param_mapping().is_empty());
        assert!(t.static_params().is_empty());
    }

    #[test]
    fn capacity_headroom() {
        let mut t = target("");
        assert!(t.has_capacity());
        t.cap = 5;
        t.current_hits = 4;
        assert!(t.has_capacity());
        t.current_hits = 5;
        assert!(!t.has_capacity());
    }
}
