//! Query parameter rewriting.
//!
//! The destination URL's final query is assembled from three layers:
//! the incoming query string (first value per key), the target's rename
//! map, and the target's static overrides. The rewriter itself cannot
//! fail; malformed mapping JSON reads as an empty map (a configuration
//! error, logged where the target is parsed, not here).

use std::collections::{BTreeMap, HashMap};

use url::Url;

use crate::models::Target;

/// Parse a raw query string into a parameter map, keeping the first value
/// seen for each key.
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    params
}

/// Apply the target's rename map and static overrides to the incoming
/// parameters.
///
/// Renames move the value from the source key to the destination key and
/// drop the source (unless both are the same key). Static parameters win
/// over anything already present. Mappings with overlapping sources or
/// destinations are a configuration error with unspecified iteration
/// order; this function does not try to detect them.
pub fn rewrite_params(target: &Target, incoming: &HashMap<String, String>) -> HashMap<String, String> {
    let mut result = incoming.clone();

    for (src, dst) in target.param_mapping() {
        if let Some(value) = result.get(&src).cloned() {
            result.insert(dst.clone(), value);
            if src != dst {
                result.remove(&src);
            }
        }
    }

    for (key, value) in target.static_params() {
        result.insert(key, value);
    }

    result
}

/// Merge the rewritten parameters into the target URL's existing query.
/// Rewritten values win over keys already present on the configured URL.
/// Keys are emitted in sorted order so the output is deterministic.
pub fn build_destination(
    target_url: &str,
    params: &HashMap<String, String>,
) -> Result<String, url::ParseError> {
    let mut destination = Url::parse(target_url)?;

    let mut merged: BTreeMap<String, String> = destination
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    for (key, value) in params {
        merged.insert(key.clone(), value.clone());
    }

    if merged.is_empty() {
        destination.set_query(None);
    } else {
        destination.query_pairs_mut().clear().extend_pairs(merged.iter());
    }

    Ok(destination.into())
}
