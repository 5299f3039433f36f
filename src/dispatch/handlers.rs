use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::warn;

use crate::accounting::{self, AccountingEvent};
use crate::config::RateLimitConfig;
use crate::dispatch::error::{redirect_to, DispatchError};
use crate::dispatch::{ip, params, selector};
use crate::geoip::GeoResolver;
use crate::limits::{RateLimiter, AUTO_BLOCK_DURATION, AUTO_BLOCK_REASON};
use crate::rotation::RotationMemory;
use crate::storage::{LinkResolver, Storage};

const IP_WINDOW: Duration = Duration::from_secs(60 * 60);

pub struct DispatchState {
    pub resolver: LinkResolver,
    pub limiter: RateLimiter,
    pub rotation: RotationMemory,
    pub geo: Arc<GeoResolver>,
    pub storage: Arc<dyn Storage>,
    pub limits: RateLimitConfig,
}

/// The dispatch pipeline. Order matters: the block gate runs before
/// anything that would increment a counter or leave a log row, and the
/// global cap is checked before a target is selected.
pub async fn dispatch(
    State(state): State<Arc<DispatchState>>,
    Path((business_unit, link_id)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = ip::client_ip(&headers, peer);

    // Block-list gate. A read failure here fails open: blocking is an
    // abuse control, not a correctness gate.
    match state.limiter.is_ip_blocked(&ip).await {
        Ok(Some(reason)) => return DispatchError::Blocked { reason }.into_response_with_backup(None),
        Ok(None) => {}
        Err(e) => warn!("block-list check failed for {ip}, allowing request: {e}"),
    }

    let country = state.geo.resolve(&ip).await.country_code;

    let link = match state.resolver.resolve(&link_id).await {
        Ok(Some(link)) => link,
        Ok(None) => return DispatchError::NotFound.into_response_with_backup(None),
        Err(e) => return DispatchError::Upstream(e).into_response_with_backup(None),
    };
    if link.business_unit != business_unit {
        return DispatchError::NotFound.into_response_with_backup(None);
    }
    let backup = link.backup_url.clone();

    // Tier 1: the IP's global window. The first breach also puts the IP
    // on the block list for a day. A counter-store failure fails closed.
    match state
        .limiter
        .check_ip_limit(&ip, state.limits.ip_limit_per_hour, IP_WINDOW)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            let limiter = state.limiter.clone();
            let offender = ip.clone();
            tokio::spawn(async move {
                if let Err(e) = limiter
                    .block_ip(&offender, AUTO_BLOCK_REASON, AUTO_BLOCK_DURATION)
                    .await
                {
                    warn!("failed to auto-block {offender}: {e}");
                }
            });
            return DispatchError::RateLimited("too many requests")
                .into_response_with_backup(backup.as_deref());
        }
        Err(e) => {
            warn!("IP limit check failed for {ip}, denying: {e}");
            return DispatchError::RateLimited("too many requests").into_response_with_backup(None);
        }
    }

    // Tier 2: the (IP, link) window.
    match state.limiter.check_ip_link_limit(&ip, &link.link_id).await {
        Ok(true) => {}
        Ok(false) => {
            return DispatchError::RateLimited("link access limit exceeded")
                .into_response_with_backup(backup.as_deref());
        }
        Err(e) => {
            warn!("IP-link limit check failed for {ip}, denying: {e}");
            return DispatchError::RateLimited("too many requests").into_response_with_backup(None);
        }
    }

    // Tier 3: the link's global cap. Checked here, incremented after the
    // response; slight overshoot under concurrency is accepted.
    match state
        .limiter
        .check_global_cap(&link.link_id, link.total_cap)
        .await
    {
        Ok(true) => {}
        Ok(false) => return DispatchError::Capped.into_response_with_backup(backup.as_deref()),
        Err(e) => {
            warn!("global cap check failed for {}, denying: {e}", link.link_id);
            return DispatchError::RateLimited("too many requests").into_response_with_backup(None);
        }
    }

    let Some(target) = selector::select_target(&state.rotation, &link, &ip, &country).await else {
        return DispatchError::NoTargets.into_response_with_backup(backup.as_deref());
    };

    let incoming = params::parse_query(raw_query.as_deref().unwrap_or(""));
    let rewritten = params::rewrite_params(target, &incoming);
    let destination = match params::build_destination(&target.url, &rewritten) {
        Ok(destination) => destination,
        Err(e) => {
            warn!("target {} has an unparseable URL: {e}", target.id);
            return DispatchError::BadUrl.into_response_with_backup(None);
        }
    };

    accounting::record(
        Arc::clone(&state.storage),
        state.limiter.clone(),
        AccountingEvent {
            link_pk: link.id,
            link_id: link.link_id.clone(),
            target_pk: target.id,
            ip,
            country,
            user_agent: header_string(&headers, "user-agent"),
            referer: header_string(&headers, "referer"),
        },
    );

    redirect_to(&destination)
}

/// Liveness probe.
pub async fn health_check() -> &'static str {
    "OK"
}

fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
