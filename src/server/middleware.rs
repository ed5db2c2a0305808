//! server::middleware
//!
//! Request gating: shared-secret header check and source-IP allowlist.
//!
//! The allowlist guards every route, metrics and health included; the
//! secret key guards only the webhook route. Both are no-ops when not
//! configured, and server construction warns loudly when neither is.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use thiserror::Error;
use tracing::warn;

use super::AppState;

/// Header carrying the shared secret.
pub const SECRET_KEY_HEADER: &str = "X-Key";

/// Errors from allowlist configuration.
#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("invalid IP or CIDR '{0}'")]
    InvalidCidr(String),
}

/// One allowed network, parsed from either a CIDR or a bare address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidrBlock {
    network: IpAddr,
    prefix: u8,
}

impl CidrBlock {
    /// Parse `addr` or `addr/prefix`. Bare IPv4 addresses get a /32 mask,
    /// bare IPv6 addresses a /128.
    pub fn parse(input: &str) -> Result<Self, AllowlistError> {
        let (addr_part, prefix_part) = match input.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (input, None),
        };
        let network: IpAddr = addr_part
            .parse()
            .map_err(|_| AllowlistError::InvalidCidr(input.to_string()))?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_part {
            None => max_prefix,
            Some(raw) => {
                let prefix: u8 = raw
                    .parse()
                    .map_err(|_| AllowlistError::InvalidCidr(input.to_string()))?;
                if prefix > max_prefix {
                    return Err(AllowlistError::InvalidCidr(input.to_string()));
                }
                prefix
            }
        };
        Ok(Self { network, prefix })
    }

    /// Parse a whole allowlist, failing on the first bad entry.
    pub fn parse_all(inputs: &[String]) -> Result<Vec<Self>, AllowlistError> {
        inputs.iter().map(|input| Self::parse(input)).collect()
    }

    /// Whether `ip` falls inside this network.
    pub fn contains(&self, ip: IpAddr) -> bool {
        // Mapped IPv4 (::ffff:a.b.c.d) compares as IPv4
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(network), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix)
                };
                u32::from(network) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(network), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix)
                };
                u128::from(network) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Reject requests whose source address is outside the allowlist.
///
/// An empty allowlist admits everything. A request with no resolvable peer
/// address is rejected rather than waved through.
pub async fn ip_allowlist(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.allowed_ips.is_empty() {
        return Ok(next.run(request).await);
    }
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    match peer {
        Some(ip) if state.allowed_ips.iter().any(|block| block.contains(ip)) => {
            Ok(next.run(request).await)
        }
        Some(ip) => {
            warn!(%ip, "rejected request from address outside allowlist");
            Err(StatusCode::FORBIDDEN)
        }
        None => {
            warn!("rejected request with no resolvable peer address");
            Err(StatusCode::FORBIDDEN)
        }
    }
}

/// Reject webhook requests without the configured `X-Key` header value.
pub async fn secret_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = &state.secret_key else {
        return Ok(next.run(request).await);
    };
    let presented = request
        .headers()
        .get(SECRET_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(next.run(request).await)
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}
