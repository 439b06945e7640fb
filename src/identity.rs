//! Caller identity: source IP plus a long-lived opaque cookie token.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use rand::RngCore;

use crate::model::Identity;

pub const COOKIE_NAME: &str = "couponUserId";
/// One year, in seconds.
pub const COOKIE_MAX_AGE: u64 = 365 * 24 * 60 * 60;
const TOKEN_BYTES: usize = 16;

/// 128 random bits from the OS RNG, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Value of the named cookie in the request's `Cookie` headers, if non-empty.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"'))
        .filter(|v| !v.is_empty())
}

fn set_cookie_header(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{COOKIE_NAME}={token}; Max-Age={COOKIE_MAX_AGE}; Path=/; HttpOnly; SameSite=Lax"
    ))
    .ok()
}

/// Client IP from the first `X-Forwarded-For` hop, then `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Whether proxy headers may override the socket peer address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyTrust(pub bool);

/// Resolve the caller's IP. Proxy headers are only honored when trusted.
pub fn client_ip(parts: &Parts, trust: ProxyTrust) -> IpAddr {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let forwarded = if trust.0 {
        forwarded_ip(&parts.headers)
    } else {
        None
    };
    forwarded
        .or(peer)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// The caller's identity, plus the cookie to set if it was just issued.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub identity: Identity,
    issued: bool,
}

impl ResolvedIdentity {
    pub fn resolve(ip: IpAddr, headers: &HeaderMap) -> Self {
        match cookie_value(headers, COOKIE_NAME) {
            Some(token) => Self {
                identity: Identity::new(ip.to_string(), token),
                issued: false,
            },
            None => Self {
                identity: Identity::new(ip.to_string(), generate_token()),
                issued: true,
            },
        }
    }

    pub fn is_new(&self) -> bool {
        self.issued
    }

    /// Response headers carrying the freshly issued cookie, or nothing.
    pub fn response_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.issued {
            if let Some(value) = set_cookie_header(&self.identity.cookie_token) {
                headers.insert(SET_COOKIE, value);
            }
        }
        headers
    }
}

impl<S> FromRequestParts<S> for ResolvedIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trust = parts.extensions.get::<ProxyTrust>().copied().unwrap_or_default();
        let ip = client_ip(parts, trust);
        Ok(Self::resolve(ip, &parts.headers))
    }
}
